use crate::orchestrator::CaptureError;
use crate::results::DetectionResult;
use crate::server::SharedState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use tracing::instrument;

#[derive(Debug, Deserialize)]
pub struct DetectParams {
    pub confidence: Option<f32>,
    pub iou: Option<f32>,
}

#[instrument(skip(state))]
pub async fn capture(
    State(state): State<SharedState>,
    Query(params): Query<DetectParams>,
) -> Result<Json<DetectionResult>, CaptureError> {
    let result = state
        .orchestrator
        .capture_and_detect(params.confidence, params.iou)
        .await?;

    Ok(Json(result))
}

impl IntoResponse for CaptureError {
    fn into_response(self) -> Response {
        let status = match self {
            CaptureError::CameraUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            CaptureError::NoFrame => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, self.to_string()).into_response()
    }
}
