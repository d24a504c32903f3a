use super::DetectParams;
use crate::orchestrator::ImageDetectError;
use crate::results::DetectionResult;
use crate::server::SharedState;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use tracing::instrument;

#[instrument(skip(state, image_data))]
pub async fn detect_image(
    State(state): State<SharedState>,
    Query(params): Query<DetectParams>,
    image_data: Bytes,
) -> Result<Json<DetectionResult>, ImageDetectError> {
    let result = state
        .orchestrator
        .detect_image(&image_data, params.confidence, params.iou)
        .await?;

    Ok(Json(result))
}

impl IntoResponse for ImageDetectError {
    fn into_response(self) -> Response {
        let status = match self {
            ImageDetectError::Decode(_) => StatusCode::BAD_REQUEST,
        };
        (status, self.to_string()).into_response()
    }
}
