use crate::server::SharedState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use tracing::instrument;

#[instrument(skip(state))]
pub async fn camera_status(State(state): State<SharedState>) -> Response {
    let status = state.camera.status();
    if status.ok {
        Json(status).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(status)).into_response()
    }
}
