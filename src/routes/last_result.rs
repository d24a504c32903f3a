use crate::server::SharedState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};

pub async fn last_result(State(state): State<SharedState>) -> Response {
    match state.store.latest() {
        Some(result) => Json(result).into_response(),
        None => (StatusCode::NOT_FOUND, "No capture has completed yet").into_response(),
    }
}
