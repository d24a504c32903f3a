use crate::server::SharedState;
use axum::{extract::State, response::IntoResponse, response::Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct Health {
    status: &'static str,
    camera_open: bool,
    serial_connected: bool,
}

pub async fn healthcheck(State(state): State<SharedState>) -> impl IntoResponse {
    Json(Health {
        status: "available",
        camera_open: state.camera.is_open(),
        serial_connected: state.link.is_connected(),
    })
}
