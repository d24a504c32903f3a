mod camera_status;
mod capture;
mod detect_image;
mod health;
mod last_result;
mod metrics;
mod video_feed;

use crate::server::SharedState;
use axum::{
    routing::{get, post},
    Router,
};

pub use capture::DetectParams;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health::healthcheck))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/camera/status", get(camera_status::camera_status))
        .route("/camera/stream", get(video_feed::video_feed))
        .route("/capture", post(capture::capture))
        .route("/detect", post(detect_image::detect_image))
        .route("/result/latest", get(last_result::last_result))
}
