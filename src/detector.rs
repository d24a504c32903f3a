use async_trait::async_trait;
use thiserror::Error;

/// One model-identified object. Box corners are in original-image pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub class_id: u32,
    pub confidence: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Failed to decode image: {0}")]
    ImageDecode(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Unexpected model output: {0}")]
    ModelOutput(String),
}

/// Opaque boundary to the object detector. The orchestrator never depends on
/// anything beyond this signature, so any detector can be substituted.
#[async_trait]
pub trait Detector: Send + Sync + 'static {
    async fn detect(
        &self,
        image: &[u8],
        confidence: f32,
        iou: f32,
    ) -> Result<Vec<Detection>, DetectorError>;
}
