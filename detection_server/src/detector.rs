use async_trait::async_trait;
use image::DynamicImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Failed to prepare model input: {0}")]
    Input(String),
    #[error("Inference failed: {0}")]
    Inference(String),
}

/// One object found by the model, corners in frame pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub class_label: String,
    pub confidence: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

#[async_trait]
pub trait Detector: Send + Sync + 'static {
    async fn detect(&self, image: &DynamicImage) -> Result<Vec<RawDetection>, DetectorError>;
}
