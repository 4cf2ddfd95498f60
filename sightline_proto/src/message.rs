use prost::Message;
use thiserror::Error;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Malformed detection result: {0}")]
    Malformed(#[from] prost::DecodeError),
    #[error("Unsupported detection result version {0}, expected {SCHEMA_VERSION}")]
    UnsupportedVersion(u32),
}

/// Box corners in frame pixel coordinates.
#[derive(Clone, Copy, PartialEq, Message)]
pub struct BoundingBox {
    #[prost(int32, tag = "1")]
    pub x1: i32,
    #[prost(int32, tag = "2")]
    pub y1: i32,
    #[prost(int32, tag = "3")]
    pub x2: i32,
    #[prost(int32, tag = "4")]
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i32 {
        self.x2.saturating_sub(self.x1)
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct Detection {
    #[prost(string, tag = "1")]
    pub label: String,
    #[prost(float, tag = "2")]
    pub confidence: f32,
    #[prost(double, tag = "3")]
    pub distance_cm: f64,
    #[prost(message, optional, tag = "4")]
    pub bbox: Option<BoundingBox>,
}

/// Server response for one inbound frame.
#[derive(Clone, PartialEq, Message)]
pub struct DetectionResult {
    #[prost(uint32, tag = "1")]
    pub version: u32,
    #[prost(message, repeated, tag = "2")]
    pub detection_results: Vec<Detection>,
    #[prost(string, tag = "3")]
    pub inference_output: String,
}

impl DetectionResult {
    pub fn new(detection_results: Vec<Detection>, inference_output: String) -> Self {
        Self {
            version: SCHEMA_VERSION,
            detection_results,
            inference_output,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let result = Self::decode(bytes)?;
        if result.version != SCHEMA_VERSION {
            return Err(DecodeError::UnsupportedVersion(result.version));
        }
        Ok(result)
    }
}
