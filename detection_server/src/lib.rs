mod distance;
mod inference;
mod labels;
mod ort_service;
mod server;

pub mod config;
pub mod detector;

pub use distance::DistanceEstimator;
pub use inference::{InferenceService, ProcessError};
pub use labels::ClassLabels;
pub use ort_service::OrtDetector;
pub use server::{start_server, DetectionServer, ServerError};
