pub mod generative;
pub mod vision;

use async_trait::async_trait;
use thiserror::Error;

pub use generative::GeminiClient;
pub use vision::AzureVisionClient;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{service} returned {status}: {body}")]
    Api {
        service: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("Missing Operation-Location header in read response")]
    MissingOperationLocation,
    #[error("Read operation {0} did not finish after {1} polls")]
    ReadTimeout(String, u32),
    #[error("Invalid configuration: {0}")]
    Config(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Caption {
    pub text: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub name: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectedObject {
    pub name: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageAnalysis {
    pub captions: Vec<Caption>,
    pub tags: Vec<Tag>,
    pub objects: Vec<DetectedObject>,
}

impl ImageAnalysis {
    pub fn has_tag(&self, name: &str) -> bool {
        self.tags.iter().any(|tag| tag.name == name)
    }
}

/// Handle for an asynchronous OCR job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOperation {
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    NotStarted,
    Running,
    Succeeded,
    Failed,
}

impl ReadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ReadStatus::Succeeded | ReadStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadResult {
    pub status: ReadStatus,
    pub lines: Vec<String>,
}

/// Captioning, tagging and object listing for one image.
#[async_trait]
pub trait ImageAnalyzer: Send + Sync {
    async fn analyze(&self, image: &[u8]) -> Result<ImageAnalysis, ServiceError>;
}

/// Two-step OCR: submit the image, then poll the operation.
#[async_trait]
pub trait TextReader: Send + Sync {
    async fn submit(&self, image: &[u8]) -> Result<ReadOperation, ServiceError>;
    async fn get_result(&self, operation: &ReadOperation) -> Result<ReadResult, ServiceError>;
}

#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ServiceError>;
}

/// Turns a non-success response into `ServiceError::Api`.
pub(crate) async fn check_status(
    service: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::error!("{} error {}: {}", service, status, body);
    Err(ServiceError::Api {
        service,
        status,
        body,
    })
}
