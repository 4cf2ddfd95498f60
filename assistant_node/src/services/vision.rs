use super::{
    check_status, Caption, DetectedObject, ImageAnalysis, ImageAnalyzer, ReadOperation,
    ReadResult, ReadStatus, ServiceError, Tag, TextReader,
};
use crate::config::VisionConfig;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::instrument;

const API_VERSION: &str = "v3.2";
const VISUAL_FEATURES: &str = "Description,Tags,Objects";
const SERVICE: &str = "Azure Computer Vision";

/// Azure Computer Vision REST client for image analysis and Read OCR.
pub struct AzureVisionClient {
    client: reqwest::Client,
    endpoint: String,
    key: String,
}

impl AzureVisionClient {
    pub fn new(config: &VisionConfig) -> Result<Self, ServiceError> {
        if config.endpoint.is_empty() || config.key.is_empty() {
            return Err(ServiceError::Config(
                "vision endpoint and key are required".to_string(),
            ));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            key: config.key.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/vision/{}/{}", self.endpoint, API_VERSION, path)
    }

    fn post_image(&self, url: String, image: &[u8]) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("Ocp-Apim-Subscription-Key", &self.key)
            .header("Content-Type", "application/octet-stream")
            .body(image.to_vec())
    }
}

#[async_trait]
impl ImageAnalyzer for AzureVisionClient {
    #[instrument(skip(self, image), fields(image_len = image.len()))]
    async fn analyze(&self, image: &[u8]) -> Result<ImageAnalysis, ServiceError> {
        let url = format!("{}?visualFeatures={}", self.url("analyze"), VISUAL_FEATURES);
        let response = self.post_image(url, image).send().await?;
        let response = check_status(SERVICE, response).await?;
        let body: AnalyzeResponse = response.json().await?;
        Ok(body.into())
    }
}

#[async_trait]
impl TextReader for AzureVisionClient {
    #[instrument(skip(self, image), fields(image_len = image.len()))]
    async fn submit(&self, image: &[u8]) -> Result<ReadOperation, ServiceError> {
        let response = self.post_image(self.url("read/analyze"), image).send().await?;
        let response = check_status(SERVICE, response).await?;

        let location = response
            .headers()
            .get("Operation-Location")
            .and_then(|value| value.to_str().ok())
            .ok_or(ServiceError::MissingOperationLocation)?;
        let id = operation_id(location).ok_or(ServiceError::MissingOperationLocation)?;

        tracing::debug!("Submitted read operation {}", id);
        Ok(ReadOperation { id })
    }

    async fn get_result(&self, operation: &ReadOperation) -> Result<ReadResult, ServiceError> {
        let url = self.url(&format!("read/analyzeResults/{}", operation.id));
        let response = self
            .client
            .get(url)
            .header("Ocp-Apim-Subscription-Key", &self.key)
            .send()
            .await?;
        let response = check_status(SERVICE, response).await?;
        let body: ReadResponse = response.json().await?;
        Ok(body.into())
    }
}

/// The operation id is the last path segment of `Operation-Location`.
fn operation_id(location: &str) -> Option<String> {
    location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct AnalyzeResponse {
    description: Option<DescriptionBody>,
    tags: Vec<ScoredName>,
    objects: Vec<ObjectBody>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct DescriptionBody {
    captions: Vec<CaptionBody>,
}

#[derive(Deserialize)]
struct CaptionBody {
    text: String,
    confidence: f64,
}

#[derive(Deserialize)]
struct ScoredName {
    name: String,
    confidence: f64,
}

#[derive(Deserialize)]
struct ObjectBody {
    object: String,
    confidence: f64,
}

impl From<AnalyzeResponse> for ImageAnalysis {
    fn from(body: AnalyzeResponse) -> Self {
        ImageAnalysis {
            captions: body
                .description
                .map(|d| d.captions)
                .unwrap_or_default()
                .into_iter()
                .map(|c| Caption {
                    text: c.text,
                    confidence: c.confidence,
                })
                .collect(),
            tags: body
                .tags
                .into_iter()
                .map(|t| Tag {
                    name: t.name,
                    confidence: t.confidence,
                })
                .collect(),
            objects: body
                .objects
                .into_iter()
                .map(|o| DetectedObject {
                    name: o.object,
                    confidence: o.confidence,
                })
                .collect(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadResponse {
    status: String,
    analyze_result: Option<AnalyzeResultBody>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct AnalyzeResultBody {
    read_results: Vec<ReadPageBody>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ReadPageBody {
    lines: Vec<ReadLineBody>,
}

#[derive(Deserialize)]
struct ReadLineBody {
    text: String,
}

fn parse_status(status: &str) -> ReadStatus {
    match status.to_ascii_lowercase().as_str() {
        "notstarted" => ReadStatus::NotStarted,
        "running" => ReadStatus::Running,
        "succeeded" => ReadStatus::Succeeded,
        _ => ReadStatus::Failed,
    }
}

impl From<ReadResponse> for ReadResult {
    fn from(body: ReadResponse) -> Self {
        let lines = body
            .analyze_result
            .unwrap_or_default()
            .read_results
            .into_iter()
            .flat_map(|page| page.lines)
            .map(|line| line.text)
            .collect();
        ReadResult {
            status: parse_status(&body.status),
            lines,
        }
    }
}
