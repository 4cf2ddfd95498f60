use super::{check_status, ResponseGenerator, ServiceError};
use crate::config::GenerativeConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;

pub const FALLBACK_RESPONSE: &str = "Sorry, I couldn't generate a response.";
const SERVICE: &str = "Gemini";

/// Gemini `generateContent` client with fixed sampling parameters.
pub struct GeminiClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
    temperature: f32,
    max_output_tokens: u32,
}

impl GeminiClient {
    pub fn new(config: &GenerativeConfig) -> Result<Self, ServiceError> {
        if config.api_key.is_empty() {
            return Err(ServiceError::Config(
                "generative API key is required".to_string(),
            ));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            url: format!(
                "{}/models/{}:generateContent",
                config.base_url.trim_end_matches('/'),
                config.model
            ),
            api_key: config.api_key.clone(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        })
    }

    fn request<'a>(&self, prompt: &'a str) -> GenerateRequest<'a> {
        GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
            },
        }
    }
}

#[async_trait]
impl ResponseGenerator for GeminiClient {
    #[instrument(skip(self))]
    async fn generate(&self, prompt: &str) -> Result<String, ServiceError> {
        let response = self
            .client
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request(prompt))
            .send()
            .await?;
        let response = check_status(SERVICE, response).await?;
        let body: GenerateResponse = response.json().await?;

        let text = body.text();
        tracing::info!("AI Assistant: {}", text);
        Ok(text)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct GenerateResponse {
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct CandidateContent {
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct CandidatePart {
    text: String,
}

impl GenerateResponse {
    /// Text of the first candidate, or the fallback sentence when empty.
    fn text(&self) -> String {
        let text: String = self
            .candidates
            .first()
            .map(|c| c.content.parts.iter().map(|p| p.text.as_str()).collect())
            .unwrap_or_default();
        let text = text.trim();
        if text.is_empty() {
            FALLBACK_RESPONSE.to_string()
        } else {
            text.to_string()
        }
    }
}
