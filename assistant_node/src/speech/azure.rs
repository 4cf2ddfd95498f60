use super::{
    capture::{self, CaptureSettings},
    playback, CancellationReason, Recognition, SpeechError, SpeechRecognizer, SpeechSynthesizer,
    SynthesisOutcome,
};
use crate::config::SpeechConfig;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::instrument;

const OUTPUT_FORMAT: &str = "riff-24khz-16bit-mono-pcm";

/// Azure Speech over REST: short-audio recognition and neural TTS.
pub struct AzureSpeech {
    client: reqwest::Client,
    key: String,
    region: String,
    voice_name: String,
    language: String,
    capture: CaptureSettings,
}

impl AzureSpeech {
    pub fn new(config: &SpeechConfig) -> Result<Self, SpeechError> {
        if config.key.is_empty() || config.region.is_empty() {
            return Err(SpeechError::Config(
                "speech key and region are required".to_string(),
            ));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            key: config.key.clone(),
            region: config.region.clone(),
            voice_name: config.voice_name.clone(),
            language: config.language.clone(),
            capture: CaptureSettings {
                max_utterance: Duration::from_millis(config.max_utterance_ms),
                trailing_silence: Duration::from_millis(config.trailing_silence_ms),
            },
        })
    }

    fn recognition_url(&self) -> String {
        format!(
            "https://{}.stt.speech.microsoft.com/speech/recognition/conversation/cognitiveservices/v1?language={}&format=simple",
            self.region, self.language
        )
    }

    fn synthesis_url(&self) -> String {
        format!(
            "https://{}.tts.speech.microsoft.com/cognitiveservices/v1",
            self.region
        )
    }

    fn ssml(&self, text: &str) -> String {
        format!(
            "<speak version='1.0' xml:lang='{}'><voice name='{}'>{}</voice></speak>",
            self.language,
            self.voice_name,
            escape_xml(text)
        )
    }

    async fn transcribe(&self, wav: Vec<u8>) -> Result<Recognition, SpeechError> {
        let response = self
            .client
            .post(self.recognition_url())
            .header("Ocp-Apim-Subscription-Key", &self.key)
            .header(
                "Content-Type",
                format!("audio/wav; codecs=audio/pcm; samplerate={}", capture::SAMPLE_RATE),
            )
            .header("Accept", "application/json")
            .body(wav)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Ok(Recognition::Canceled {
                reason: CancellationReason::Error,
                details: format!("{}: {}", status, body),
            });
        }

        let body: RecognitionResponse = response.json().await?;
        Ok(body.into())
    }
}

#[async_trait]
impl SpeechRecognizer for AzureSpeech {
    #[instrument(skip(self))]
    async fn recognize_once(&self) -> Result<Recognition, SpeechError> {
        let settings = self.capture;
        let samples = tokio::task::spawn_blocking(move || capture::record_utterance(settings)).await??;

        let Some(samples) = samples else {
            return Ok(Recognition::NoMatch);
        };
        let wav = capture::samples_to_wav(&samples, capture::SAMPLE_RATE)?;
        self.transcribe(wav).await
    }
}

#[async_trait]
impl SpeechSynthesizer for AzureSpeech {
    #[instrument(skip(self))]
    async fn speak(&self, text: &str) -> Result<SynthesisOutcome, SpeechError> {
        let response = self
            .client
            .post(self.synthesis_url())
            .header("Ocp-Apim-Subscription-Key", &self.key)
            .header("Content-Type", "application/ssml+xml")
            .header("X-Microsoft-OutputFormat", OUTPUT_FORMAT)
            .header("User-Agent", "assistant_node")
            .body(self.ssml(text))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Ok(SynthesisOutcome::Canceled {
                reason: CancellationReason::Error,
                details: format!("{}: {}", status, body),
            });
        }

        let audio = response.bytes().await?;
        let pcm = playback::decode_wav(&audio)?;
        tokio::task::spawn_blocking(move || playback::play_blocking(pcm)).await??;

        Ok(SynthesisOutcome::Completed)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RecognitionResponse {
    recognition_status: String,
    #[serde(default)]
    display_text: String,
}

impl From<RecognitionResponse> for Recognition {
    fn from(body: RecognitionResponse) -> Self {
        match body.recognition_status.as_str() {
            "Success" if !body.display_text.trim().is_empty() => {
                Recognition::Recognized(body.display_text)
            }
            "Success" | "NoMatch" | "InitialSilenceTimeout" | "BabbleTimeout" => {
                Recognition::NoMatch
            }
            "EndOfDictation" => Recognition::Canceled {
                reason: CancellationReason::EndOfStream,
                details: body.recognition_status,
            },
            _ => Recognition::Canceled {
                reason: CancellationReason::Error,
                details: body.recognition_status,
            },
        }
    }
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '\'' => escaped.push_str("&apos;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
