pub mod azure;
pub mod capture;
pub mod playback;

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

pub use azure::AzureSpeech;

#[derive(Error, Debug)]
pub enum SpeechError {
    #[error("Audio device error: {0}")]
    Audio(String),
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Audio task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("Invalid configuration: {0}")]
    Config(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancellationReason {
    Error,
    EndOfStream,
}

impl fmt::Display for CancellationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancellationReason::Error => write!(f, "Error"),
            CancellationReason::EndOfStream => write!(f, "EndOfStream"),
        }
    }
}

/// Outcome of one recognition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recognition {
    Recognized(String),
    NoMatch,
    Canceled {
        reason: CancellationReason,
        details: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisOutcome {
    Completed,
    Canceled {
        reason: CancellationReason,
        details: String,
    },
}

/// Listens for a single utterance and transcribes it.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn recognize_once(&self) -> Result<Recognition, SpeechError>;
}

/// Speaks text and resolves only once playback has finished.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn speak(&self, text: &str) -> Result<SynthesisOutcome, SpeechError>;
}

/// Speaks `text`, logging instead of failing. Returns whether playback completed.
pub async fn speak_logged(synthesizer: &dyn SpeechSynthesizer, text: &str) -> bool {
    match synthesizer.speak(text).await {
        Ok(SynthesisOutcome::Completed) => {
            tracing::debug!("Speech synthesized for: {}", text);
            true
        }
        Ok(SynthesisOutcome::Canceled { reason, details }) => {
            tracing::warn!("Speech synthesis canceled: {}: {}", reason, details);
            false
        }
        Err(e) => {
            tracing::error!("Speech synthesis failed: {}", e);
            false
        }
    }
}
