use crate::{
    config::VoiceConfig,
    services::ResponseGenerator,
    signal::{PauseGuard, SharedSignal},
    speech::{speak_logged, CancellationReason, Recognition, SpeechRecognizer, SpeechSynthesizer},
    telemetry::Metrics,
};
use std::sync::Arc;
use tokio::{
    sync::broadcast,
    time::{sleep, Duration},
};

/// Pause after a recognizer error before listening again.
const RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionOutcome {
    Answered,
    NoQuestion,
    NoResponse,
}

impl InteractionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionOutcome::Answered => "answered",
            InteractionOutcome::NoQuestion => "no_question",
            InteractionOutcome::NoResponse => "no_response",
        }
    }
}

/// Wake word, question, answer. Vision narration is paused for the whole
/// interaction and resumes on every exit path.
pub struct VoiceAssistant {
    recognizer: Arc<dyn SpeechRecognizer>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    generator: Arc<dyn ResponseGenerator>,
    signal: SharedSignal,
    metrics: Arc<Metrics>,
    wake_word: String,
    acknowledgement: String,
}

impl VoiceAssistant {
    pub fn new(
        recognizer: Arc<dyn SpeechRecognizer>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        generator: Arc<dyn ResponseGenerator>,
        signal: SharedSignal,
        metrics: Arc<Metrics>,
        config: &VoiceConfig,
    ) -> Self {
        Self {
            recognizer,
            synthesizer,
            generator,
            signal,
            metrics,
            wake_word: normalize_phrase(&config.wake_word),
            acknowledgement: config.acknowledgement.clone(),
        }
    }

    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        tracing::info!("Listening for the wake word...");
        loop {
            tokio::select! {
                outcome = self.run_interaction() => {
                    tracing::debug!("Voice interaction finished: {}", outcome.as_str());
                    self.metrics.record_voice_interaction(outcome.as_str());
                }
                _ = shutdown_rx.recv() => break,
            }
        }
        tracing::info!("Voice assistant stopped");
    }

    /// One full cycle. The pause guard lives until this returns, so the
    /// signal is cleared after the answer is spoken or on any early exit.
    pub async fn run_interaction(&self) -> InteractionOutcome {
        let _pause = self.wait_for_wake_word().await;

        let Some(question) = self
            .capture_question()
            .await
            .filter(|question| !question.trim().is_empty())
        else {
            return InteractionOutcome::NoQuestion;
        };

        let Some(answer) = self.query(&question).await else {
            return InteractionOutcome::NoResponse;
        };

        speak_logged(self.synthesizer.as_ref(), &answer).await;
        InteractionOutcome::Answered
    }

    /// Blocks until the wake word is heard, then pauses narration and
    /// acknowledges.
    async fn wait_for_wake_word(&self) -> PauseGuard {
        loop {
            tracing::debug!("Say something...");
            match self.recognizer.recognize_once().await {
                Ok(Recognition::Recognized(text)) => {
                    let phrase = normalize_phrase(&text);
                    tracing::info!("You said: {}", phrase);
                    if phrase.contains(&self.wake_word) {
                        let guard = self.signal.pause_guard();
                        tracing::info!("Wake word detected!");
                        speak_logged(self.synthesizer.as_ref(), &self.acknowledgement).await;
                        return guard;
                    }
                }
                Ok(Recognition::NoMatch) => tracing::debug!("No speech could be recognized."),
                Ok(Recognition::Canceled { reason, details }) => {
                    log_cancellation(reason, &details);
                    sleep(RETRY_DELAY).await;
                }
                Err(e) => {
                    tracing::error!("Speech recognition failed: {}", e);
                    sleep(RETRY_DELAY).await;
                }
            }
        }
    }

    async fn capture_question(&self) -> Option<String> {
        tracing::info!("Listening for your question...");
        match self.recognizer.recognize_once().await {
            Ok(Recognition::Recognized(text)) => {
                tracing::info!("You asked: {}", text);
                Some(text)
            }
            Ok(Recognition::NoMatch) => {
                tracing::info!("No speech could be recognized.");
                None
            }
            Ok(Recognition::Canceled { reason, details }) => {
                log_cancellation(reason, &details);
                None
            }
            Err(e) => {
                tracing::error!("Speech recognition failed: {}", e);
                None
            }
        }
    }

    async fn query(&self, question: &str) -> Option<String> {
        match self.generator.generate(question).await {
            Ok(answer) => Some(answer),
            Err(e) => {
                tracing::error!("Error getting AI response: {}", e);
                None
            }
        }
    }
}

fn log_cancellation(reason: CancellationReason, details: &str) {
    tracing::warn!("Recognition canceled: {}", reason);
    if reason == CancellationReason::Error {
        tracing::warn!("Error details: {}", details);
    }
}

/// Lower-cases and drops punctuation so "Hi, my sign." matches "hi my sign".
fn normalize_phrase(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
