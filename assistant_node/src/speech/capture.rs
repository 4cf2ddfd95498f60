//! Microphone capture with energy-based end of utterance.

use super::SpeechError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use std::sync::mpsc;
use std::time::Duration;

pub const SAMPLE_RATE: u32 = 16_000;

/// RMS level above which a chunk counts as speech.
const SPEECH_THRESHOLD: f32 = 0.02;

#[derive(Debug, Clone, Copy)]
pub struct CaptureSettings {
    pub max_utterance: Duration,
    pub trailing_silence: Duration,
}

/// Decides when an utterance is over: after `trailing_silence` of quiet that
/// follows some speech, or once `max_utterance` of audio has been seen.
#[derive(Debug)]
pub struct Endpointer {
    threshold: f32,
    trailing_silence_samples: usize,
    max_samples: usize,
    heard_speech: bool,
    silence_run: usize,
    total: usize,
}

impl Endpointer {
    pub fn new(settings: CaptureSettings, sample_rate: u32) -> Self {
        Self {
            threshold: SPEECH_THRESHOLD,
            trailing_silence_samples: samples_for(settings.trailing_silence, sample_rate),
            max_samples: samples_for(settings.max_utterance, sample_rate),
            heard_speech: false,
            silence_run: 0,
            total: 0,
        }
    }

    /// Feeds one chunk; returns `true` once the utterance is complete.
    pub fn push(&mut self, chunk: &[f32]) -> bool {
        self.total += chunk.len();
        if rms(chunk) >= self.threshold {
            self.heard_speech = true;
            self.silence_run = 0;
        } else if self.heard_speech {
            self.silence_run += chunk.len();
        }

        (self.heard_speech && self.silence_run >= self.trailing_silence_samples)
            || self.total >= self.max_samples
    }

    pub fn heard_speech(&self) -> bool {
        self.heard_speech
    }
}

fn samples_for(duration: Duration, sample_rate: u32) -> usize {
    (duration.as_secs_f64() * f64::from(sample_rate)) as usize
}

fn rms(chunk: &[f32]) -> f32 {
    if chunk.is_empty() {
        return 0.0;
    }
    let sum: f32 = chunk.iter().map(|s| s * s).sum();
    (sum / chunk.len() as f32).sqrt()
}

/// Records one utterance from the default input device. Blocks the calling
/// thread. Returns `None` when nothing louder than background noise was heard.
pub fn record_utterance(settings: CaptureSettings) -> Result<Option<Vec<f32>>, SpeechError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| SpeechError::Audio("no input device available".to_string()))?;

    let config: StreamConfig = device
        .supported_input_configs()
        .map_err(|e| SpeechError::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        })
        .ok_or_else(|| SpeechError::Audio("no suitable input config found".to_string()))?
        .with_sample_rate(SampleRate(SAMPLE_RATE))
        .config();

    let (tx, rx) = mpsc::channel::<Vec<f32>>();
    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let _ = tx.send(data.to_vec());
            },
            |err| tracing::error!("Audio capture error: {}", err),
            None,
        )
        .map_err(|e| SpeechError::Audio(e.to_string()))?;
    stream
        .play()
        .map_err(|e| SpeechError::Audio(e.to_string()))?;

    let mut endpointer = Endpointer::new(settings, SAMPLE_RATE);
    let mut samples = Vec::new();
    let deadline = std::time::Instant::now() + settings.max_utterance + Duration::from_secs(1);

    while std::time::Instant::now() < deadline {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(chunk) => {
                samples.extend_from_slice(&chunk);
                if endpointer.push(&chunk) {
                    break;
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    drop(stream);

    tracing::debug!(
        "Captured {} samples, speech heard: {}",
        samples.len(),
        endpointer.heard_speech()
    );
    Ok(endpointer.heard_speech().then_some(samples))
}

/// Encodes mono f32 samples as 16-bit PCM WAV.
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, SpeechError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            let sample = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}
