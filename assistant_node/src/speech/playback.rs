//! Speaker playback of synthesized WAV audio.

use super::SpeechError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use parking_lot::Mutex;
use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Decoded mono PCM, normalized to [-1.0, 1.0].
#[derive(Debug, Clone, PartialEq)]
pub struct Pcm {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Pcm {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }
}

/// Decodes WAV bytes, averaging channels down to mono.
pub fn decode_wav(bytes: &[u8]) -> Result<Pcm, SpeechError> {
    let reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.into_samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|s| s as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };

    let samples = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();

    Ok(Pcm {
        samples,
        sample_rate: spec.sample_rate,
    })
}

struct PlaybackState {
    samples: Vec<f32>,
    position: usize,
    finished: bool,
}

/// Plays PCM on the default output device. Blocks until playback ends.
pub fn play_blocking(pcm: Pcm) -> Result<(), SpeechError> {
    if pcm.samples.is_empty() {
        return Ok(());
    }

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| SpeechError::Audio("no output device available".to_string()))?;

    let rate = SampleRate(pcm.sample_rate);
    let supports = |channels: u16| {
        device.supported_output_configs().ok().and_then(|mut configs| {
            configs.find(|c| {
                c.channels() == channels && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
            })
        })
    };
    let config: StreamConfig = supports(1)
        .or_else(|| supports(2))
        .ok_or_else(|| SpeechError::Audio("no suitable output config found".to_string()))?
        .with_sample_rate(rate)
        .config();
    let channels = usize::from(config.channels);

    let duration = pcm.duration();
    let state = Arc::new(Mutex::new(PlaybackState {
        samples: pcm.samples,
        position: 0,
        finished: false,
    }));

    let callback_state = Arc::clone(&state);
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut guard = callback_state.lock();
                let state = &mut *guard;
                for frame in data.chunks_mut(channels) {
                    let sample = if state.position < state.samples.len() {
                        let sample = state.samples[state.position];
                        state.position += 1;
                        sample
                    } else {
                        state.finished = true;
                        0.0
                    };
                    frame.iter_mut().for_each(|out| *out = sample);
                }
            },
            |err| tracing::error!("Audio playback error: {}", err),
            None,
        )
        .map_err(|e| SpeechError::Audio(e.to_string()))?;
    stream
        .play()
        .map_err(|e| SpeechError::Audio(e.to_string()))?;

    let started = Instant::now();
    let limit = duration + Duration::from_millis(500);
    while !state.lock().finished {
        if started.elapsed() > limit {
            tracing::warn!("Playback did not report completion after {:?}", limit);
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    drop(stream);
    tracing::debug!("Playback complete after {:?}", started.elapsed());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav(channels: u16, samples: &[i16]) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 24_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &s in samples {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_decode_mono() {
        let pcm = decode_wav(&wav(1, &[0, 16384, -32768])).unwrap();
        assert_eq!(pcm.sample_rate, 24_000);
        assert_eq!(pcm.samples, vec![0.0, 0.5, -1.0]);
    }

    #[test]
    fn test_decode_stereo_downmixes() {
        let pcm = decode_wav(&wav(2, &[16384, 0, -16384, -16384])).unwrap();
        assert_eq!(pcm.samples, vec![0.25, -0.5]);
    }

    #[test]
    fn test_duration() {
        let pcm = Pcm {
            samples: vec![0.0; 12_000],
            sample_rate: 24_000,
        };
        assert_eq!(pcm.duration(), Duration::from_millis(500));
    }

    #[test]
    fn test_rejects_non_wav() {
        assert!(matches!(decode_wav(b"RIFX garbage"), Err(SpeechError::Wav(_))));
    }

    #[test]
    fn test_empty_playback_is_noop() {
        let pcm = Pcm {
            samples: vec![],
            sample_rate: 24_000,
        };
        assert!(play_blocking(pcm).is_ok());
    }
}
