//! Utterance capture with cpal.
//!
//! Each capture opens the input stream, waits for speech to start, keeps
//! recording until enough silence follows it (or the phrase limit is hit)
//! and closes the stream again. Captures 16kHz mono f32 audio suitable for
//! Whisper. All calls block; run them on a blocking thread.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::{AudioConfig, SilenceConfig};
use crate::devices;
use crate::error::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Audio kept from just before speech starts, so the first syllable
/// isn't clipped.
const PRE_ROLL_SECS: f64 = 0.3;

/// Ambient level is multiplied by this to get the speech threshold.
const AMBIENT_FACTOR: f32 = 1.5;

/// Extra time past the longest possible utterance before a capture is
/// declared stalled.
const STALL_MARGIN: Duration = Duration::from_secs(2);

/// What the polling thread makes of the capture so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureProgress {
    Waiting,
    Complete,
    NoSpeech,
    /// Speech started but the stream stopped delivering audio.
    Stalled,
}

#[derive(Debug, Clone)]
pub struct AudioRecorder {
    config: AudioConfig,
    silence: SilenceConfig,
    /// Speech threshold, raised by calibration in noisy rooms.
    threshold: f32,
}

/// Shared between the audio callback thread and the polling thread.
struct CaptureState {
    pre_roll: VecDeque<f32>,
    pre_roll_len: usize,
    buffer: Vec<f32>,
    speech_start: Option<Instant>,
    silence_start: Option<Instant>,
    done: bool,
}

impl AudioRecorder {
    pub fn new(config: AudioConfig, silence: SilenceConfig) -> Self {
        let threshold = silence.threshold;
        Self {
            config,
            silence,
            threshold,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    /// Sample background noise and raise the speech threshold above it.
    /// Never lowers the configured threshold.
    pub fn calibrate(&mut self, device: Option<usize>, duration: Duration) -> Result<f32> {
        info!("Adjusting for ambient noise...");
        let samples = Arc::new(Mutex::new(Vec::<f32>::new()));
        let sink = Arc::clone(&samples);

        let stream = self.open_stream(device, move |data| {
            if let Ok(mut buf) = sink.lock() {
                buf.extend_from_slice(data);
            }
        })?;
        std::thread::sleep(duration);
        drop(stream);

        let ambient = samples.lock().map(|s| rms_energy(&s)).unwrap_or(0.0);
        self.threshold = (ambient * AMBIENT_FACTOR).max(self.silence.threshold);
        info!("Ambient RMS {ambient:.4}, speech threshold set to {:.4}", self.threshold);
        Ok(self.threshold)
    }

    /// Longest a capture may run before it is abandoned.
    fn capture_deadline(&self, timeout: Duration, max_phrase: Duration) -> Duration {
        let silence = Duration::try_from_secs_f64(self.silence.duration).unwrap_or(Duration::ZERO);
        timeout
            .saturating_add(max_phrase)
            .saturating_add(silence)
            .saturating_add(STALL_MARGIN)
    }

    /// Record one utterance.
    ///
    /// Returns `Ok(None)` if nobody started speaking within `timeout`, and
    /// an audio error if the device goes quiet mid-utterance.
    pub fn capture(
        &self,
        device: Option<usize>,
        timeout: Duration,
        max_phrase: Duration,
    ) -> Result<Option<Vec<f32>>> {
        let pre_roll_len = (PRE_ROLL_SECS * self.config.sample_rate as f64) as usize;
        let state = Arc::new(Mutex::new(CaptureState {
            pre_roll: VecDeque::with_capacity(pre_roll_len),
            pre_roll_len,
            buffer: Vec::new(),
            speech_start: None,
            silence_start: None,
            done: false,
        }));

        let shared = Arc::clone(&state);
        let threshold = self.threshold;
        let silence_duration = self.silence.duration;
        let min_speech = self.silence.min_speech_duration;
        let max_phrase_secs = max_phrase.as_secs_f64();

        let stream = self.open_stream(device, move |data| {
            let Ok(mut inner) = shared.lock() else {
                return;
            };
            if inner.done {
                return;
            }

            let is_speech = rms_energy(data) >= threshold;

            let Some(speech_start) = inner.speech_start else {
                if is_speech {
                    debug!("Speech started");
                    let pre_roll: Vec<f32> = inner.pre_roll.drain(..).collect();
                    inner.buffer.extend_from_slice(&pre_roll);
                    inner.buffer.extend_from_slice(data);
                    inner.speech_start = Some(Instant::now());
                } else {
                    inner.pre_roll.extend(data.iter().copied());
                    let excess = inner.pre_roll.len().saturating_sub(inner.pre_roll_len);
                    inner.pre_roll.drain(..excess);
                }
                return;
            };

            inner.buffer.extend_from_slice(data);
            let elapsed = speech_start.elapsed().as_secs_f64();

            if elapsed >= max_phrase_secs {
                debug!("Phrase limit reached ({max_phrase_secs}s)");
                inner.done = true;
                return;
            }

            if is_speech {
                inner.silence_start = None;
            } else if elapsed >= min_speech {
                let silence_start = *inner.silence_start.get_or_insert_with(Instant::now);
                if silence_start.elapsed().as_secs_f64() >= silence_duration {
                    debug!("Silence for {silence_duration}s, utterance complete");
                    inner.done = true;
                }
            }
        })?;

        let deadline = self.capture_deadline(timeout, max_phrase);
        let t0 = Instant::now();
        loop {
            std::thread::sleep(POLL_INTERVAL);
            let progress = {
                let inner = state
                    .lock()
                    .map_err(|_| Error::Audio("capture state poisoned".into()))?;
                check_progress(&inner, t0.elapsed(), timeout, deadline)
            };
            match progress {
                CaptureProgress::Waiting => {}
                CaptureProgress::Complete => break,
                CaptureProgress::NoSpeech => {
                    drop(stream);
                    debug!("No speech within {:.0}s", timeout.as_secs_f64());
                    return Ok(None);
                }
                CaptureProgress::Stalled => {
                    drop(stream);
                    warn!("Input stream stalled after {:.0}s", deadline.as_secs_f64());
                    return Err(Error::Audio(
                        "input stream stopped delivering audio".into(),
                    ));
                }
            }
        }
        drop(stream);

        let samples = state
            .lock()
            .map(|mut inner| std::mem::take(&mut inner.buffer))
            .map_err(|_| Error::Audio("capture state poisoned".into()))?;
        let duration = samples.len() as f64 / self.config.sample_rate as f64;
        info!("Captured {duration:.1}s of audio ({} samples)", samples.len());

        if self.config.save_last_capture {
            self.save_wav(&samples, Path::new("/tmp/mirai-last-capture.wav"));
        }
        Ok(Some(samples))
    }

    fn open_stream<F>(&self, device: Option<usize>, mut on_data: F) -> Result<cpal::Stream>
    where
        F: FnMut(&[f32]) + Send + 'static,
    {
        let device = devices::input_device(device)?;
        debug!(
            "Using input device: {}",
            device.name().unwrap_or_else(|_| "unknown".into())
        );

        let stream_config = StreamConfig {
            channels: self.config.channels,
            sample_rate: SampleRate(self.config.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(self.config.chunk_size),
        };

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| on_data(data),
                move |err| {
                    warn!("Audio stream error: {err}");
                },
                None,
            )
            .map_err(|e| Error::Audio(format!("Failed to build input stream: {e}")))?;

        stream
            .play()
            .map_err(|e| Error::Audio(format!("Failed to start audio stream: {e}")))?;
        Ok(stream)
    }

    /// Save audio samples to a WAV file for debugging the recognizer.
    fn save_wav(&self, samples: &[f32], path: &Path) {
        let spec = hound::WavSpec {
            channels: self.config.channels,
            sample_rate: self.config.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        match hound::WavWriter::create(path, spec) {
            Ok(mut writer) => {
                for &sample in samples {
                    // f32 [-1, 1] → i16
                    let s = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
                    if writer.write_sample(s).is_err() {
                        break;
                    }
                }
                if writer.finalize().is_ok() {
                    debug!("Saved WAV to {}", path.display());
                }
            }
            Err(e) => {
                warn!("Failed to save WAV: {e}");
            }
        }
    }
}

fn check_progress(
    state: &CaptureState,
    waited: Duration,
    timeout: Duration,
    deadline: Duration,
) -> CaptureProgress {
    if state.done {
        CaptureProgress::Complete
    } else if state.speech_start.is_none() && waited >= timeout {
        CaptureProgress::NoSpeech
    } else if waited >= deadline {
        CaptureProgress::Stalled
    } else {
        CaptureProgress::Waiting
    }
}

/// Check if audio data is silent.
pub fn is_silent(samples: &[f32], threshold: f32) -> bool {
    let rms = rms_energy(samples);
    debug!("Audio RMS energy: {rms:.4} (threshold: {threshold})");
    rms < threshold
}

/// Calculate RMS energy of audio samples.
fn rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}
