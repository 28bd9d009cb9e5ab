//! Speech-to-text: microphone capture + Whisper ASR (whisper.cpp bindings).
//!
//! The controller only sees the [`Transcriber`] trait. [`WhisperListener`]
//! implements it by recording an utterance with [`AudioRecorder`] and
//! running it through a GGML model loaded once at startup.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::config::{SessionConfig, WhisperConfig};
use crate::error::{Error, Result};
use crate::recorder::{is_silent, AudioRecorder};

/// Parameters for one listening attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureRequest {
    pub device: Option<usize>,
    /// How long to wait for speech to start.
    pub timeout: Duration,
    /// Longest utterance accepted.
    pub max_phrase: Duration,
}

impl CaptureRequest {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            device: config.capture_device,
            timeout: config.listening.timeout(),
            max_phrase: config.listening.max_phrase_duration(),
        }
    }
}

#[async_trait]
pub trait Transcriber: Send {
    /// Adjust to the room's background noise before a listening session.
    async fn calibrate(&mut self, _device: Option<usize>, _duration: Duration) -> Result<()> {
        Ok(())
    }

    /// Capture one utterance and return its text.
    ///
    /// `Err(TranscriptionTimeout)` when nobody spoke, and
    /// `Err(TranscriptionFailure)` when the audio could not be recognized.
    async fn capture_and_transcribe(&mut self, request: &CaptureRequest) -> Result<String>;
}

/// Thread-safe wrapper around WhisperContext.
/// WhisperContext is Send+Sync, so we wrap it in Arc for sharing.
#[derive(Clone)]
pub struct WhisperTranscriber {
    ctx: Arc<WhisperContext>,
    language: String,
}

impl WhisperTranscriber {
    /// Load the Whisper GGML model. Blocking.
    pub fn load(config: &WhisperConfig) -> Result<Self> {
        let model_path = find_model(&config.model)?;

        info!("Loading Whisper model from {}", model_path.display());
        let t0 = Instant::now();

        let path = model_path
            .to_str()
            .ok_or_else(|| Error::TranscriptionFailure("model path is not UTF-8".into()))?;
        let ctx = WhisperContext::new_with_params(path, WhisperContextParameters::default())
            .map_err(|e| Error::TranscriptionFailure(format!("Failed to load Whisper model: {e}")))?;

        info!("Whisper model loaded in {}ms", t0.elapsed().as_millis());

        Ok(Self {
            ctx: Arc::new(ctx),
            language: config.language.clone(),
        })
    }

    /// Transcribe mono f32 audio recorded at `sample_rate` to text.
    pub fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String> {
        let t0 = Instant::now();

        let mut state = self
            .ctx
            .create_state()
            .map_err(|e| Error::TranscriptionFailure(format!("Failed to create whisper state: {e}")))?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(Some(&self.language));
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_single_segment(true);
        params.set_token_timestamps(false);

        state
            .full(params, samples)
            .map_err(|e| Error::TranscriptionFailure(format!("Whisper inference failed: {e}")))?;

        // Collect all segments into a single string
        let mut text = String::new();
        for i in 0..state.full_n_segments() {
            if let Some(segment) = state.get_segment(i) {
                if let Ok(segment_text) = segment.to_str_lossy() {
                    let trimmed = segment_text.trim();
                    if !trimmed.is_empty() {
                        if !text.is_empty() {
                            text.push(' ');
                        }
                        text.push_str(trimmed);
                    }
                }
            }
        }

        let latency_ms = t0.elapsed().as_secs_f64() * 1000.0;
        let audio_duration = audio_seconds(samples.len(), sample_rate);
        info!("Transcribed {audio_duration:.1}s audio in {latency_ms:.0}ms: \"{text}\"");

        Ok(text)
    }
}

fn audio_seconds(samples: usize, sample_rate: u32) -> f64 {
    samples as f64 / f64::from(sample_rate.max(1))
}

/// Drop the sentence punctuation Whisper adds at word edges and collapse
/// whitespace, so "Mirai, que horas são?" reads "Mirai que horas são".
/// Marks inside a word ("3.5", "e-mail") are kept.
pub fn clean_transcript(text: &str) -> String {
    text.split_whitespace()
        .map(|word| word.trim_matches(|c: char| matches!(c, ',' | '.' | '!' | '?' | ';' | ':')))
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Find the GGML model file.
fn find_model(model_name: &str) -> Result<PathBuf> {
    // Direct path to an existing file
    let direct = PathBuf::from(model_name);
    if direct.exists() && direct.extension().is_some() {
        return Ok(direct);
    }

    let filenames = [
        format!("ggml-{}.bin", model_name.replace('/', "-")),
        "ggml-small.bin".to_string(),
        "ggml-medium.bin".to_string(),
        "ggml-large-v3-turbo.bin".to_string(),
        "ggml-base.bin".to_string(),
    ];

    let search_dirs: Vec<PathBuf> = [
        std::env::current_dir().ok(),
        std::env::current_dir().ok().map(|d| d.join("models")),
        dirs::home_dir().map(|h| h.join(".cache/whisper")),
    ]
    .into_iter()
    .flatten()
    .collect();

    for dir in &search_dirs {
        for filename in &filenames {
            let path = dir.join(filename);
            if path.exists() {
                return Ok(path);
            }
        }
    }

    Err(Error::TranscriptionFailure(format!(
        "Whisper GGML model not found. Download with:\n  \
         wget https://huggingface.co/ggerganov/whisper.cpp/resolve/main/ggml-small.bin\n\
         Searched in: {search_dirs:?}"
    )))
}

/// Microphone + Whisper.
pub struct WhisperListener {
    recorder: AudioRecorder,
    whisper: WhisperTranscriber,
}

impl WhisperListener {
    pub fn new(recorder: AudioRecorder, whisper: WhisperTranscriber) -> Self {
        Self { recorder, whisper }
    }
}

#[async_trait]
impl Transcriber for WhisperListener {
    async fn calibrate(&mut self, device: Option<usize>, duration: Duration) -> Result<()> {
        if duration.is_zero() {
            return Ok(());
        }
        let mut recorder = self.recorder.clone();
        let recorder = tokio::task::spawn_blocking(move || {
            recorder.calibrate(device, duration).map(|_| recorder)
        })
        .await
        .map_err(|e| Error::Audio(format!("calibration task failed: {e}")))??;
        self.recorder = recorder;
        Ok(())
    }

    async fn capture_and_transcribe(&mut self, request: &CaptureRequest) -> Result<String> {
        let recorder = self.recorder.clone();
        let whisper = self.whisper.clone();
        let request = *request;

        tokio::task::spawn_blocking(move || {
            debug!("Listening... (timeout: {:.0}s)", request.timeout.as_secs_f64());
            let samples = recorder
                .capture(request.device, request.timeout, request.max_phrase)?
                .ok_or(Error::TranscriptionTimeout)?;

            if samples.is_empty() || is_silent(&samples, recorder.threshold()) {
                return Err(Error::TranscriptionFailure("captured audio is silent".into()));
            }
            whisper.transcribe(&samples, recorder.sample_rate())
        })
        .await
        .map_err(|e| Error::TranscriptionFailure(format!("capture task failed: {e}")))?
    }
}
