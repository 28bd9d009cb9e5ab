//! Kokoro TTS engine: text → phonemes → ONNX inference → audio playback.
//!
//! Pipeline:
//! 1. Text → sentences (split on .!?)
//! 2. Sentence → phonemes (misaki-rs G2P)
//! 3. Phonemes → token IDs (tokenizer.json vocabulary)
//! 4. Token IDs + voice style + rate → ONNX inference → f32 audio (24kHz)
//! 5. Audio → rodio Sink on the selected output device
//!
//! Sentences are appended to one sink as they are generated, so playback
//! of the first sentence overlaps generation of the next.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;
use ndarray::{Array2, Array3};
use ndarray_npy::NpzReader;
use ort::value::Tensor;
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, Sink};
use tracing::{debug, info, warn};

use super::{Playback, PlaybackMode, SpeechSynthesizer};
use crate::config::TTSConfig;
use crate::devices;
use crate::error::{Error, Result};

const SAMPLE_RATE: u32 = 24000;
const MAX_TOKENS: usize = 510; // Voice style array first dimension

/// Loaded voice style data: shape (510, 1, 256) f32.
struct VoiceData {
    /// Style vectors indexed by token count. shape: (510, 256)
    styles: Array2<f32>,
}

/// Output stream plus the device index it was opened on.
struct OpenOutput {
    device: Option<usize>,
    stream: OutputStream,
}

pub struct KokoroSynthesizer {
    // ONNX model (Mutex because ort 2.0 Session::run needs &mut)
    session: Mutex<ort::session::Session>,
    phonemizer: misaki_rs::G2P,
    vocab: HashMap<char, i64>,
    voices: HashMap<String, VoiceData>,
    voice: String,

    // Reopened when a different device is requested
    output: Mutex<Option<OpenOutput>>,
}

impl KokoroSynthesizer {
    /// Load the ONNX model, tokenizer, voices and phonemizer.
    /// Blocking; call from spawn_blocking.
    pub fn load(config: &TTSConfig) -> Result<Self> {
        let t0 = Instant::now();
        let paths = ModelPaths::resolve(config);

        info!("Loading tokenizer from {}", paths.tokenizer.display());
        let vocab = load_tokenizer(&paths.tokenizer)?;
        info!("Tokenizer loaded: {} tokens", vocab.len());

        info!("Loading voices from {}", paths.voices.display());
        let voices = load_voices(&paths.voices)?;
        info!("Loaded {} voices", voices.len());

        let voice = if voices.contains_key(&config.voice) {
            config.voice.clone()
        } else {
            let mut names: Vec<&String> = voices.keys().collect();
            names.sort();
            let fallback = names
                .first()
                .map(|n| (*n).clone())
                .ok_or_else(|| Error::SynthesisFailure("voices file is empty".into()))?;
            warn!("Unknown voice '{}', using '{fallback}'", config.voice);
            fallback
        };

        info!("Loading ONNX model from {}", paths.model.display());
        let session = ort::session::Session::builder()
            .map_err(|e| load_error("create ONNX session builder", e))?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)
            .map_err(|e| load_error("set optimization level", e))?
            .with_intra_threads(4)
            .map_err(|e| load_error("set thread count", e))?
            .commit_from_file(&paths.model)
            .map_err(|e| load_error("load ONNX model", e))?;

        let phonemizer = misaki_rs::G2P::new(misaki_rs::Language::EnglishUS);

        info!("Kokoro TTS loaded in {}ms (voice: {voice})", t0.elapsed().as_millis());

        Ok(Self {
            session: Mutex::new(session),
            phonemizer,
            vocab,
            voices,
            voice,
            output: Mutex::new(None),
        })
    }

    /// Make sure an output stream is open on `device`.
    fn ensure_output(&self, device: Option<usize>) -> Result<()> {
        let mut output = self
            .output
            .lock()
            .map_err(|_| Error::Audio("output lock poisoned".into()))?;

        if matches!(output.as_ref(), Some(open) if open.device == device) {
            return Ok(());
        }

        // Close the old stream before opening a new one on another device
        *output = None;
        let stream = devices::open_output(device)?;
        info!("Speech output on device {}", device_label(device));
        *output = Some(OpenOutput { device, stream });
        Ok(())
    }

    fn new_sink(&self) -> Result<Sink> {
        let output = self
            .output
            .lock()
            .map_err(|_| Error::Audio("output lock poisoned".into()))?;
        let open = output
            .as_ref()
            .ok_or_else(|| Error::Audio("no audio output stream".into()))?;
        Ok(Sink::connect_new(open.stream.mixer()))
    }

    /// Generate audio samples for a single sentence.
    fn generate_audio(&self, text: &str, rate: f32) -> Result<Vec<f32>> {
        // 1. Text → phonemes via misaki-rs G2P
        let (phonemes, _tokens) = self
            .phonemizer
            .g2p(text)
            .map_err(|e| Error::SynthesisFailure(format!("Phonemization failed: {e}")))?;

        if phonemes.is_empty() {
            return Ok(Vec::new());
        }

        // 2. Phonemes → token IDs, unknown characters skipped
        let mut token_ids: Vec<i64> = Vec::with_capacity(phonemes.len() + 2);
        token_ids.push(0);
        token_ids.extend(phonemes.chars().filter_map(|ch| self.vocab.get(&ch).copied()));
        token_ids.push(0);

        let n_tokens = token_ids.len().min(MAX_TOKENS);
        token_ids.truncate(n_tokens);

        // 3. Voice style vector for this token count
        let voice_data = self
            .voices
            .get(&self.voice)
            .ok_or_else(|| Error::SynthesisFailure(format!("Voice not found: {}", self.voice)))?;
        let style_idx = (n_tokens.saturating_sub(2)).min(voice_data.styles.nrows().saturating_sub(1));
        let style_vec: Vec<f32> = voice_data.styles.row(style_idx).to_vec();

        // 4. ONNX input tensors
        let tokens_tensor = Array2::from_shape_vec((1, n_tokens), token_ids)
            .map_err(|e| Error::SynthesisFailure(format!("Bad tokens shape: {e}")))
            .and_then(|a| tensor(Tensor::from_array(a)))?;
        let style_tensor = Array2::from_shape_vec((1, 256), style_vec)
            .map_err(|e| Error::SynthesisFailure(format!("Bad style shape: {e}")))
            .and_then(|a| tensor(Tensor::from_array(a)))?;
        let speed_tensor = tensor(Tensor::from_array(ndarray::Array1::from_vec(vec![rate])))?;

        // 5. Inference
        let mut session = self
            .session
            .lock()
            .map_err(|_| Error::SynthesisFailure("session lock poisoned".into()))?;
        let outputs = session
            .run(ort::inputs![
                "tokens" => tokens_tensor,
                "style" => style_tensor,
                "speed" => speed_tensor
            ])
            .map_err(|e| Error::SynthesisFailure(format!("ONNX inference failed: {e}")))?;

        // 6. First output tensor holds the waveform
        let first_output = outputs
            .iter()
            .next()
            .ok_or_else(|| Error::SynthesisFailure("No output tensor from model".into()))?;
        let (_shape, audio_slice) = first_output
            .1
            .try_extract_tensor::<f32>()
            .map_err(|e| Error::SynthesisFailure(format!("Failed to extract audio: {e}")))?;

        let samples: Vec<f32> = audio_slice.to_vec();
        debug!(
            "Generated {} samples ({:.1}s)",
            samples.len(),
            samples.len() as f32 / SAMPLE_RATE as f32
        );
        Ok(samples)
    }
}

#[async_trait]
impl SpeechSynthesizer for KokoroSynthesizer {
    async fn synthesize_and_play(
        &self,
        text: &str,
        playback: &Playback,
        mode: PlaybackMode,
    ) -> Result<()> {
        let sentences = split_sentences(text.trim());
        if sentences.is_empty() {
            warn!("Empty text, nothing to say");
            return Ok(());
        }

        self.ensure_output(playback.device)?;
        let sink = self.new_sink()?;
        sink.set_volume(playback.volume);

        let t0 = Instant::now();
        let mut queued = 0;
        for (i, sentence) in sentences.iter().enumerate() {
            match self.generate_audio(sentence, playback.rate) {
                Ok(samples) if samples.is_empty() => {}
                Ok(samples) => {
                    sink.append(SamplesBuffer::new(1, SAMPLE_RATE, samples));
                    queued += 1;
                }
                Err(e) => warn!("TTS generation failed for sentence {}: {e}", i + 1),
            }
        }

        if queued == 0 {
            return Err(Error::SynthesisFailure("no audio generated".into()));
        }
        debug!("Queued {queued}/{} sentences in {}ms", sentences.len(), t0.elapsed().as_millis());

        match mode {
            PlaybackMode::Detached => {
                sink.detach();
            }
            PlaybackMode::Blocking => {
                tokio::task::spawn_blocking(move || sink.sleep_until_end())
                    .await
                    .map_err(|e| Error::SynthesisFailure(format!("playback task failed: {e}")))?;
                debug!("Speech finished after {:.1}s", t0.elapsed().as_secs_f64());
            }
        }
        Ok(())
    }
}

// --- Helper functions ---

fn tensor<T, E: std::fmt::Display>(result: std::result::Result<T, E>) -> Result<T> {
    result.map_err(|e| Error::SynthesisFailure(format!("Failed to create tensor: {e}")))
}

fn load_error(step: &str, e: impl std::fmt::Display) -> Error {
    Error::SynthesisFailure(format!("Failed to {step}: {e}"))
}

fn device_label(device: Option<usize>) -> String {
    device.map_or_else(|| "default".to_string(), |d| d.to_string())
}

struct ModelPaths {
    model: PathBuf,
    voices: PathBuf,
    tokenizer: PathBuf,
}

impl ModelPaths {
    /// Empty config entries mean "next to the working directory".
    fn resolve(config: &TTSConfig) -> Self {
        let base_dir = std::env::current_dir().unwrap_or_default();
        let pick = |configured: &str, default: &str| {
            if configured.is_empty() {
                base_dir.join(default)
            } else {
                PathBuf::from(configured)
            }
        };

        Self {
            model: pick(&config.model_path, "kokoro-v1.0.onnx"),
            voices: pick(&config.voices_path, "voices-v1.0.bin"),
            tokenizer: pick(&config.tokenizer_path, "tokenizer.json"),
        }
    }
}

/// Load tokenizer vocabulary from tokenizer.json.
fn load_tokenizer(path: &Path) -> Result<HashMap<char, i64>> {
    let contents = fs::read_to_string(path)
        .map_err(|e| Error::SynthesisFailure(format!("Failed to read tokenizer: {e}")))?;
    let data: serde_json::Value = serde_json::from_str(&contents)?;

    let vocab = data["model"]["vocab"]
        .as_object()
        .ok_or_else(|| Error::SynthesisFailure("Missing model.vocab in tokenizer.json".into()))?;

    let mut map = HashMap::new();
    for (token, id) in vocab {
        let id = id
            .as_i64()
            .ok_or_else(|| Error::SynthesisFailure("Token ID is not an integer".into()))?;
        // Each token should be a single character
        if let Some(ch) = token.chars().next() {
            map.insert(ch, id);
        }
    }
    Ok(map)
}

/// Load all voice styles from an NPZ file.
fn load_voices(path: &Path) -> Result<HashMap<String, VoiceData>> {
    let file = fs::File::open(path)
        .map_err(|e| Error::SynthesisFailure(format!("Failed to open voices file: {e}")))?;
    let mut npz = NpzReader::new(file)
        .map_err(|e| Error::SynthesisFailure(format!("Failed to read NPZ voices file: {e}")))?;

    let names: Vec<String> = npz
        .names()
        .map_err(|e| Error::SynthesisFailure(format!("Failed to list NPZ entries: {e}")))?
        .into_iter()
        .map(|n| n.trim_end_matches(".npy").to_string())
        .collect();

    let mut voices = HashMap::new();
    for name in names {
        let arr: Array3<f32> = npz
            .by_name(&format!("{name}.npy"))
            .map_err(|e| Error::SynthesisFailure(format!("Failed to read voice '{name}': {e}")))?;

        // (510, 1, 256) → (510, 256)
        let (dim0, dim2) = (arr.shape()[0], arr.shape()[2]);
        let styles = arr
            .into_shape_with_order((dim0, dim2))
            .map_err(|e| Error::SynthesisFailure(format!("Failed to reshape voice '{name}': {e}")))?;

        voices.insert(name, VoiceData { styles });
    }
    Ok(voices)
}

/// Split text into sentences at .!? followed by whitespace.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();

    for (i, &b) in bytes.iter().enumerate() {
        if (b == b'.' || b == b'!' || b == b'?')
            && i + 1 < bytes.len()
            && bytes[i + 1].is_ascii_whitespace()
        {
            let end = i + 1;
            let s = text[start..end].trim();
            if !s.is_empty() {
                sentences.push(s);
            }
            start = end;
        }
    }

    let s = text[start..].trim();
    if !s.is_empty() {
        sentences.push(s);
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_sentences() {
        assert_eq!(
            split_sentences("Hai! Agora são 15:30. Tudo bem?"),
            vec!["Hai!", "Agora são 15:30.", "Tudo bem?"]
        );
    }

    #[test]
    fn test_split_keeps_decimal_points() {
        assert_eq!(split_sentences("Custa 3.50 reais"), vec!["Custa 3.50 reais"]);
    }

    #[test]
    fn test_split_empty() {
        assert!(split_sentences("   ").is_empty());
    }
}
