//! Session configuration.
//!
//! A single YAML document: the session keys (devices, voice, model, wake
//! words) sit at the top level, plumbing sections are nested below them.
//! Missing keys take their defaults, unknown keys are ignored, and a file
//! that cannot be read or parsed falls back to defaults with a warning.
//! Values are validated once, at load time.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::wake_word::normalize_phrase;

pub const VOLUME_RANGE: (f32, f32) = (0.0, 2.0);
pub const RATE_RANGE: (f32, f32) = (0.5, 2.0);
pub const TEMPERATURE_RANGE: (f32, f32) = (0.0, 2.0);

/// Upper bounds, in seconds, for the listening and silence timings.
const MAX_TIMEOUT_SECS: f64 = 300.0;
const MAX_PHRASE_SECS: f64 = 120.0;
const MAX_CALIBRATION_SECS: f64 = 10.0;
const MAX_SILENCE_SECS: f64 = 10.0;

/// Spelling variants of the assistant's name as the recognizer tends to
/// hear it. Longer variants come before "mira" so they win the scan.
const DEFAULT_WAKE_WORDS: &[&str] = &[
    "mirai", "miray", "mirrai", "mirahi", "mírai", "mirá", "mirei", "mirrei", "mir ai", "mír ai",
    "mira",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub host: String,
    pub max_tokens: u32,
    pub top_p: f32,
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:11434".into(),
            max_tokens: 200,
            top_p: 0.9,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Maximum turns kept in conversation history.
    pub history_cap: usize,
    /// Most recent turns sent to the model per request.
    pub context_window: usize,
    /// Replaces the built-in persona preamble when set.
    pub persona: Option<String>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            history_cap: 16,
            context_window: 4,
            persona: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListeningConfig {
    /// Seconds to wait for speech before a capture cycle restarts.
    pub timeout: f64,
    /// Longest single utterance, in seconds.
    pub max_phrase_duration: f64,
    /// Quiet time after our own speech before listening again.
    pub post_speech_pause_ms: u64,
    /// Pause after a failed cycle.
    pub error_backoff_ms: u64,
    /// Ambient noise sampling on mode entry. Zero disables calibration.
    pub calibration_secs: f64,
}

impl Default for ListeningConfig {
    fn default() -> Self {
        Self {
            timeout: 30.0,
            max_phrase_duration: 10.0,
            post_speech_pause_ms: 500,
            error_backoff_ms: 2000,
            calibration_secs: 1.0,
        }
    }
}

impl ListeningConfig {
    pub fn timeout(&self) -> Duration {
        bounded_secs(self.timeout, MAX_TIMEOUT_SECS)
    }

    pub fn max_phrase_duration(&self) -> Duration {
        bounded_secs(self.max_phrase_duration, MAX_PHRASE_SECS)
    }

    pub fn post_speech_pause(&self) -> Duration {
        Duration::from_millis(self.post_speech_pause_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn calibration(&self) -> Duration {
        bounded_secs(self.calibration_secs, MAX_CALIBRATION_SECS)
    }
}

/// Seconds to a `Duration` clamped to [0, max]; NaN counts as zero.
fn bounded_secs(secs: f64, max: f64) -> Duration {
    if secs.is_nan() {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(secs.clamp(0.0, max))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub chunk_size: u32,
    /// Write every captured utterance to /tmp/mirai-last-capture.wav.
    pub save_last_capture: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            chunk_size: 1024,
            save_last_capture: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SilenceConfig {
    /// RMS level separating speech from background.
    pub threshold: f32,
    /// Seconds of silence that end an utterance.
    pub duration: f64,
    pub min_speech_duration: f64,
}

impl Default for SilenceConfig {
    fn default() -> Self {
        Self {
            threshold: 0.01,
            duration: 1.0,
            min_speech_duration: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhisperConfig {
    pub model: String,
    pub language: String,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            model: "small".into(),
            language: "pt".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TTSConfig {
    pub enabled: bool,
    pub voice: String,
    pub model_path: String,
    pub voices_path: String,
    pub tokenizer_path: String,
}

impl Default for TTSConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            voice: "pf_dora".into(),
            model_path: String::new(),
            voices_path: String::new(),
            tokenizer_path: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    pub enabled: bool,
    /// Defaults to ~/.mirai-history
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub synthesis_device: Option<usize>,
    pub capture_device: Option<usize>,
    pub volume: f32,
    pub rate: f32,
    pub model: String,
    pub temperature: f32,
    pub wake_words: Vec<String>,
    pub auto_listen: bool,

    pub ollama: OllamaConfig,
    pub memory: MemoryConfig,
    pub listening: ListeningConfig,
    pub audio: AudioConfig,
    pub silence: SilenceConfig,
    pub whisper: WhisperConfig,
    pub tts: TTSConfig,
    pub journal: JournalConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            synthesis_device: None,
            capture_device: None,
            volume: 1.0,
            rate: 1.1,
            model: "mistral".into(),
            temperature: 1.1,
            wake_words: DEFAULT_WAKE_WORDS.iter().map(|w| (*w).to_string()).collect(),
            auto_listen: false,
            ollama: OllamaConfig::default(),
            memory: MemoryConfig::default(),
            listening: ListeningConfig::default(),
            audio: AudioConfig::default(),
            silence: SilenceConfig::default(),
            whisper: WhisperConfig::default(),
            tts: TTSConfig::default(),
            journal: JournalConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Parse a YAML document and validate it.
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yml::from_str(contents)
            .map_err(|e| Error::ConfigLoadFailure(e.to_string()))?;
        Ok(config.validated())
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yml::to_string(self)?)
    }

    /// Clamp ranges, normalize wake words and fix impossible sizes.
    pub fn validated(mut self) -> Self {
        self.volume = clamp_logged("volume", self.volume, VOLUME_RANGE);
        self.rate = clamp_logged("rate", self.rate, RATE_RANGE);
        self.temperature = clamp_logged("temperature", self.temperature, TEMPERATURE_RANGE);

        let words = normalize_wake_words(&self.wake_words);
        self.wake_words = if words.is_empty() {
            warn!("No usable wake words configured, using defaults");
            Self::default().wake_words
        } else {
            words
        };

        if self.model.trim().is_empty() {
            warn!("Empty model name, using default");
            self.model = Self::default().model;
        }
        if self.memory.history_cap == 0 {
            warn!("memory.history_cap must be at least 1");
            self.memory.history_cap = 1;
        }
        if self.memory.context_window == 0 {
            warn!("memory.context_window must be at least 1");
            self.memory.context_window = 1;
        }
        let listening = ListeningConfig::default();
        let silence = SilenceConfig::default();
        self.listening.timeout = secs_logged(
            "listening.timeout",
            self.listening.timeout,
            listening.timeout,
            MAX_TIMEOUT_SECS,
        );
        self.listening.max_phrase_duration = secs_logged(
            "listening.max_phrase_duration",
            self.listening.max_phrase_duration,
            listening.max_phrase_duration,
            MAX_PHRASE_SECS,
        );
        self.silence.duration = secs_logged(
            "silence.duration",
            self.silence.duration,
            silence.duration,
            MAX_SILENCE_SECS,
        );
        self.silence.min_speech_duration = secs_logged(
            "silence.min_speech_duration",
            self.silence.min_speech_duration,
            silence.min_speech_duration,
            MAX_SILENCE_SECS,
        );
        // Zero is allowed here: it turns calibration off
        let calibration = self.listening.calibration_secs;
        self.listening.calibration_secs = if calibration == 0.0 {
            0.0
        } else {
            secs_logged("listening.calibration_secs", calibration, 0.0, MAX_CALIBRATION_SECS)
        };
        self
    }

    /// Update playback volume and rate, clamped to their ranges.
    pub fn set_voice_settings(&mut self, volume: f32, rate: f32) {
        self.volume = clamp_logged("volume", volume, VOLUME_RANGE);
        self.rate = clamp_logged("rate", rate, RATE_RANGE);
    }

    pub fn set_temperature(&mut self, temperature: f32) {
        self.temperature = clamp_logged("temperature", temperature, TEMPERATURE_RANGE);
    }

    /// Replace the wake words from a comma-separated list.
    /// Returns false (leaving the set untouched) if nothing usable remains.
    pub fn set_wake_words_csv(&mut self, csv: &str) -> bool {
        let words: Vec<String> = csv.split(',').map(str::to_string).collect();
        let words = normalize_wake_words(&words);
        if words.is_empty() {
            return false;
        }
        self.wake_words = words;
        true
    }
}

fn normalize_wake_words(words: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(words.len());
    for word in words {
        let normalized = normalize_phrase(word);
        if !normalized.is_empty() && !out.contains(&normalized) {
            out.push(normalized);
        }
    }
    out
}

fn clamp_logged(name: &str, value: f32, (min, max): (f32, f32)) -> f32 {
    if value.is_nan() {
        warn!("{name} is not a number, using {min}");
        return min;
    }
    let clamped = value.clamp(min, max);
    if clamped != value {
        warn!("{name} {value} out of range [{min}, {max}], using {clamped}");
    }
    clamped
}

/// Keep a duration in seconds within (0, max]. Non-positive or NaN values
/// take `default`, anything larger (infinity included) is capped at `max`.
fn secs_logged(name: &str, value: f64, default: f64, max: f64) -> f64 {
    if !(value > 0.0) {
        warn!("{name} must be positive, using {default}");
        return default;
    }
    if value > max {
        warn!("{name} {value} too large, using {max}");
        return max;
    }
    value
}

/// Where the session config lives on disk.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Pick the config file location.
    ///
    /// An explicit path always wins. Otherwise the first existing file of:
    /// 1. ./mirai.yaml
    /// 2. ~/.config/mirai/config.yaml
    /// 3. /etc/mirai/config.yaml
    ///
    /// If none exists, saves go to ~/.config/mirai/config.yaml.
    pub fn resolve(path: Option<&Path>) -> Self {
        if let Some(path) = path {
            return Self::new(path);
        }

        let user_path = dirs::home_dir().map(|h| h.join(".config/mirai/config.yaml"));
        let candidates = [
            std::env::current_dir().ok().map(|d| d.join("mirai.yaml")),
            user_path.clone(),
            Some(PathBuf::from("/etc/mirai/config.yaml")),
        ];

        match candidates.into_iter().flatten().find(|p| p.exists()) {
            Some(found) => Self::new(found),
            None => Self::new(user_path.unwrap_or_else(|| PathBuf::from("mirai.yaml"))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the config, falling back to defaults on any problem.
    pub fn load(&self) -> SessionConfig {
        if !self.path.exists() {
            info!("No config file at {}, using defaults", self.path.display());
            return SessionConfig::default();
        }

        match self.try_load() {
            Ok(config) => {
                info!("Loaded config from {}", self.path.display());
                config
            }
            Err(e) => {
                warn!("{e} ({}), using defaults", self.path.display());
                SessionConfig::default()
            }
        }
    }

    fn try_load(&self) -> Result<SessionConfig> {
        let contents = std::fs::read_to_string(&self.path)
            .map_err(|e| Error::ConfigLoadFailure(e.to_string()))?;
        SessionConfig::from_yaml_str(&contents)
    }

    /// Persist the config: write a sibling temp file, then rename it over
    /// the target.
    pub fn save(&self, config: &SessionConfig) -> Result<()> {
        let yaml = config.to_yaml_string()?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("yaml.tmp");
        std::fs::write(&tmp, yaml)?;
        std::fs::rename(&tmp, &self.path)?;
        info!("Config saved to {}", self.path.display());
        Ok(())
    }
}
