//! Error types for the assistant.
//!
//! The first group of variants is the conversational taxonomy the turn
//! controller branches on; the rest wrap plumbing failures.

use thiserror::Error;

/// Result type alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// No user text, or only whitespace.
    #[error("empty input")]
    InputEmpty,

    /// Nobody spoke before the capture timeout. A normal loop outcome.
    #[error("no speech before capture timeout")]
    TranscriptionTimeout,

    /// Audio was captured but could not be turned into text.
    #[error("transcription failed: {0}")]
    TranscriptionFailure(String),

    /// The language model was unreachable or answered with garbage.
    #[error("model call failed: {0}")]
    ModelCallFailure(String),

    /// Speech could not be generated or played.
    #[error("speech synthesis failed: {0}")]
    SynthesisFailure(String),

    /// Config file missing, unreadable or not valid YAML.
    #[error("config load failed: {0}")]
    ConfigLoadFailure(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yml::Error),
}

impl Error {
    /// True for outcomes the listening loop treats as "nothing happened"
    /// rather than as a failure that needs a backoff.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TranscriptionTimeout)
    }
}
