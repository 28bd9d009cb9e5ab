//! Mirai: a wake-word gated voice assistant.
//!
//! Microphone audio is transcribed with Whisper, gated on a wake word,
//! answered by a local Ollama model and spoken back with Kokoro TTS.

pub mod chat;
pub mod config;
pub mod controller;
pub mod conversation;
pub mod devices;
pub mod error;
pub mod journal;
pub mod menu;
pub mod recorder;
pub mod responder;
pub mod synthesis;
pub mod transcriber;
pub mod wake_word;

pub use config::SessionConfig;
pub use controller::{OperatingMode, TurnController, TurnState};
pub use error::{Error, Result};
pub use responder::LanguageResponder;
pub use wake_word::{CommandResult, WakeWordGate, WakeWordSet};
