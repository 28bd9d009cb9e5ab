//! Speech synthesis: text in, sound out of a speaker.
//!
//! - `kokoro`: Kokoro ONNX inference + rodio playback

pub mod kokoro;

use async_trait::async_trait;

use crate::config::SessionConfig;
use crate::error::Result;

pub use kokoro::KokoroSynthesizer;

/// How loud, how fast and where.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Playback {
    pub volume: f32,
    pub rate: f32,
    pub device: Option<usize>,
}

impl Playback {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            volume: config.volume,
            rate: config.rate,
            device: config.synthesis_device,
        }
    }
}

impl Default for Playback {
    fn default() -> Self {
        Self {
            volume: 1.0,
            rate: 1.0,
            device: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackMode {
    /// Return once the audio has finished playing.
    Blocking,
    /// Return as soon as the audio is queued.
    Detached,
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize_and_play(
        &self,
        text: &str,
        playback: &Playback,
        mode: PlaybackMode,
    ) -> Result<()>;
}
