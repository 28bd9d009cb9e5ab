//! Shared test utilities: scripted stand-ins for the model, microphone
//! and speaker.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use mirai_assistant::chat::{ChatModel, ChatRequest};
use mirai_assistant::config::SessionConfig;
use mirai_assistant::synthesis::{Playback, PlaybackMode, SpeechSynthesizer};
use mirai_assistant::transcriber::{CaptureRequest, Transcriber};
use mirai_assistant::{Error, LanguageResponder, Result};

/// Config with no pauses, so loops run as fast as the script allows.
pub fn test_config() -> SessionConfig {
    let mut config = SessionConfig {
        wake_words: vec!["mirai".into()],
        ..SessionConfig::default()
    };
    config.listening.post_speech_pause_ms = 0;
    config.listening.error_backoff_ms = 0;
    config.listening.calibration_secs = 0.0;
    config
}

/// Answers `resposta N` for the Nth call, or fails on chosen calls.
#[derive(Clone, Default)]
pub struct ScriptedChatModel {
    inner: Arc<Mutex<ChatScript>>,
}

#[derive(Default)]
struct ChatScript {
    /// 1-based call numbers that fail.
    failing_calls: Vec<usize>,
    replies: VecDeque<String>,
    calls: Vec<ChatRequest>,
}

impl ScriptedChatModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(calls: &[usize]) -> Self {
        let model = Self::default();
        model.inner.lock().unwrap().failing_calls = calls.to_vec();
        model
    }

    /// Raw replies returned before falling back to `resposta N`.
    pub fn with_replies(replies: &[&str]) -> Self {
        let model = Self::default();
        model.inner.lock().unwrap().replies = replies.iter().map(|r| r.to_string()).collect();
        model
    }

    pub fn calls(&self) -> Vec<ChatRequest> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.inner.lock().unwrap().calls.len()
    }

    /// Content of the last message in each request, i.e. the user's command.
    pub fn commands(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|req| req.messages.last().map(|m| m.content.clone()))
            .collect()
    }

    pub fn responder(&self, config: &SessionConfig) -> LanguageResponder {
        LanguageResponder::new(Box::new(self.clone()), config)
    }
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    async fn chat(&self, request: &ChatRequest) -> Result<String> {
        let mut script = self.inner.lock().unwrap();
        script.calls.push(request.clone());
        let n = script.calls.len();
        if script.failing_calls.contains(&n) {
            return Err(Error::ModelCallFailure("scripted failure".into()));
        }
        Ok(script
            .replies
            .pop_front()
            .unwrap_or_else(|| format!("resposta {n}")))
    }
}

/// One scripted capture outcome.
#[derive(Debug, Clone)]
pub enum Heard {
    Text(&'static str),
    Timeout,
    Failure,
}

/// Plays back a script of capture outcomes, then cancels `done`.
pub struct ScriptedTranscriber {
    script: VecDeque<Heard>,
    done: CancellationToken,
    calibrations: Arc<Mutex<usize>>,
    captures: Arc<Mutex<Vec<Instant>>>,
}

impl ScriptedTranscriber {
    pub fn new(script: Vec<Heard>, done: CancellationToken) -> Self {
        Self {
            script: script.into(),
            done,
            calibrations: Arc::default(),
            captures: Arc::default(),
        }
    }

    pub fn calibrations(&self) -> Arc<Mutex<usize>> {
        Arc::clone(&self.calibrations)
    }

    /// When each capture started, on the tokio clock.
    pub fn capture_times(&self) -> Arc<Mutex<Vec<Instant>>> {
        Arc::clone(&self.captures)
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn calibrate(&mut self, _device: Option<usize>, _duration: std::time::Duration) -> Result<()> {
        *self.calibrations.lock().unwrap() += 1;
        Ok(())
    }

    async fn capture_and_transcribe(&mut self, _request: &CaptureRequest) -> Result<String> {
        self.captures.lock().unwrap().push(Instant::now());
        match self.script.pop_front() {
            Some(Heard::Text(text)) => Ok(text.to_string()),
            Some(Heard::Timeout) => Err(Error::TranscriptionTimeout),
            Some(Heard::Failure) => Err(Error::TranscriptionFailure("scripted failure".into())),
            None => {
                self.done.cancel();
                Err(Error::TranscriptionTimeout)
            }
        }
    }
}

/// Never hears anything and never returns.
pub struct HangingTranscriber;

#[async_trait]
impl Transcriber for HangingTranscriber {
    async fn capture_and_transcribe(&mut self, _request: &CaptureRequest) -> Result<String> {
        std::future::pending::<()>().await;
        Err(Error::TranscriptionTimeout)
    }
}

/// Records what would have been spoken.
#[derive(Clone, Default)]
pub struct RecordingSynthesizer {
    spoken: Arc<Mutex<Vec<(String, PlaybackMode)>>>,
    finished: Arc<Mutex<Vec<Instant>>>,
    fail: bool,
}

impl RecordingSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken
            .lock()
            .unwrap()
            .iter()
            .map(|(text, _)| text.clone())
            .collect()
    }

    pub fn modes(&self) -> Vec<PlaybackMode> {
        self.spoken.lock().unwrap().iter().map(|(_, mode)| *mode).collect()
    }

    /// When each playback ended, on the tokio clock.
    pub fn finished_at(&self) -> Vec<Instant> {
        self.finished.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for RecordingSynthesizer {
    async fn synthesize_and_play(
        &self,
        text: &str,
        _playback: &Playback,
        mode: PlaybackMode,
    ) -> Result<()> {
        self.spoken.lock().unwrap().push((text.to_string(), mode));
        self.finished.lock().unwrap().push(Instant::now());
        if self.fail {
            return Err(Error::SynthesisFailure("scripted failure".into()));
        }
        Ok(())
    }
}
