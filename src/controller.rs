//! Turn controller: the listen → gate → respond → speak state machine.
//!
//! Idle → AWAITING_WAKE_WORD → PROCESSING → SPEAKING → AWAITING_WAKE_WORD
//!
//! One cycle runs to completion before the next. Timeouts restart the
//! cycle, failures are logged and followed by a backoff, and only the
//! cancellation token ends a mode.

use std::io::Write;
use std::time::Instant;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ListeningConfig, SessionConfig};
use crate::error::{Error, Result};
use crate::journal::{Journal, TurnRecord};
use crate::responder::LanguageResponder;
use crate::synthesis::{Playback, PlaybackMode, SpeechSynthesizer};
use crate::transcriber::{clean_transcript, CaptureRequest, Transcriber};
use crate::wake_word::{CommandResult, WakeWordGate, WakeWordSet, DEFAULT_COMMAND};

/// Typed input that ends text-only mode.
pub const EXIT_WORDS: [&str; 3] = ["sair", "exit", "quit"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    AwaitingWakeWord,
    AwaitingCommand,
    Processing,
    Speaking,
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::AwaitingWakeWord => write!(f, "AWAITING_WAKE_WORD"),
            Self::AwaitingCommand => write!(f, "AWAITING_COMMAND"),
            Self::Processing => write!(f, "PROCESSING"),
            Self::Speaking => write!(f, "SPEAKING"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
    WakeWordListening,
    ContinuousListening,
    TextOnly,
    Idle,
}

impl OperatingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WakeWordListening => "wake_word",
            Self::ContinuousListening => "continuous",
            Self::TextOnly => "text",
            Self::Idle => "idle",
        }
    }

    /// Parse a mode name as given on the command line.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "wake" | "wake_word" | "wake-word" => Some(Self::WakeWordListening),
            "continuous" | "direct" => Some(Self::ContinuousListening),
            "text" | "chat" => Some(Self::TextOnly),
            _ => None,
        }
    }
}

/// How a cycle ended when nothing went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleOutcome {
    /// Timeout, empty transcript or no wake word. Listen again right away.
    Nothing,
    /// A reply was spoken; pause before listening again.
    Spoke,
}

/// Where a command came from, for the journal.
struct Heard {
    transcript: Option<String>,
    transcription_ms: Option<i64>,
    started: Instant,
}

pub struct TurnController {
    responder: LanguageResponder,
    gate: WakeWordGate,
    transcriber: Option<Box<dyn Transcriber>>,
    synthesizer: Option<Box<dyn SpeechSynthesizer>>,
    playback: Playback,
    capture: CaptureRequest,
    listening: ListeningConfig,
    state: TurnState,
    mode: OperatingMode,
    state_tx: Option<mpsc::UnboundedSender<TurnState>>,
    journal: Option<Journal>,
}

impl TurnController {
    pub fn new(responder: LanguageResponder, config: &SessionConfig) -> Self {
        Self {
            responder,
            gate: WakeWordGate::new(WakeWordSet::new(&config.wake_words)),
            transcriber: None,
            synthesizer: None,
            playback: Playback::from_config(config),
            capture: CaptureRequest::from_config(config),
            listening: config.listening.clone(),
            state: TurnState::Idle,
            mode: OperatingMode::Idle,
            state_tx: None,
            journal: None,
        }
    }

    pub fn with_transcriber(mut self, transcriber: Box<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    pub fn with_synthesizer(mut self, synthesizer: Box<dyn SpeechSynthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Publish every state change on `tx`.
    pub fn with_state_channel(mut self, tx: mpsc::UnboundedSender<TurnState>) -> Self {
        self.state_tx = Some(tx);
        self
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    pub fn responder(&self) -> &LanguageResponder {
        &self.responder
    }

    pub fn responder_mut(&mut self) -> &mut LanguageResponder {
        &mut self.responder
    }

    pub fn can_listen(&self) -> bool {
        self.transcriber.is_some()
    }

    pub fn can_speak(&self) -> bool {
        self.synthesizer.is_some()
    }

    pub fn playback(&self) -> &Playback {
        &self.playback
    }

    /// Take over changed settings. Only possible between sessions.
    pub fn apply_config(&mut self, config: &SessionConfig) {
        self.gate = WakeWordGate::new(WakeWordSet::new(&config.wake_words));
        self.playback = Playback::from_config(config);
        self.capture = CaptureRequest::from_config(config);
        self.listening = config.listening.clone();
        self.responder.set_model(&config.model);
        self.responder.set_temperature(config.temperature);
        debug!("Settings applied: {:?}", self.gate.wake_words().words());
    }

    fn set_state(&mut self, state: TurnState) {
        if self.state != state {
            info!("State: {} → {}", self.state, state);
            self.state = state;
        }
        if let Some(tx) = &self.state_tx {
            let _ = tx.send(state);
        }
    }

    /// Run a mode until it is cancelled (or, for text, until input ends).
    pub async fn run(&mut self, mode: OperatingMode, token: &CancellationToken) -> Result<()> {
        let result = match mode {
            OperatingMode::WakeWordListening | OperatingMode::ContinuousListening => {
                self.listen_loop(mode, token).await
            }
            OperatingMode::TextOnly => {
                let stdin = BufReader::new(tokio::io::stdin());
                self.run_text_only(stdin, token).await
            }
            OperatingMode::Idle => Ok(()),
        };
        self.mode = OperatingMode::Idle;
        self.set_state(TurnState::Idle);
        result
    }

    async fn listen_loop(&mut self, mode: OperatingMode, token: &CancellationToken) -> Result<()> {
        if self.transcriber.is_none() {
            return Err(Error::TranscriptionFailure(
                "no transcription service available".into(),
            ));
        }
        self.mode = mode;
        let gated = mode == OperatingMode::WakeWordListening;
        let listening_state = if gated {
            TurnState::AwaitingWakeWord
        } else {
            TurnState::AwaitingCommand
        };

        self.calibrate(token).await;
        if gated {
            info!(
                "Listening for wake words: {}",
                self.gate.wake_words().words().join(", ")
            );
        } else {
            info!("Listening for commands (no wake word)");
        }

        while !token.is_cancelled() {
            self.set_state(listening_state);

            let outcome = tokio::select! {
                _ = token.cancelled() => break,
                outcome = self.listen_cycle(gated) => outcome,
            };

            let pause = match outcome {
                Ok(CycleOutcome::Nothing) => continue,
                Ok(CycleOutcome::Spoke) => self.listening.post_speech_pause(),
                Err(e) => {
                    warn!("Cycle failed: {e}");
                    self.listening.error_backoff()
                }
            };

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!("Listening stopped");
        Ok(())
    }

    async fn calibrate(&mut self, token: &CancellationToken) {
        let duration = self.listening.calibration();
        let device = self.capture.device;
        let Some(transcriber) = self.transcriber.as_mut() else {
            return;
        };
        tokio::select! {
            _ = token.cancelled() => {}
            result = transcriber.calibrate(device, duration) => {
                if let Err(e) = result {
                    warn!("Ambient noise calibration failed: {e}");
                }
            }
        }
    }

    async fn listen_cycle(&mut self, gated: bool) -> Result<CycleOutcome> {
        let started = Instant::now();
        let transcriber = self
            .transcriber
            .as_mut()
            .ok_or_else(|| Error::TranscriptionFailure("no transcription service available".into()))?;

        let transcript = match transcriber.capture_and_transcribe(&self.capture).await {
            Ok(text) => text,
            Err(e) if e.is_timeout() => {
                debug!("{e}");
                return Ok(CycleOutcome::Nothing);
            }
            Err(e) => return Err(e),
        };
        let transcription_ms = started.elapsed().as_millis() as i64;

        let transcript = clean_transcript(&transcript);
        let transcript = transcript.as_str();
        if transcript.is_empty() {
            debug!("Empty transcript");
            return Ok(CycleOutcome::Nothing);
        }
        println!("🎤 Você: {transcript}");

        let command = if gated {
            match self.gate.detect(transcript) {
                CommandResult::NoWakeWord => {
                    debug!("No wake word in '{transcript}'");
                    return Ok(CycleOutcome::Nothing);
                }
                CommandResult::WakeWordOnly => DEFAULT_COMMAND.to_string(),
                CommandResult::Command(command) => command,
            }
        } else {
            transcript.to_string()
        };

        let heard = Heard {
            transcript: Some(transcript.to_string()),
            transcription_ms: Some(transcription_ms),
            started,
        };
        self.process(command, heard, true).await?;
        Ok(CycleOutcome::Spoke)
    }

    /// Respond to one command, print the reply and optionally speak it.
    async fn process(&mut self, command: String, heard: Heard, speak: bool) -> Result<()> {
        self.set_state(TurnState::Processing);
        println!("🎯 Comando: {command}");

        let t0 = Instant::now();
        let reply = self.responder.reply(&command).await;
        let response_ms = t0.elapsed().as_millis() as i64;
        println!("🤖 Mirai: {}", reply.text);

        let (result, speech_ms) = if speak {
            self.set_state(TurnState::Speaking);
            let t0 = Instant::now();
            let result = self.speak(&reply.text, PlaybackMode::Blocking).await;
            let speech_ms = t0.elapsed().as_millis() as i64;
            (result, Some(speech_ms))
        } else {
            (Ok(()), None)
        };
        let spoken = speak && result.is_ok();

        if let Some(journal) = &self.journal {
            journal.record(&TurnRecord {
                timestamp: TurnRecord::now_timestamp(),
                mode: self.mode.as_str().to_string(),
                transcript: heard.transcript,
                command,
                reply: reply.text,
                reply_kind: reply.kind.as_str().to_string(),
                transcription_latency_ms: heard.transcription_ms,
                response_latency_ms: response_ms,
                speech_latency_ms: speech_ms.filter(|_| spoken),
                total_latency_ms: heard.started.elapsed().as_millis() as i64,
                spoken,
            });
        }

        result
    }

    /// Speak `text` with the current playback settings.
    pub async fn speak(&self, text: &str, mode: PlaybackMode) -> Result<()> {
        let synthesizer = self
            .synthesizer
            .as_ref()
            .ok_or_else(|| Error::SynthesisFailure("no speech synthesizer available".into()))?;
        synthesizer
            .synthesize_and_play(text, &self.playback, mode)
            .await
    }

    /// Typed conversation: one line in, one printed reply out.
    ///
    /// Ends at end of input, on an exit word or on cancellation.
    pub async fn run_text_only<R>(&mut self, reader: R, token: &CancellationToken) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        self.mode = OperatingMode::TextOnly;
        println!("💬 Digite 'sair' para encerrar");
        let mut lines = reader.lines();

        loop {
            self.set_state(TurnState::AwaitingCommand);
            print!("Você: ");
            let _ = std::io::stdout().flush();

            let line = tokio::select! {
                _ = token.cancelled() => break,
                line = lines.next_line() => line?,
            };
            let Some(line) = line else {
                break;
            };

            let input = line.trim();
            if is_exit_word(input) {
                break;
            }

            let heard = Heard {
                transcript: None,
                transcription_ms: None,
                started: Instant::now(),
            };
            tokio::select! {
                _ = token.cancelled() => break,
                result = self.process(input.to_string(), heard, false) => result?,
            }
        }

        self.mode = OperatingMode::Idle;
        self.set_state(TurnState::Idle);
        println!("👋 Até logo!");
        Ok(())
    }
}

pub fn is_exit_word(input: &str) -> bool {
    let input = input.trim();
    EXIT_WORDS.iter().any(|w| input.eq_ignore_ascii_case(w))
}
