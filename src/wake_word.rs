//! Wake-word gate.
//!
//! Works on transcripts, not audio: the recognizer has already produced
//! text, and the gate decides whether it was addressed to the assistant
//! and what the command part is.
//!
//! Matching is plain substring search over the configured variants in
//! insertion order, and the first variant found wins. When one variant is
//! a prefix of another ("mira" / "mirai") the earlier one in the list is
//! used, so the list order matters.

use tracing::{debug, info};

/// Words people put between the name and the request. Each is removed at
/// most once, in this order. "pode" runs before "poderia", so "poderia"
/// loses its "pode" and leaves "ria" behind; kept that way on purpose.
const FILLER_WORDS: &[&str] = &["assistente", "por favor", "pode", "poderia", "oi", "olá"];

/// Shorter residuals count as "just the wake word".
const MIN_COMMAND_CHARS: usize = 2;

/// Command used when someone only says the wake word.
pub const DEFAULT_COMMAND: &str = "olá";

/// Outcome of inspecting one transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    NoWakeWord,
    WakeWordOnly,
    Command(String),
}

impl CommandResult {
    /// The command to hand to the responder, if any. A bare wake word maps
    /// to [`DEFAULT_COMMAND`] instead of silence.
    pub fn into_command(self) -> Option<String> {
        match self {
            Self::NoWakeWord => None,
            Self::WakeWordOnly => Some(DEFAULT_COMMAND.to_string()),
            Self::Command(text) => Some(text),
        }
    }
}

/// Lowercase a phrase, drop punctuation and collapse whitespace.
pub fn normalize_phrase(phrase: &str) -> String {
    let cleaned: String = phrase
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Ordered, duplicate-free set of normalized trigger phrases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeWordSet {
    words: Vec<String>,
}

impl WakeWordSet {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for word in words {
            let word = normalize_phrase(word.as_ref());
            if !word.is_empty() && !normalized.contains(&word) {
                normalized.push(word);
            }
        }
        Self { words: normalized }
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// First variant (in insertion order) contained in `text`.
    fn first_match(&self, text: &str) -> Option<&str> {
        self.words
            .iter()
            .map(String::as_str)
            .find(|word| text.contains(word))
    }
}

#[derive(Debug, Clone)]
pub struct WakeWordGate {
    words: WakeWordSet,
}

impl WakeWordGate {
    pub fn new(words: WakeWordSet) -> Self {
        debug!("Wake word gate armed with {:?}", words.words());
        Self { words }
    }

    pub fn wake_words(&self) -> &WakeWordSet {
        &self.words
    }

    /// Inspect a transcript and extract the command part.
    pub fn detect(&self, transcript: &str) -> CommandResult {
        let text = transcript.to_lowercase();
        let text = text.trim();

        let Some(wake_word) = self.words.first_match(text) else {
            return CommandResult::NoWakeWord;
        };
        info!("Wake word detected: '{wake_word}'");

        let mut residual = text.replacen(wake_word, "", 1);
        for filler in FILLER_WORDS {
            residual = residual.replacen(filler, "", 1);
        }

        let residual = residual.trim();
        if residual.chars().count() < MIN_COMMAND_CHARS {
            debug!("Nothing after the wake word");
            CommandResult::WakeWordOnly
        } else {
            debug!("Command extracted: '{residual}'");
            CommandResult::Command(residual.to_string())
        }
    }
}
