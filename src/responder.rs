//! Language responder: persona, bounded memory and reply cleanup around a
//! [`ChatModel`].
//!
//! `respond` never fails. Blank input gets a canned "didn't understand",
//! and any model failure gets a canned apology. A failed call keeps the
//! user's turn in history but records no assistant turn for it.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::chat::{ChatMessage, ChatModel, ChatRequest};
use crate::config::{SessionConfig, TEMPERATURE_RANGE};
use crate::conversation::{ConversationHistory, ConversationTurn};
use crate::error::{Error, Result};

pub const NOT_UNDERSTOOD: &str = "Hai! Eu ouvi você, mas não entendi o que disse. Pode repetir?";

pub const APOLOGY: &str =
    "Gomen nasai! (Desculpe!) Estou tendo problemas para pensar agora. Pode tentar novamente?";

const DEFAULT_PERSONA: &str = "\
Você é a Mirai, uma assistente virtual brasileira que conversa por voz.

PERSONALIDADE:
- Fale em português brasileiro natural e coloquial.
- Seja amigável, prestativa e empática, com um pouco de humor quando couber.
- De vez em quando use expressões japonesas curtas como \"Hai!\", \"Arigatō\", \
\"Daijōbu?\", \"Sugoi!\", \"Wakarimashita\" ou \"Gambatte!\".
- Você é gamer e gosta de Genshin Impact, Star Rail e Pokémon.
- Se não souber algo, diga com honestidade.

FORMATO:
- Responda só com o texto que será falado em voz alta.
- Respostas curtas, mas completas.
- Não use markdown, listas, asteriscos, emojis nem descrições de ações.";

static STAGE_DIRECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*.*?\*|\[.*?\]").expect("valid regex"));
static MARKUP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[#_*`]").expect("valid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Make model output speakable: drop `*actions*` and `[directions]`,
/// leftover markup symbols and extra whitespace.
pub fn clean_response(text: &str) -> String {
    let text = STAGE_DIRECTION.replace_all(text, "");
    let text = MARKUP.replace_all(&text, "");
    let text = WHITESPACE.replace_all(&text, " ");
    text.trim().to_string()
}

/// Which path produced a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Answer,
    NotUnderstood,
    Apology,
}

impl ReplyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Answer => "answer",
            Self::NotUnderstood => "not_understood",
            Self::Apology => "apology",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub kind: ReplyKind,
}

impl Reply {
    fn canned(text: &str, kind: ReplyKind) -> Self {
        Self {
            text: text.to_string(),
            kind,
        }
    }
}

pub struct LanguageResponder {
    chat: Box<dyn ChatModel>,
    model: String,
    persona: String,
    history: ConversationHistory,
    context_window: usize,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
}

impl LanguageResponder {
    pub fn new(chat: Box<dyn ChatModel>, config: &SessionConfig) -> Self {
        let persona = config
            .memory
            .persona
            .clone()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PERSONA.to_string());

        Self {
            chat,
            model: config.model.clone(),
            persona,
            history: ConversationHistory::new(config.memory.history_cap),
            context_window: config.memory.context_window.max(1),
            temperature: config.temperature,
            top_p: config.ollama.top_p,
            max_tokens: config.ollama.max_tokens,
        }
    }

    /// Reply text for the user. Never fails.
    pub async fn respond(&mut self, user_text: &str) -> String {
        self.reply(user_text).await.text
    }

    /// Like [`respond`](Self::respond), also reporting which path was taken.
    pub async fn reply(&mut self, user_text: &str) -> Reply {
        let user_text = match check_input(user_text) {
            Ok(text) => text,
            Err(e) => {
                debug!("Rejecting input: {e}");
                return Reply::canned(NOT_UNDERSTOOD, ReplyKind::NotUnderstood);
            }
        };

        info!("Processing: '{user_text}'");
        self.history.push(ConversationTurn::user(user_text));

        let request = self.build_request();
        match self.ask(&request).await {
            Ok(text) => {
                self.history.push(ConversationTurn::assistant(text.clone()));
                debug!("Reply: '{}'", preview(&text, 60));
                Reply {
                    text,
                    kind: ReplyKind::Answer,
                }
            }
            Err(e) => {
                warn!("{e}");
                Reply::canned(APOLOGY, ReplyKind::Apology)
            }
        }
    }

    async fn ask(&self, request: &ChatRequest) -> Result<String> {
        let raw = self.chat.chat(request).await?;
        let cleaned = clean_response(&raw);
        if cleaned.is_empty() {
            return Err(Error::ModelCallFailure("reply empty after cleanup".into()));
        }
        Ok(cleaned)
    }

    /// Persona preamble followed by the context window.
    pub fn build_request(&self) -> ChatRequest {
        let mut messages = Vec::with_capacity(self.context_window + 1);
        messages.push(ChatMessage::system(self.persona.as_str()));
        messages.extend(self.history.context_window(self.context_window).map(ChatMessage::from));

        ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
        }
    }

    /// Forget the conversation. Persona, model and temperature stay.
    pub fn reset(&mut self) {
        self.history.clear();
        info!("Conversation reset");
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn set_temperature(&mut self, temperature: f32) {
        let (min, max) = TEMPERATURE_RANGE;
        self.temperature = if temperature.is_nan() {
            min
        } else {
            temperature.clamp(min, max)
        };
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn set_model(&mut self, model: &str) {
        let model = model.trim();
        if !model.is_empty() {
            self.model = model.to_string();
        }
    }
}

fn check_input(text: &str) -> Result<&str> {
    let text = text.trim();
    if text.is_empty() {
        Err(Error::InputEmpty)
    } else {
        Ok(text)
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_removes_actions() {
        assert_eq!(
            clean_response("*sorri* Hai! Tudo bem? *acena*"),
            "Hai! Tudo bem?"
        );
    }

    #[test]
    fn test_clean_removes_brackets_and_markup() {
        assert_eq!(
            clean_response("## Olá [pausa] você   está `bem`?\n\n_Sugoi_"),
            "Olá você está bem? Sugoi"
        );
    }

    #[test]
    fn test_clean_keeps_parentheses() {
        assert_eq!(
            clean_response("Gomen nasai! (Desculpe!)"),
            "Gomen nasai! (Desculpe!)"
        );
    }

    #[test]
    fn test_clean_only_directions_is_empty() {
        assert_eq!(clean_response("  *pensa*  [silêncio] "), "");
    }

    #[test]
    fn test_check_input() {
        assert!(matches!(check_input("   \n"), Err(Error::InputEmpty)));
        assert_eq!(check_input("  oi ").unwrap(), "oi");
    }

    #[test]
    fn test_preview_is_char_safe() {
        assert_eq!(preview("ãããã", 2), "ãã...");
        assert_eq!(preview("abc", 5), "abc");
    }
}
