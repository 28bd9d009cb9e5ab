//! Chat-style language model client.
//!
//! The responder talks to a [`ChatModel`]; the shipped implementation
//! posts to Ollama's /api/chat endpoint without streaming.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::OllamaConfig;
use crate::conversation::ConversationTurn;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }
}

impl From<&ConversationTurn> for ChatMessage {
    fn from(turn: &ConversationTurn) -> Self {
        Self {
            role: turn.role().as_str(),
            content: turn.text().to_string(),
        }
    }
}

/// Everything the model needs for one reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Raw assistant text for the request.
    async fn chat(&self, request: &ChatRequest) -> Result<String>;
}

pub struct OllamaChat {
    host: String,
    client: Client,
}

impl OllamaChat {
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            host: config.host.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl ChatModel for OllamaChat {
    async fn chat(&self, request: &ChatRequest) -> Result<String> {
        debug!(
            "Sending {} messages to Ollama model '{}'",
            request.messages.len(),
            request.model
        );

        let body = json!({
            "model": request.model,
            "messages": request.messages,
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "top_p": request.top_p,
                "num_predict": request.max_tokens
            }
        });

        let url = format!("{}/api/chat", self.host);

        let resp = self.client.post(&url).json(&body).send().await.map_err(|e| {
            if e.is_connect() {
                warn!("Cannot connect to Ollama at {}", self.host);
            } else if e.is_timeout() {
                warn!("Ollama request timed out");
            }
            Error::ModelCallFailure(e.to_string())
        })?;

        if !resp.status().is_success() {
            return Err(Error::ModelCallFailure(format!(
                "Ollama returned status {}",
                resp.status()
            )));
        }

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::ModelCallFailure(format!("unreadable response: {e}")))?;

        data["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::ModelCallFailure("response has no message.content".into()))
    }
}
