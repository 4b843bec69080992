//! OpenAI-compatible chat completion backend for [`GenerationService`].
//!
//! Keeps a per-role message history so the debugger and reviewer can be
//! reset independently between attempts, mirroring how the repair schedule
//! clears their context before re-asking.

use std::collections::HashMap;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::agents::{GenerationService, Role};
use crate::config::ProviderConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<&'a ChatMessage>,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

/// Chat backend speaking the OpenAI `/chat/completions` protocol.
pub struct OpenAiGeneration {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    history: HashMap<Role, Vec<ChatMessage>>,
}

impl OpenAiGeneration {
    /// Build a backend from config, reading the API key from the configured
    /// environment variable.
    pub fn new(cfg: &ProviderConfig) -> Result<Self> {
        let api_key = std::env::var(&cfg.api_key_env)
            .with_context(|| format!("missing API key env var {}", cfg.api_key_env))?;
        Ok(Self::from_parts(&cfg.base_url, &cfg.model, api_key))
    }

    /// Build a backend from explicit parts (tests, alternate key sources).
    pub fn from_parts(base_url: &str, model: &str, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.into(),
            history: HashMap::new(),
        }
    }

    fn messages_for<'a>(&'a self, role: Role, system: &'a ChatMessage) -> Vec<&'a ChatMessage> {
        let mut messages = vec![system];
        if let Some(history) = self.history.get(&role) {
            messages.extend(history.iter());
        }
        messages
    }
}

#[async_trait]
impl GenerationService for OpenAiGeneration {
    async fn generate(&mut self, role: Role, prompt: &str) -> Result<String> {
        let system = ChatMessage {
            role: "system".to_string(),
            content: role.instructions().to_string(),
        };
        self.history.entry(role).or_default().push(ChatMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        });

        let request = ChatCompletionRequest {
            model: &self.model,
            messages: self.messages_for(role, &system),
            stream: false,
        };
        debug!(role = role.as_str(), model = %self.model, "requesting completion");
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("send chat completion request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!(
                "chat completion failed with {status}: {}",
                body.chars().take(500).collect::<String>()
            );
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .context("parse chat completion response")?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("chat completion returned no choices"))?;

        info!(role = role.as_str(), bytes = content.len(), "completion received");
        self.history.entry(role).or_default().push(ChatMessage {
            role: "assistant".to_string(),
            content: content.clone(),
        });
        Ok(content)
    }

    fn reset_history(&mut self, role: Role) {
        debug!(role = role.as_str(), "clearing role history");
        self.history.remove(&role);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let backend = OpenAiGeneration::from_parts("https://api.example.com/v1/", "m", "key");
        assert_eq!(backend.base_url, "https://api.example.com/v1");
    }

    #[test]
    fn history_is_per_role() {
        let mut backend = OpenAiGeneration::from_parts("https://api.example.com/v1", "m", "key");
        backend.history.entry(Role::Debugger).or_default().push(ChatMessage {
            role: "user".to_string(),
            content: "old".to_string(),
        });
        backend.history.entry(Role::Implementer).or_default().push(ChatMessage {
            role: "user".to_string(),
            content: "keep".to_string(),
        });

        backend.reset_history(Role::Debugger);

        assert!(!backend.history.contains_key(&Role::Debugger));
        assert!(backend.history.contains_key(&Role::Implementer));
    }

    #[test]
    fn system_message_precedes_role_history() {
        let mut backend = OpenAiGeneration::from_parts("https://api.example.com/v1", "m", "key");
        backend.history.entry(Role::Debugger).or_default().push(ChatMessage {
            role: "user".to_string(),
            content: "fix it".to_string(),
        });
        let system = ChatMessage {
            role: "system".to_string(),
            content: "be a debugger".to_string(),
        };

        let messages = backend.messages_for(Role::Debugger, &system);

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].content, "fix it");
    }

    #[test]
    fn request_serializes_to_openai_shape() {
        let system = ChatMessage {
            role: "system".to_string(),
            content: "be helpful".to_string(),
        };
        let backend = OpenAiGeneration::from_parts("https://api.example.com/v1", "test-model", "k");
        let request = ChatCompletionRequest {
            model: &backend.model,
            messages: backend.messages_for(Role::Implementer, &system),
            stream: false,
        };
        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(value["model"], "test-model");
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["stream"], false);
    }
}
