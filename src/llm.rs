//! Text-generation backends.
//!
//! `LlmClient` speaks the OpenAI-compatible chat completions API (OpenAI, Groq)
//! and Ollama's `/api/generate`. Everything above this module only sees the
//! `CompletionBackend` trait, so tests can script replies.

use crate::config::{BackendKind, LlmSettings};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
}

impl Prompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            max_tokens: 1500,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("request timed out")]
    Timeout,

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limited")]
    RateLimited,

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response body: {0}")]
    MalformedBody(String),
}

#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &Prompt) -> Result<String, BackendError>;
}

#[derive(Debug, Clone)]
enum Api {
    ChatCompletions { api_key: String },
    OllamaGenerate,
}

pub struct LlmClient {
    http: reqwest::Client,
    api: Api,
    base_url: String,
    model: String,
    name: String,
}

impl LlmClient {
    /// `timeout` bounds the whole HTTP exchange; callers may add a tighter one.
    pub fn from_settings(settings: &LlmSettings, timeout: Duration) -> Result<Self, BackendError> {
        let api = match settings.kind {
            BackendKind::Ollama => Api::OllamaGenerate,
            BackendKind::OpenAi | BackendKind::Groq => Api::ChatCompletions {
                api_key: settings
                    .api_key
                    .clone()
                    .ok_or_else(|| BackendError::Auth("no API key configured".to_string()))?,
            },
            BackendKind::Disabled => {
                return Err(BackendError::Transport("backend is disabled".to_string()));
            }
        };

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            api,
            base_url: settings.base_url.clone(),
            model: settings.model.clone(),
            name: format!("{:?}:{}", settings.kind, settings.model).to_lowercase(),
        })
    }

    async fn chat_completion(&self, api_key: &str, prompt: &Prompt) -> Result<String, BackendError> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": prompt.user}
            ],
            "temperature": 0.0,
            "max_tokens": prompt.max_tokens
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;
        let response_json = read_json(response).await?;

        response_json["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| BackendError::MalformedBody("no content in chat completion".to_string()))
    }

    async fn ollama_generate(&self, prompt: &Prompt) -> Result<String, BackendError> {
        let body = json!({
            "model": self.model,
            "prompt": format!("{}\n\n{}", prompt.system, prompt.user),
            "stream": false,
            "options": {
                "temperature": 0.0,
                "num_predict": prompt.max_tokens
            }
        });

        let response = self
            .http
            .post(&self.base_url)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;
        let response_json = read_json(response).await?;

        response_json["response"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| BackendError::MalformedBody("no 'response' field".to_string()))
    }
}

#[async_trait]
impl CompletionBackend for LlmClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String, BackendError> {
        debug!("LLM request to {} ({} chars)", self.name, prompt.system.len() + prompt.user.len());
        match &self.api {
            Api::ChatCompletions { api_key } => self.chat_completion(api_key, prompt).await,
            Api::OllamaGenerate => self.ollama_generate(prompt).await,
        }
    }
}

fn classify_transport(e: reqwest::Error) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout
    } else {
        BackendError::Transport(e.to_string())
    }
}

async fn read_json(response: reqwest::Response) -> Result<serde_json::Value, BackendError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(status.as_u16(), body));
    }
    response
        .json()
        .await
        .map_err(|e| BackendError::MalformedBody(e.to_string()))
}

fn classify_status(status: u16, body: String) -> BackendError {
    match status {
        401 | 403 => BackendError::Auth(body),
        429 => BackendError::RateLimited,
        408 | 504 => BackendError::Timeout,
        _ => BackendError::Http { status, body },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(classify_status(401, "bad key".into()), BackendError::Auth("bad key".into()));
        assert_eq!(classify_status(429, String::new()), BackendError::RateLimited);
        assert_eq!(classify_status(504, String::new()), BackendError::Timeout);
        assert!(matches!(classify_status(500, String::new()), BackendError::Http { status: 500, .. }));
    }

    #[test]
    fn test_client_requires_key_for_chat_backends() {
        let settings = LlmSettings {
            kind: BackendKind::OpenAi,
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
        };
        assert!(matches!(
            LlmClient::from_settings(&settings, Duration::from_secs(5)),
            Err(BackendError::Auth(_))
        ));
    }

    #[test]
    fn test_ollama_client_builds_without_key() {
        let settings = LlmSettings {
            kind: BackendKind::Ollama,
            api_key: None,
            base_url: "http://localhost:11434/api/generate".to_string(),
            model: "llama2".to_string(),
        };
        let client = LlmClient::from_settings(&settings, Duration::from_secs(5)).unwrap();
        assert_eq!(client.name(), "ollama:llama2");
    }
}
