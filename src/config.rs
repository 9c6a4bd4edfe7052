//! Runtime configuration, read from the process environment (after `.env` is
//! loaded by the binaries).

use crate::error::{AssistantError, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
const OLLAMA_URL: &str = "http://localhost:11434/api/generate";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    OpenAi,
    Groq,
    Ollama,
    Disabled,
}

impl FromStr for BackendKind {
    type Err = AssistantError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(BackendKind::OpenAi),
            "groq" => Ok(BackendKind::Groq),
            "ollama" => Ok(BackendKind::Ollama),
            "none" | "off" | "disabled" => Ok(BackendKind::Disabled),
            other => Err(AssistantError::Config(format!(
                "unknown LLM_BACKEND '{}' (expected openai, groq, ollama or none)",
                other
            ))),
        }
    }
}

/// Settings for a usable generative backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmSettings {
    pub kind: BackendKind,
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// `None` runs the assistant in template-only mode.
    pub llm: Option<LlmSettings>,
    pub default_row_limit: u64,
    pub max_row_limit: u64,
    pub conversation_window: usize,
    pub llm_timeout: Duration,
    pub query_timeout: Duration,
    /// Sessions idle this long are dropped; `None` keeps them until ended.
    pub session_idle_timeout: Option<Duration>,
    pub holdings_path: PathBuf,
    pub trades_path: PathBuf,
    pub input_guardrail: bool,
    pub server_addr: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let kind = match get("LLM_BACKEND") {
            Some(v) => v.parse()?,
            None => BackendKind::OpenAi,
        };
        let llm = match kind {
            BackendKind::Disabled => None,
            BackendKind::OpenAi => api_backend(
                kind,
                get("OPENAI_API_KEY"),
                get("OPENAI_BASE_URL").unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
                get("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            ),
            BackendKind::Groq => api_backend(
                kind,
                get("GROQ_API_KEY").or_else(|| get("OPENAI_API_KEY")),
                get("GROQ_BASE_URL")
                    .or_else(|| get("OPENAI_BASE_URL"))
                    .unwrap_or_else(|| GROQ_BASE_URL.to_string()),
                get("GROQ_MODEL")
                    .or_else(|| get("OPENAI_MODEL"))
                    .unwrap_or_else(|| "llama-3.3-70b-versatile".to_string()),
            ),
            BackendKind::Ollama => Some(LlmSettings {
                kind,
                api_key: None,
                base_url: get("OLLAMA_URL").unwrap_or_else(|| OLLAMA_URL.to_string()),
                model: get("OLLAMA_MODEL").unwrap_or_else(|| "llama2".to_string()),
            }),
        };

        let default_row_limit: u64 = parse_or(&get, "DEFAULT_ROW_LIMIT", 200)?;
        let max_row_limit: u64 = parse_or(&get, "MAX_ROW_LIMIT", 5000)?;
        if default_row_limit == 0 || max_row_limit == 0 {
            return Err(AssistantError::Config("row limits must be positive".to_string()));
        }
        if default_row_limit > max_row_limit {
            return Err(AssistantError::Config(format!(
                "DEFAULT_ROW_LIMIT ({}) exceeds MAX_ROW_LIMIT ({})",
                default_row_limit, max_row_limit
            )));
        }

        let conversation_window: usize = parse_or(&get, "CONVERSATION_WINDOW", 5)?;
        if conversation_window == 0 {
            return Err(AssistantError::Config("CONVERSATION_WINDOW must be at least 1".to_string()));
        }

        let data_dir = PathBuf::from(get("DATA_DIR").unwrap_or_else(|| "data".to_string()));
        let holdings_path = get("HOLDINGS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("holdings.csv"));
        let trades_path = get("TRADES_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("trades.csv"));

        Ok(Self {
            llm,
            default_row_limit,
            max_row_limit,
            conversation_window,
            llm_timeout: Duration::from_secs(parse_or(&get, "LLM_TIMEOUT_SECS", 30)?),
            query_timeout: Duration::from_secs(parse_or(&get, "QUERY_TIMEOUT_SECS", 15)?),
            session_idle_timeout: match parse_or(&get, "SESSION_IDLE_SECS", 1800u64)? {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            holdings_path,
            trades_path,
            input_guardrail: parse_bool(&get, "INPUT_GUARDRAIL", true)?,
            server_addr: get("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        })
    }
}

fn api_backend(kind: BackendKind, api_key: Option<String>, base_url: String, model: String) -> Option<LlmSettings> {
    if api_key.is_none() {
        warn!("No API key configured for {:?} backend - running in template-only mode", kind);
        return None;
    }
    Some(LlmSettings {
        kind,
        api_key,
        base_url: base_url.trim_end_matches('/').to_string(),
        model,
    })
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| AssistantError::Config(format!("invalid {} '{}': {}", key, raw, e))),
        None => Ok(default),
    }
}

fn parse_bool<G>(get: &G, key: &str, default: bool) -> Result<bool>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.to_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(AssistantError::Config(format!("invalid {} '{}': expected a boolean", key, v))),
        },
    }
}
