use std::time::Duration;
use thiserror::Error;

use crate::candidate::Origin;

#[derive(Error, Debug)]
pub enum AssistantError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Template registration error: {0}")]
    Template(#[from] TemplateRegistrationError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("LLM error: {0}")]
    Llm(String),
}

pub type Result<T> = std::result::Result<T, AssistantError>;

/// Inconsistencies in the template rule set. Always fatal at startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateRegistrationError {
    #[error("duplicate rule id '{0}'")]
    DuplicateRuleId(String),

    #[error("trigger pattern '{pattern}' is registered by both '{first}' and '{second}'")]
    DuplicateTrigger {
        pattern: String,
        first: String,
        second: String,
    },

    #[error("rule '{rule}' has an invalid trigger pattern '{pattern}': {message}")]
    InvalidPattern {
        rule: String,
        pattern: String,
        message: String,
    },

    #[error("rule '{rule}' placeholders do not match its captures (missing: {missing:?}, extra: {extra:?})")]
    PlaceholderMismatch {
        rule: String,
        missing: Vec<String>,
        extra: Vec<String>,
    },

    #[error("rule '{rule}' declares capture '{capture}' that no trigger produces and that has no default")]
    UnreachableCapture { rule: String, capture: String },

    #[error("rule '{0}' has no trigger patterns")]
    NoTriggers(String),
}

/// Why the generative tier produced no candidate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationFailure {
    #[error("generative backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("generative backend timed out after {0:?}")]
    BackendTimeout(Duration),

    #[error("no SQL found in backend response")]
    UnparsableResponse(String),
}

/// Why the safety validator refused a candidate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationRejection {
    #[error("statement could not be parsed: {0}")]
    UnparsableStatement(String),

    #[error("only a single statement is allowed ({count} found)")]
    MultiStatementRejected { count: usize },

    #[error("mutating keyword '{keyword}' is not allowed")]
    MutationRejected { keyword: String },

    #[error("only SELECT queries are allowed, got {0}")]
    NotReadOnly(String),

    #[error("unknown table '{table}'")]
    UnknownTableRejected { table: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanningFailure {
    #[error("no SQL candidate: {0}")]
    NoCandidate(GenerationFailure),

    #[error("{origin} SQL rejected: {reason}")]
    RejectedSql {
        sql: String,
        origin: Origin,
        reason: ValidationRejection,
    },
}

/// Opaque failure reported by the execution engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct EngineError {
    pub message: String,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<polars::prelude::PolarsError> for EngineError {
    fn from(e: polars::prelude::PolarsError) -> Self {
        Self::new(e.to_string())
    }
}
