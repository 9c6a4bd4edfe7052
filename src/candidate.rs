//! Query candidates: proposed SQL before and after the safety gate.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which planning tier produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Template,
    Generative,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Template => write!(f, "template"),
            Origin::Generative => write!(f, "generative"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryCandidate {
    sql: String,
    origin: Origin,
    template_id: Option<String>,
    /// Raw backend reply, kept for diagnostics.
    raw_response: Option<String>,
}

impl QueryCandidate {
    pub fn from_template(template_id: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            origin: Origin::Template,
            template_id: Some(template_id.into()),
            raw_response: None,
        }
    }

    pub fn generated(sql: impl Into<String>, raw_response: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            origin: Origin::Generative,
            template_id: None,
            raw_response: Some(raw_response.into()),
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn template_id(&self) -> Option<&str> {
        self.template_id.as_deref()
    }

    pub fn raw_response(&self) -> Option<&str> {
        self.raw_response.as_deref()
    }

    /// Same provenance, different SQL text.
    pub fn with_sql(&self, sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            ..self.clone()
        }
    }
}

/// What the validator did about the row cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RowCap {
    /// The statement already carried an acceptable cap.
    Kept { limit: u64 },
    /// No cap was present; the default was added.
    Injected { limit: u64 },
    /// The requested cap exceeded the ceiling.
    Clamped { requested: Option<u64>, applied: u64 },
}

/// Soft warning: the statement touches a column the registry flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnWarning {
    pub table: String,
    pub column: String,
    pub message: String,
}

/// A candidate that passed the safety gate, possibly rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedQuery {
    pub candidate: QueryCandidate,
    pub row_cap: RowCap,
    pub warnings: Vec<ColumnWarning>,
}

impl AcceptedQuery {
    pub fn sql(&self) -> &str {
        self.candidate.sql()
    }
}
