//! Request Dispatcher
//!
//! One entry point per incoming message: greeting short-circuit, input
//! guardrail, reference resolution, planning, execution and packaging. The
//! session lock is held for the whole request.

use crate::candidate::{Origin, RowCap};
use crate::context::{resolve_reference, SessionStore};
use crate::error::{GenerationFailure, PlanningFailure};
use crate::execution::{execute_with_timeout, format_cell, QueryExecutor, QueryResult};
use crate::planner::QueryPlanner;
use crate::safety::{GuardVerdict, InputGuard};
use crate::schema::SchemaRegistry;
use serde::Serialize;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const GREETINGS: &[(&str, &str)] = &[
    ("good morning", "Good morning! How can I help with your data today?"),
    ("good afternoon", "Good afternoon! What data would you like to explore?"),
    ("good evening", "Good evening! Ready to answer your data questions."),
    ("thank you", "You're welcome! Feel free to ask more questions."),
    ("thanks", "You're welcome! Let me know if you have more questions."),
    ("goodbye", "Goodbye! Happy to help again anytime."),
    ("hello", "Hello! Ask me anything about your Holdings and Trades data."),
    ("hey", "Hey! Ready to help with your data queries."),
    ("bye", "Goodbye! Come back anytime you need data insights."),
    ("hi", "Hi! What would you like to know about your data?"),
];

const DATA_NOUNS: &[&str] = &[
    "trade", "holding", "portfolio", "position", "securit", "p&l", "pnl", "profit", "market",
    "value", "price", "quantit", "fund", "allocation", "top", "how many", "count", "show", "list",
];

const EMPTY_PROMPT: &str = "Please ask a question about your holdings or trades, e.g. \"Top 10 holdings by market value\".";

const EXAMPLES: &str = "**Examples:**\n- \"Top 10 holdings by market value\"\n- \"How many trades per portfolio?\"\n- \"Show holdings for Garfield\"";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    Empty,
    Greeting(&'static str),
    DataQuestion,
}

/// Greeting when the whole message is a greeting, or when a short message
/// opens with one and names nothing data-related.
pub fn classify_message(text: &str) -> MessageClass {
    let lowered = text
        .trim()
        .trim_end_matches(|c: char| matches!(c, '!' | '.' | '?' | ','))
        .to_lowercase();
    if lowered.is_empty() {
        return MessageClass::Empty;
    }

    if let Some((_, reply)) = GREETINGS.iter().find(|(g, _)| *g == lowered) {
        return MessageClass::Greeting(reply);
    }

    let word_count = lowered.split_whitespace().count();
    let mentions_data = DATA_NOUNS.iter().any(|noun| lowered.contains(noun));
    if word_count <= 4 && !mentions_data {
        for (greeting, reply) in GREETINGS {
            if let Some(rest) = lowered.strip_prefix(greeting) {
                if rest.starts_with(|c: char| c.is_whitespace() || c == ',' || c == '!') {
                    return MessageClass::Greeting(reply);
                }
            }
        }
    }

    MessageClass::DataQuestion
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyKind {
    /// Nothing was asked; the answer prompts for a question.
    NeedsInput,
    Greeting,
    Blocked,
    Answer,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub session_id: String,
    pub kind: ReplyKind,
    pub answer: String,
    /// The question actually planned, after follow-up resolution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_question: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<QueryResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<Origin>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_cap: Option<RowCap>,
    pub warnings: Vec<String>,
}

impl ChatReply {
    fn text(session_id: &str, kind: ReplyKind, answer: impl Into<String>) -> Self {
        Self {
            session_id: session_id.to_string(),
            kind,
            answer: answer.into(),
            resolved_question: None,
            table: None,
            sql: None,
            origin: None,
            template_id: None,
            row_cap: None,
            warnings: Vec::new(),
        }
    }
}

pub struct RequestDispatcher {
    planner: QueryPlanner,
    engine: Arc<dyn QueryExecutor>,
    schema: Arc<SchemaRegistry>,
    sessions: SessionStore,
    guard: Option<InputGuard>,
    query_timeout: Duration,
}

impl RequestDispatcher {
    pub fn new(
        planner: QueryPlanner,
        engine: Arc<dyn QueryExecutor>,
        schema: Arc<SchemaRegistry>,
        sessions: SessionStore,
        query_timeout: Duration,
    ) -> Self {
        Self {
            planner,
            engine,
            schema,
            sessions,
            guard: None,
            query_timeout,
        }
    }

    pub fn with_guard(mut self, guard: Option<InputGuard>) -> Self {
        self.guard = guard;
        self
    }

    pub fn planner(&self) -> &QueryPlanner {
        &self.planner
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn end_session(&self, session_id: &str) -> bool {
        self.sessions.end(session_id)
    }

    pub async fn handle(&self, session_id: &str, text: &str) -> ChatReply {
        match classify_message(text) {
            MessageClass::Empty => return ChatReply::text(session_id, ReplyKind::NeedsInput, EMPTY_PROMPT),
            MessageClass::Greeting(reply) => return ChatReply::text(session_id, ReplyKind::Greeting, reply),
            MessageClass::DataQuestion => {}
        }

        let session = self.sessions.session(session_id);
        let mut session = session.lock().await;

        if let Some(guard) = &self.guard {
            if let GuardVerdict::Blocked(category) = guard.check(text).await {
                return ChatReply::text(session_id, ReplyKind::Blocked, category.message());
            }
        }

        let question = resolve_reference(session.window.last_with_sql(), text.trim(), &self.schema);
        let history = session.window.snapshot();

        let planned = match self.planner.plan(&question, &history).await {
            Ok(planned) => planned,
            Err(failure) => {
                let reply = self.planning_failed(session_id, &question, &failure);
                let summary = format!("failed: {}", failure);
                session.window.append(question, reply.sql.clone(), summary);
                return reply;
            }
        };

        let accepted = planned.accepted;
        let sql = accepted.sql().to_string();
        let mut reply = ChatReply::text(session_id, ReplyKind::Answer, "");
        reply.resolved_question = Some(question.clone());
        reply.sql = Some(sql.clone());
        reply.origin = Some(accepted.candidate.origin());
        reply.template_id = accepted.candidate.template_id().map(str::to_string);
        reply.row_cap = Some(accepted.row_cap);
        reply.warnings = accepted.warnings.iter().map(|w| w.message.clone()).collect();

        match execute_with_timeout(self.engine.clone(), sql.clone(), self.query_timeout).await {
            Ok(result) => {
                reply.answer = package_answer(&result, accepted.row_cap, &reply.warnings);
                let summary = format!("{} rows: {}", result.row_count(), result.columns.join(", "));
                info!("Answered '{}' with {} rows", question, result.row_count());
                reply.table = Some(result);
                session.window.append(question, Some(sql), summary);
            }
            Err(e) => {
                warn!("Query failed to run: {}", e);
                reply.kind = ReplyKind::Failed;
                reply.answer = format!("The generated query failed to run: {}", e);
                session.window.append(question, Some(sql), format!("failed: {}", e));
            }
        }
        reply
    }

    fn planning_failed(&self, session_id: &str, question: &str, failure: &PlanningFailure) -> ChatReply {
        let mut reply = ChatReply::text(session_id, ReplyKind::Failed, "");
        reply.resolved_question = Some(question.to_string());
        match failure {
            PlanningFailure::NoCandidate(GenerationFailure::BackendTimeout(limit)) => {
                reply.answer = format!(
                    "I could not answer that in time (no reply within {}s). Please try again or rephrase.\n\n{}",
                    limit.as_secs_f32(),
                    EXAMPLES
                );
            }
            PlanningFailure::NoCandidate(reason) => {
                info!("No candidate for '{}': {}", question, reason);
                reply.answer = format!(
                    "I could not answer that question. Please try rephrasing it as a data query.\n\n{}",
                    EXAMPLES
                );
            }
            PlanningFailure::RejectedSql { sql, origin, reason } => {
                reply.answer = format!("I could not run that query safely: {}.", reason);
                reply.sql = Some(sql.clone());
                reply.origin = Some(*origin);
            }
        }
        reply
    }
}

fn package_answer(result: &QueryResult, row_cap: RowCap, warnings: &[String]) -> String {
    let mut answer = if result.is_empty() {
        "No data found matching your query.".to_string()
    } else if let Some(value) = result.single_value() {
        format!("**Result:** {}", format_cell(value))
    } else {
        format!("Found {} result(s).", result.row_count())
    };

    if let RowCap::Injected { limit } | RowCap::Clamped { applied: limit, .. } = row_cap {
        if result.row_count() as u64 >= limit {
            let _ = write!(answer, " Showing the first {} rows.", limit);
        }
    }
    for warning in warnings {
        let _ = write!(answer, "\n\n> Note: {}.", warning);
    }
    answer
}
