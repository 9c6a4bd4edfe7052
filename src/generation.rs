//! Generative Fallback
//!
//! Asks a text-generation backend for SQL when no template matched. One call
//! per question, bounded by a timeout; the reply is mined for a single SQL
//! statement which still has to pass the validator.

use crate::candidate::QueryCandidate;
use crate::context::ConversationTurn;
use crate::error::GenerationFailure;
use crate::llm::{BackendError, CompletionBackend, Prompt};
use crate::safety::MUTATING_KEYWORDS;
use crate::schema::SchemaRegistry;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const STATEMENT_KEYWORDS: &[&str] = &["select", "with", "explain", "show", "describe", "values"];

const QUERY_PATTERNS: &str = r#"QUERY PATTERNS:
- "how many X per Y" -> SELECT Y, COUNT(*) FROM table GROUP BY Y
- "top N X by Y" -> SELECT ... FROM table ORDER BY Y DESC LIMIT N
- "total/sum of X" -> SELECT SUM(X) FROM table
- "X for portfolio Y" -> SELECT ... FROM table WHERE PortfolioName = 'Y'
- "list all X" -> SELECT DISTINCT X FROM table

EXAMPLES:

Q: How many trades per portfolio?
SELECT PortfolioName, COUNT(*) AS NumTrades FROM trades GROUP BY PortfolioName ORDER BY NumTrades DESC

Q: Top 10 holdings by market value
SELECT PortfolioName, SecName, MV_Base FROM holdings ORDER BY MV_Base DESC LIMIT 10

Q: Total market value by portfolio
SELECT PortfolioName, SUM(MV_Base) AS TotalMV FROM holdings GROUP BY PortfolioName ORDER BY TotalMV DESC

Q: Holdings for Garfield portfolio
SELECT SecName, SecurityTypeName, Qty, MV_Base, PL_YTD FROM holdings WHERE PortfolioName = 'Garfield'

Q: Average P&L by security type
SELECT SecurityTypeName, AVG(PL_YTD) AS AvgPnL, COUNT(*) AS Count FROM holdings GROUP BY SecurityTypeName ORDER BY AvgPnL DESC"#;

pub struct SqlGenerator {
    backend: Arc<dyn CompletionBackend>,
    schema: Arc<SchemaRegistry>,
    timeout: Duration,
    max_history: usize,
}

impl SqlGenerator {
    pub fn new(backend: Arc<dyn CompletionBackend>, schema: Arc<SchemaRegistry>, timeout: Duration) -> Self {
        Self {
            backend,
            schema,
            timeout,
            max_history: 3,
        }
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub async fn generate(
        &self,
        question: &str,
        history: &[ConversationTurn],
    ) -> Result<QueryCandidate, GenerationFailure> {
        let prompt = self.build_prompt(question, history);
        debug!("Generative prompt user part:\n{}", prompt.user);

        let reply = match tokio::time::timeout(self.timeout, self.backend.complete(&prompt)).await {
            Err(_) | Ok(Err(BackendError::Timeout)) => {
                warn!("{} timed out after {:?}", self.backend.name(), self.timeout);
                return Err(GenerationFailure::BackendTimeout(self.timeout));
            }
            Ok(Err(e)) => {
                warn!("{} failed: {}", self.backend.name(), e);
                return Err(GenerationFailure::BackendUnavailable(e.to_string()));
            }
            Ok(Ok(reply)) => reply,
        };

        match extract_sql(&reply) {
            Some(sql) => {
                info!("Generated SQL via {}", self.backend.name());
                Ok(QueryCandidate::generated(sql, reply))
            }
            None => {
                warn!("No SQL found in {} reply", self.backend.name());
                Err(GenerationFailure::UnparsableResponse(reply))
            }
        }
    }

    pub fn build_prompt(&self, question: &str, history: &[ConversationTurn]) -> Prompt {
        let mut system = String::from(
            "You are an expert SQL query generator. Your ONLY job is to output a valid SQL query.\n\n\
             CRITICAL RULES:\n\
             1. Output ONLY the SQL query - no explanations\n\
             2. Output exactly one read-only SELECT statement; never modify data\n",
        );
        let tables: Vec<&str> = self.schema.tables().iter().map(|t| t.name.as_str()).collect();
        let _ = writeln!(system, "3. Use ONLY these tables: {}", tables.join(", "));
        let caveated: Vec<&str> = self
            .schema
            .caveated_columns()
            .map(|(_, c)| c.name.as_str())
            .collect();
        if !caveated.is_empty() {
            let _ = writeln!(
                system,
                "4. NEVER use the {} columns (they hold no reliable values)",
                caveated.join(" or ")
            );
        }
        system.push_str(
            "5. ALWAYS put clauses in this order: SELECT, FROM, WHERE, GROUP BY, HAVING, ORDER BY, LIMIT\n\
             6. Only add LIMIT if the user explicitly asks for a specific number (e.g. \"top 10\")\n\n",
        );
        system.push_str(&self.schema.describe());
        system.push('\n');
        system.push_str(QUERY_PATTERNS);
        system.push_str("\n\nNow generate SQL for the user's question. Output ONLY the SQL query, nothing else.");

        let mut user = String::new();
        let start = history.len().saturating_sub(self.max_history);
        let recent = &history[start..];
        if !recent.is_empty() {
            user.push_str("## Previous Conversation:\n");
            for turn in recent {
                let _ = writeln!(user, "User: {}", turn.question);
                if let Some(sql) = &turn.sql {
                    let _ = writeln!(user, "SQL: {}", sql);
                }
                if !turn.summary.is_empty() {
                    let _ = writeln!(user, "Result: {}", turn.summary);
                }
            }
            user.push('\n');
        }
        let _ = write!(user, "## Current Question:\n{}", question);

        Prompt::new(system, user)
    }
}

fn starts_statement(line: &str) -> bool {
    let first = line
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or("")
        .to_lowercase();
    STATEMENT_KEYWORDS.contains(&first.as_str()) || MUTATING_KEYWORDS.contains(&first.as_str())
}

/// First fenced code block, else the first line that opens a SQL statement
/// through the next blank line.
pub fn extract_sql(reply: &str) -> Option<String> {
    if let Some(open) = reply.find("```") {
        let after = &reply[open + 3..];
        // Skip the language tag line.
        let body = after.split_once('\n').map(|(_, rest)| rest).unwrap_or("");
        let block = body.split("```").next().unwrap_or("").trim();
        if !block.is_empty() {
            return Some(block.to_string());
        }
    }

    let mut lines = reply.lines().skip_while(|l| !starts_statement(l.trim()));
    let first = lines.next()?;
    let mut sql = first.trim().to_string();
    for line in lines.take_while(|l| !l.trim().is_empty()) {
        sql.push('\n');
        sql.push_str(line.trim_end());
    }
    Some(sql)
}
