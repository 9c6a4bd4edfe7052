//! Execution
//!
//! The engine seam plus an async wrapper that moves blocking execution off
//! the runtime and bounds it with a timeout.

pub mod engine;
pub mod result;

pub use engine::{PolarsEngine, QueryExecutor};
pub use result::{format_cell, QueryResult};

use crate::error::EngineError;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub async fn execute_with_timeout(
    engine: Arc<dyn QueryExecutor>,
    sql: String,
    timeout: Duration,
) -> Result<QueryResult, EngineError> {
    let task = tokio::task::spawn_blocking(move || engine.execute(&sql));
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(EngineError::new(format!("query task failed: {}", join_error))),
        Err(_) => {
            warn!("Query exceeded {:?}", timeout);
            Err(EngineError::new(format!("query timed out after {:?}", timeout)))
        }
    }
}
