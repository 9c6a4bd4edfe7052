//! Builds the shared, immutable pieces from configuration and wires the
//! dispatcher. Any failure here is fatal at startup.

use crate::config::AppConfig;
use crate::context::SessionStore;
use crate::dispatcher::RequestDispatcher;
use crate::error::{AssistantError, Result};
use crate::execution::{PolarsEngine, QueryExecutor};
use crate::generation::SqlGenerator;
use crate::llm::{CompletionBackend, LlmClient};
use crate::planner::QueryPlanner;
use crate::safety::{InputGuard, SqlValidator};
use crate::schema::SchemaRegistry;
use crate::templates::{TemplateMatcher, TemplateSet};
use std::sync::Arc;
use tracing::{info, warn};

/// Loads the datasets named in `config` and assembles the full pipeline.
pub fn build_dispatcher(config: &AppConfig) -> Result<RequestDispatcher> {
    let engine = PolarsEngine::from_paths(&config.holdings_path, &config.trades_path)?;

    let mut discovered = Vec::new();
    for table in ["holdings", "trades"] {
        match engine.distinct_values(table, "PortfolioName") {
            Ok(names) => discovered.extend(names),
            Err(e) => warn!("Could not list portfolio names in {}: {}", table, e),
        }
    }
    let schema = SchemaRegistry::builtin().with_portfolio_names(discovered);

    let backend = match &config.llm {
        Some(settings) => {
            let client = LlmClient::from_settings(settings, config.llm_timeout)
                .map_err(|e| AssistantError::Llm(e.to_string()))?;
            info!("Generative tier enabled ({})", client.name());
            Some(Arc::new(client) as Arc<dyn CompletionBackend>)
        }
        None => {
            info!("Generative tier disabled; answering from templates only");
            None
        }
    };

    assemble(config, Arc::new(engine), schema, backend)
}

/// Wires the pipeline around an already-built engine and backend.
pub fn assemble(
    config: &AppConfig,
    engine: Arc<dyn QueryExecutor>,
    schema: SchemaRegistry,
    backend: Option<Arc<dyn CompletionBackend>>,
) -> Result<RequestDispatcher> {
    let schema = Arc::new(schema);
    let templates = Arc::new(TemplateSet::builtin()?);
    info!(
        "Registered {} templates; {} known portfolios",
        templates.len(),
        schema.portfolio_names().len()
    );

    let matcher = TemplateMatcher::new(templates, schema.clone());
    let validator = SqlValidator::new(schema.clone(), config.default_row_limit, config.max_row_limit);
    let generator = backend.clone().map(|b| {
        SqlGenerator::new(b, schema.clone(), config.llm_timeout).with_max_history(config.conversation_window)
    });
    let guard = backend
        .filter(|_| config.input_guardrail)
        .map(|b| InputGuard::new(b, config.llm_timeout));

    let planner = QueryPlanner::new(matcher, generator, validator);
    Ok(RequestDispatcher::new(
        planner,
        engine,
        schema,
        SessionStore::new(config.conversation_window).with_idle_timeout(config.session_idle_timeout),
        config.query_timeout,
    )
    .with_guard(guard))
}
