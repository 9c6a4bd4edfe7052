use async_trait::async_trait;
use polars::prelude::*;
use portfolio_query::llm::{BackendError, CompletionBackend, Prompt};
use portfolio_query::{
    assemble, build_dispatcher, AppConfig, Origin, PolarsEngine, QueryExecutor, QueryResult,
    ReplyKind, RequestDispatcher, RowCap, SchemaRegistry,
};
use portfolio_query::error::EngineError;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn holdings() -> DataFrame {
    df!(
        "PortfolioName" => &["Garfield", "Garfield", "Heather", "Platpot"],
        "SecurityId" => &[101i64, 102, 103, 104],
        "SecName" => &["UST 10Y", "AAPL", "MSFT", "GM 2030"],
        "SecurityTypeName" => &["Bond", "Equity", "Equity", "Bond"],
        "Qty" => &[500.0, 1000.0, 2000.0, 300.0],
        "Price" => &[1000.0, 1200.0, 400.0, 1000.0],
        "MV_Base" => &[500000.0, 1200000.0, 800000.0, 300000.0],
        "MV_Local" => &[500000.0, 1200000.0, 800000.0, 300000.0],
        "PL_YTD" => &[1500.0, 25000.0, -4000.0, 800.0],
        "PL_MTD" => &[100.0, 2000.0, -300.0, 50.0],
        "PL_DTD" => &[10.0, 150.0, -20.0, 5.0],
        "CloseDate" => &[None, None, Some("2024-01-05"), None]
    )
    .unwrap()
}

fn trades() -> DataFrame {
    df!(
        "id" => &[1i64, 2, 3, 4, 5, 6],
        "PortfolioName" => &["Garfield", "Garfield", "Garfield", "Heather", "Heather", "Platpot"],
        "SecurityId" => &[101i64, 102, 101, 103, 103, 104],
        "SecurityType" => &["Bond", "Equity", "Bond", "Equity", "Equity", "Bond"],
        "Name" => &["UST 10Y", "AAPL", "UST 10Y", "MSFT", "MSFT", "GM 2030"],
        "TradeTypeName" => &["Buy", "Buy", "Sell", "Buy", "Sell", "Buy"],
        "Quantity" => &[600.0, 1000.0, 100.0, 2500.0, 500.0, 300.0],
        "Price" => &[990.0, 1150.0, 1005.0, 390.0, 410.0, 998.0],
        "Principal" => &[594000.0, 1150000.0, 100500.0, 975000.0, 205000.0, 299400.0],
        "TotalCash" => &[594100.0, 1150050.0, -100450.0, 975020.0, -204990.0, 299420.0],
        "AllocationQTY" => &[600.0, 1000.0, 100.0, 2500.0, 500.0, 300.0],
        "AllocationCash" => &[-594100.0, -1150050.0, 100450.0, -975020.0, 204990.0, -299420.0],
        "AllocationRule" => &["Pro-Rata", "Pro-Rata", "Manual", "Pro-Rata", "Pro-Rata", "Manual"],
        "IsCustomAllocation" => &[0i64, 0, 1, 0, 0, 1],
        "Counterparty" => &["JPM", "GS", "JPM", "MS", "GS", "JPM"],
        "TradeDate" => &["00:00.0"; 6],
        "SettleDate" => &["00:00.0"; 6]
    )
    .unwrap()
}

fn engine() -> PolarsEngine {
    PolarsEngine::from_frames(vec![("holdings", holdings()), ("trades", trades())])
}

/// Answers moderation prompts with `moderation` and everything else with `sql`.
struct Scripted {
    sql: String,
    moderation: String,
    delay: Duration,
}

impl Scripted {
    fn replying(sql: &str) -> Arc<dyn CompletionBackend> {
        Arc::new(Self {
            sql: sql.to_string(),
            moderation: "SAFE".to_string(),
            delay: Duration::ZERO,
        })
    }
}

#[async_trait]
impl CompletionBackend for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String, BackendError> {
        tokio::time::sleep(self.delay).await;
        if prompt.system.contains("content moderation") {
            Ok(self.moderation.clone())
        } else {
            Ok(self.sql.clone())
        }
    }
}

/// Remembers every statement that reached the engine.
struct Recording {
    inner: PolarsEngine,
    seen: Mutex<Vec<String>>,
}

impl QueryExecutor for Recording {
    fn name(&self) -> &str {
        "recording"
    }

    fn execute(&self, sql: &str) -> Result<QueryResult, EngineError> {
        self.seen.lock().unwrap().push(sql.to_string());
        self.inner.execute(sql)
    }
}

fn config(guardrail: bool) -> AppConfig {
    AppConfig::from_lookup(|key| match key {
        "LLM_BACKEND" => Some("none".to_string()),
        "INPUT_GUARDRAIL" => Some(guardrail.to_string()),
        _ => None,
    })
    .unwrap()
}

fn dispatcher_with(
    engine: Arc<dyn QueryExecutor>,
    backend: Option<Arc<dyn CompletionBackend>>,
    config: &AppConfig,
) -> RequestDispatcher {
    assemble(config, engine, SchemaRegistry::builtin(), backend).unwrap()
}

fn dispatcher(backend: Option<Arc<dyn CompletionBackend>>) -> RequestDispatcher {
    dispatcher_with(Arc::new(engine()), backend, &config(false))
}

#[tokio::test]
async fn test_trades_per_portfolio_from_template() {
    let dispatcher = dispatcher(None);
    let reply = dispatcher.handle("s1", "How many trades per portfolio?").await;

    assert_eq!(reply.kind, ReplyKind::Answer);
    assert_eq!(reply.origin, Some(Origin::Template));
    assert_eq!(reply.template_id.as_deref(), Some("count_trades_by_portfolio"));
    assert!(reply.sql.as_deref().unwrap().contains("GROUP BY PortfolioName"));
    assert_eq!(reply.answer, "Found 3 result(s).");

    let table = reply.table.unwrap();
    assert_eq!(table.columns, vec!["PortfolioName", "NumTrades", "TotalQty", "TotalValue"]);
    assert_eq!(table.rows[0][0], serde_json::json!("Garfield"));
    assert_eq!(table.rows[0][1].as_u64(), Some(3));
}

#[tokio::test]
async fn test_top_holdings_by_market_value() {
    let dispatcher = dispatcher(None);
    let reply = dispatcher.handle("s1", "Top 10 holdings by market value").await;

    let sql = reply.sql.as_deref().unwrap();
    assert!(sql.contains("ORDER BY MV_Base DESC"));
    assert!(sql.contains("LIMIT 10"));
    assert_eq!(reply.row_cap, Some(RowCap::Kept { limit: 10 }));

    let table = reply.table.unwrap();
    assert_eq!(table.row_count(), 4);
    assert_eq!(table.rows[0][2], serde_json::json!("AAPL"));
}

#[tokio::test]
async fn test_destructive_request_never_reaches_engine() {
    let recording = Arc::new(Recording {
        inner: engine(),
        seen: Mutex::new(Vec::new()),
    });
    let dispatcher = dispatcher_with(
        recording.clone(),
        Some(Scripted::replying("DROP TABLE trades")),
        &config(false),
    );

    let reply = dispatcher.handle("s1", "drop the trades table please").await;
    assert_eq!(reply.kind, ReplyKind::Failed);
    assert_eq!(reply.origin, Some(Origin::Generative));
    assert_eq!(reply.sql.as_deref(), Some("DROP TABLE trades"));
    assert!(reply.answer.contains("mutating keyword 'drop'"));
    assert!(recording.seen.lock().unwrap().is_empty());

    let after = dispatcher.handle("s1", "How many trades per portfolio?").await;
    assert_eq!(after.kind, ReplyKind::Answer);
}

#[tokio::test]
async fn test_guardrail_blocks_before_planning() {
    let backend: Arc<dyn CompletionBackend> = Arc::new(Scripted {
        sql: "SELECT * FROM trades".to_string(),
        moderation: "BLOCKED|DATA_MODIFICATION".to_string(),
        delay: Duration::ZERO,
    });
    let dispatcher = dispatcher_with(Arc::new(engine()), Some(backend), &config(true));

    let reply = dispatcher.handle("s1", "delete all trades for Garfield").await;
    assert_eq!(reply.kind, ReplyKind::Blocked);
    assert!(reply.answer.starts_with("[Data Modification]"));
    assert!(reply.sql.is_none());
}

#[tokio::test]
async fn test_backend_timeout_answers_within_bound() {
    let backend: Arc<dyn CompletionBackend> = Arc::new(Scripted {
        sql: "SELECT * FROM trades".to_string(),
        moderation: "SAFE".to_string(),
        delay: Duration::from_secs(5),
    });
    let mut cfg = config(false);
    cfg.llm_timeout = Duration::from_millis(50);
    let dispatcher = dispatcher_with(Arc::new(engine()), Some(backend), &cfg);

    let start = Instant::now();
    let reply = dispatcher.handle("s1", "which counterparty trades the most bonds").await;
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(reply.kind, ReplyKind::Failed);
    assert!(reply.answer.contains("could not answer"));
}

#[tokio::test]
async fn test_follow_up_reuses_previous_question() {
    let dispatcher = dispatcher(None);
    dispatcher.handle("s1", "How many trades per portfolio?").await;

    let reply = dispatcher.handle("s1", "now just for portfolio Garfield").await;
    assert_eq!(reply.kind, ReplyKind::Answer);
    assert_eq!(
        reply.resolved_question.as_deref(),
        Some("How many trades per portfolio for portfolio Garfield")
    );
    assert_eq!(reply.template_id.as_deref(), Some("trades_for_portfolio"));
    let table = reply.table.unwrap();
    assert_eq!(table.row_count(), 1);
    assert_eq!(table.rows[0][0], serde_json::json!("Garfield"));
    assert_eq!(table.rows[0][1].as_u64(), Some(3));

    let regrouped = dispatcher.handle("s1", "now show it by security type").await;
    assert_eq!(
        regrouped.resolved_question.as_deref(),
        Some("How many trades by security type")
    );
    assert_eq!(regrouped.template_id.as_deref(), Some("trades_by_security_type"));
}

#[tokio::test]
async fn test_follow_up_does_not_leak_across_sessions() {
    let dispatcher = dispatcher(None);
    dispatcher.handle("s1", "How many trades per portfolio?").await;

    let reply = dispatcher.handle("s2", "now just for portfolio Garfield").await;
    assert_eq!(reply.kind, ReplyKind::Failed);
    assert_eq!(reply.resolved_question.as_deref(), Some("now just for portfolio Garfield"));
}

#[tokio::test]
async fn test_ended_session_forgets_context() {
    let dispatcher = dispatcher(None);
    dispatcher.handle("s1", "How many trades per portfolio?").await;
    assert!(dispatcher.end_session("s1"));

    let reply = dispatcher.handle("s1", "now just for portfolio Garfield").await;
    assert_eq!(reply.kind, ReplyKind::Failed);
}

#[tokio::test]
async fn test_greeting_short_circuits() {
    let dispatcher = dispatcher(None);
    let reply = dispatcher.handle("s1", "Hello!").await;
    assert_eq!(reply.kind, ReplyKind::Greeting);
    assert!(reply.sql.is_none());
    assert!(dispatcher.sessions().is_empty());
}

#[tokio::test]
async fn test_generated_sql_is_capped_and_flagged() {
    let dispatcher = dispatcher(Some(Scripted::replying("```sql\nSELECT id, TradeDate FROM trades\n```")));
    let reply = dispatcher.handle("s1", "show me trade dates").await;

    assert_eq!(reply.kind, ReplyKind::Answer);
    assert_eq!(reply.origin, Some(Origin::Generative));
    assert_eq!(reply.row_cap, Some(RowCap::Injected { limit: 200 }));
    assert!(reply.sql.as_deref().unwrap().ends_with("LIMIT 200"));
    assert_eq!(reply.warnings.len(), 1);
    assert!(reply.answer.contains("> Note: trades.TradeDate"));
    assert_eq!(reply.table.unwrap().row_count(), 6);
}

#[tokio::test]
async fn test_engine_error_is_reported_with_sql() {
    let dispatcher = dispatcher(Some(Scripted::replying("SELECT NoSuchColumn FROM trades")));
    let reply = dispatcher.handle("s1", "show me the no such column").await;

    assert_eq!(reply.kind, ReplyKind::Failed);
    assert!(reply.answer.starts_with("The generated query failed to run"));
    assert!(reply.sql.as_deref().unwrap().contains("NoSuchColumn"));
}

#[tokio::test]
async fn test_sessions_run_concurrently() {
    let dispatcher = Arc::new(dispatcher(None));
    let (a, b) = tokio::join!(
        dispatcher.handle("a", "Portfolio summary"),
        dispatcher.handle("b", "P&L by security type")
    );
    assert_eq!(a.template_id.as_deref(), Some("portfolio_summary"));
    assert_eq!(b.template_id.as_deref(), Some("pnl_by_security_type"));
    assert_eq!(dispatcher.sessions().len(), 2);
}

#[tokio::test]
async fn test_bootstrap_from_csv_discovers_portfolios() {
    let dir = std::env::temp_dir().join(format!("portfolio-query-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();

    let extra = df!(
        "PortfolioName" => &["Blue Ridge"],
        "SecurityId" => &[201i64],
        "SecName" => &["IBM"],
        "SecurityTypeName" => &["Equity"],
        "Qty" => &[10.0],
        "Price" => &[150.0],
        "MV_Base" => &[1500.0],
        "MV_Local" => &[1500.0],
        "PL_YTD" => &[12.0],
        "PL_MTD" => &[1.0],
        "PL_DTD" => &[0.5],
        "CloseDate" => &[None::<&str>]
    )
    .unwrap();
    let mut holdings = holdings().vstack(&extra).unwrap();
    let mut trades = trades();
    CsvWriter::new(std::fs::File::create(dir.join("holdings.csv")).unwrap())
        .finish(&mut holdings)
        .unwrap();
    CsvWriter::new(std::fs::File::create(dir.join("trades.csv")).unwrap())
        .finish(&mut trades)
        .unwrap();

    let data_dir = dir.to_string_lossy().into_owned();
    let config = AppConfig::from_lookup(|key| match key {
        "LLM_BACKEND" => Some("none".to_string()),
        "DATA_DIR" => Some(data_dir.clone()),
        _ => None,
    })
    .unwrap();
    let dispatcher = build_dispatcher(&config).unwrap();
    assert!(dispatcher.schema().canonical_portfolio("blue ridge").is_some());

    let reply = dispatcher.handle("s1", "Show holdings for Blue Ridge").await;
    assert_eq!(reply.template_id.as_deref(), Some("holdings_for_portfolio"));
    assert_eq!(reply.answer, "Found 1 result(s).");

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn test_every_template_example_answers() {
    let dispatcher = dispatcher(None);
    let rules: Vec<(String, String)> = dispatcher
        .planner()
        .matcher()
        .templates()
        .rules()
        .iter()
        .map(|r| (r.id.clone(), r.example.clone()))
        .collect();
    assert_eq!(rules.len(), 13);

    for (id, example) in rules {
        let session = format!("example-{}", id);
        let reply = dispatcher.handle(&session, &example).await;
        assert_eq!(reply.kind, ReplyKind::Answer, "{}: {}", id, reply.answer);
        assert_eq!(reply.template_id.as_deref(), Some(id.as_str()));
        assert!(reply.table.is_some(), "{}", id);
    }
}

#[tokio::test]
async fn test_unique_securities_counts_open_positions() {
    let dispatcher = dispatcher(None);
    let reply = dispatcher.handle("s1", "How many unique securities are there?").await;
    assert_eq!(reply.kind, ReplyKind::Answer, "{}", reply.answer);
    let table = reply.table.unwrap();
    assert_eq!(table.columns, vec!["SecurityTypeName", "UniqueSecurities", "OpenSecurities"]);
    assert_eq!(table.row_count(), 2);
}

#[tokio::test]
async fn test_new_subject_is_not_merged_into_previous_question() {
    let dispatcher = dispatcher(None);
    dispatcher.handle("s1", "Top 10 holdings by market value").await;
    let pnl = dispatcher.handle("s1", "now show P&L by portfolio").await;
    assert_eq!(pnl.resolved_question.as_deref(), Some("now show P&L by portfolio"));
    assert_eq!(pnl.template_id.as_deref(), Some("pnl_by_portfolio"));

    dispatcher.handle("s2", "How many trades per portfolio?").await;
    let holdings = dispatcher.handle("s2", "and show holdings for Garfield").await;
    assert_eq!(holdings.template_id.as_deref(), Some("holdings_for_portfolio"));
    assert_eq!(holdings.table.unwrap().row_count(), 2);
}

#[tokio::test]
async fn test_empty_message_asks_for_input() {
    let dispatcher = dispatcher(None);
    let reply = dispatcher.handle("s1", "   ").await;
    assert_eq!(reply.kind, ReplyKind::NeedsInput);
    assert_ne!(dispatcher.handle("s1", "hi").await.kind, reply.kind);
    assert!(dispatcher.sessions().is_empty());
}

#[tokio::test]
async fn test_idle_sessions_do_not_accumulate() {
    let mut cfg = config(false);
    cfg.session_idle_timeout = Some(Duration::from_millis(20));
    let dispatcher = dispatcher_with(Arc::new(engine()), None, &cfg);

    for _ in 0..20 {
        let id = portfolio_query::context::SessionStore::new_session_id();
        dispatcher.handle(&id, "Portfolio summary").await;
    }
    tokio::time::sleep(Duration::from_millis(40)).await;
    dispatcher.handle("last", "Portfolio summary").await;
    assert_eq!(dispatcher.sessions().len(), 1);
}
