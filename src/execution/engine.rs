//! Polars SQL engine over the `holdings` and `trades` views.

use super::result::QueryResult;
use crate::error::EngineError;
use polars::prelude::*;
use polars::sql::SQLContext;
use std::path::Path;
use std::time::Instant;
use tracing::info;

/// Runs validated, read-only SQL.
pub trait QueryExecutor: Send + Sync {
    fn name(&self) -> &str;

    fn execute(&self, sql: &str) -> Result<QueryResult, EngineError>;
}

pub struct PolarsEngine {
    tables: Vec<(String, LazyFrame)>,
}

impl PolarsEngine {
    pub fn from_paths(holdings: &Path, trades: &Path) -> Result<Self, EngineError> {
        Ok(Self {
            tables: vec![
                ("holdings".to_string(), scan_file(holdings)?),
                ("trades".to_string(), scan_file(trades)?),
            ],
        })
    }

    /// In-memory tables, mostly for tests.
    pub fn from_frames<I, S>(frames: I) -> Self
    where
        I: IntoIterator<Item = (S, DataFrame)>,
        S: Into<String>,
    {
        Self {
            tables: frames
                .into_iter()
                .map(|(name, df)| (name.into(), df.lazy()))
                .collect(),
        }
    }

    /// Distinct non-null values of `column` in `table`, as text.
    pub fn distinct_values(&self, table: &str, column: &str) -> Result<Vec<String>, EngineError> {
        let lf = self
            .tables
            .iter()
            .find(|(name, _)| name == table)
            .map(|(_, lf)| lf.clone())
            .ok_or_else(|| EngineError::new(format!("table '{}' is not registered", table)))?;

        let df = lf
            .select([col(column).cast(DataType::String)])
            .unique(None, UniqueKeepStrategy::Any)
            .collect()?;
        let values = df
            .column(column)?
            .str()?
            .into_iter()
            .flatten()
            .map(|s| s.to_string())
            .collect();
        Ok(values)
    }
}

impl QueryExecutor for PolarsEngine {
    fn name(&self) -> &str {
        "polars"
    }

    fn execute(&self, sql: &str) -> Result<QueryResult, EngineError> {
        let start = Instant::now();
        let mut ctx = SQLContext::new();
        for (name, lf) in &self.tables {
            ctx.register(name, lf.clone());
        }
        let df = ctx.execute(sql)?.collect()?;
        let elapsed = start.elapsed().as_millis() as u64;
        info!("Executed query in {}ms ({} rows)", elapsed, df.height());
        QueryResult::from_dataframe(&df, elapsed)
    }
}

fn scan_file(path: &Path) -> Result<LazyFrame, EngineError> {
    if !path.exists() {
        return Err(EngineError::new(format!("dataset file not found: {}", path.display())));
    }
    let is_parquet = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("parquet"))
        .unwrap_or(false);

    let lf = if is_parquet {
        LazyFrame::scan_parquet(path, ScanArgsParquet::default())?
    } else {
        LazyCsvReader::new(path)
            .with_has_header(true)
            .with_infer_schema_length(Some(10_000))
            .finish()?
    };
    info!("Registered dataset {}", path.display());
    Ok(lf)
}
