//! Query Result - engine output converted to JSON-valued rows

use crate::error::EngineError;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write as _;

const MAX_CELL_CHARS: usize = 40;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub execution_time_ms: u64,
}

impl QueryResult {
    pub fn from_dataframe(df: &DataFrame, execution_time_ms: u64) -> Result<Self, EngineError> {
        let columns: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
        let mut rows = Vec::with_capacity(df.height());
        for row_idx in 0..df.height() {
            let mut row = Vec::with_capacity(columns.len());
            for series in df.get_columns() {
                row.push(series_to_json_value(series, row_idx)?);
            }
            rows.push(row);
        }
        Ok(Self {
            columns,
            rows,
            execution_time_ms,
        })
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The value of a 1x1 result.
    pub fn single_value(&self) -> Option<&Value> {
        match (self.columns.len(), self.rows.as_slice()) {
            (1, [row]) => row.first(),
            _ => None,
        }
    }

    /// Markdown table followed by a row count line.
    pub fn to_markdown(&self) -> String {
        if self.columns.is_empty() {
            return String::new();
        }
        let mut out = String::new();
        let _ = writeln!(out, "| {} |", self.columns.join(" | "));
        let _ = writeln!(out, "|{}", "---|".repeat(self.columns.len()));
        for row in &self.rows {
            let cells: Vec<String> = row.iter().map(format_cell).collect();
            let _ = writeln!(out, "| {} |", cells.join(" | "));
        }
        let _ = write!(out, "\n*{} rows*", self.rows.len());
        out
    }
}

/// Human rendering of one cell: thousands separators, two decimals for
/// floats, long text truncated, pipes escaped.
pub fn format_cell(value: &Value) -> String {
    let text = match value {
        Value::Null => String::new(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                group_thousands(&i.to_string())
            } else if let Some(u) = n.as_u64() {
                group_thousands(&u.to_string())
            } else if let Some(f) = n.as_f64() {
                group_thousands(&format!("{:.2}", f))
            } else {
                n.to_string()
            }
        }
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let text = if text.chars().count() > MAX_CELL_CHARS {
        let truncated: String = text.chars().take(MAX_CELL_CHARS - 3).collect();
        format!("{}...", truncated)
    } else {
        text
    };
    text.replace('|', "\\|")
}

fn group_thousands(number: &str) -> String {
    let (sign, unsigned) = match number.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", number),
    };
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (unsigned, None),
    };
    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    match frac_part {
        Some(f) => format!("{}{}.{}", sign, grouped, f),
        None => format!("{}{}", sign, grouped),
    }
}

fn series_to_json_value(series: &Series, row_idx: usize) -> Result<Value, EngineError> {
    let any_val = series
        .get(row_idx)
        .map_err(|e| EngineError::new(format!("Failed to get value: {}", e)))?;

    Ok(match any_val {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => Value::Bool(b),
        AnyValue::String(s) => Value::String(s.to_string()),
        AnyValue::StringOwned(s) => Value::String(s.to_string()),
        AnyValue::Int8(i) => Value::Number(i.into()),
        AnyValue::Int16(i) => Value::Number(i.into()),
        AnyValue::Int32(i) => Value::Number(i.into()),
        AnyValue::Int64(i) => Value::Number(i.into()),
        AnyValue::UInt8(u) => Value::Number(u.into()),
        AnyValue::UInt16(u) => Value::Number(u.into()),
        AnyValue::UInt32(u) => Value::Number(u.into()),
        AnyValue::UInt64(u) => Value::Number(u.into()),
        AnyValue::Float32(f) => serde_json::Number::from_f64(f as f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        AnyValue::Float64(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        other => Value::String(other.to_string()),
    })
}
