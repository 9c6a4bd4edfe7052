//! Schema Registry
//!
//! Static description of the `holdings` and `trades` views: columns, semantic
//! types, data caveats, the known portfolio names and the user-term catalog.
//! Built once at startup and shared read-only.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SemanticType {
    Text,
    Integer,
    Float,
    DateLike,
}

impl SemanticType {
    fn sql_name(&self) -> &'static str {
        match self {
            SemanticType::Text => "TEXT",
            SemanticType::Integer => "INTEGER",
            SemanticType::Float => "DOUBLE",
            SemanticType::DateLike => "DATE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Caveat {
    /// Values exist but are not real dates.
    UnreliableDate,
}

impl Caveat {
    pub fn describe(&self) -> &'static str {
        match self {
            Caveat::UnreliableDate => "carries no reliable date values in this dataset",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub semantic_type: SemanticType,
    pub nullable: bool,
    pub caveat: Option<Caveat>,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub description: String,
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// One row of the "what users say → which column" catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TermMapping {
    pub user_terms: String,
    pub columns: String,
    pub table: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaRegistry {
    tables: Vec<TableSchema>,
    portfolio_names: Vec<String>,
    catalog: Vec<TermMapping>,
}

fn col(
    name: &str,
    semantic_type: SemanticType,
    nullable: bool,
    caveat: Option<Caveat>,
    description: &str,
) -> ColumnSchema {
    ColumnSchema {
        name: name.to_string(),
        semantic_type,
        nullable,
        caveat,
        description: description.to_string(),
    }
}

fn term(user_terms: &str, columns: &str, table: &str) -> TermMapping {
    TermMapping {
        user_terms: user_terms.to_string(),
        columns: columns.to_string(),
        table: table.to_string(),
    }
}

const KNOWN_PORTFOLIOS: &[&str] = &[
    "Garfield",
    "Heather",
    "MNC Investment Fund",
    "Opium Holdings Partners",
    "Platpot",
    "Ytum",
    "NorthPoint",
    "HoldCo 1",
    "Redfield Accu-Fund",
    "UNC Investment Fund",
];

impl SchemaRegistry {
    /// The two tables this assistant knows about.
    pub fn builtin() -> Self {
        use SemanticType::*;

        let holdings = TableSchema {
            name: "holdings".to_string(),
            description: "Portfolio positions snapshot".to_string(),
            columns: vec![
                col("PortfolioName", Text, false, None, "Name of the portfolio"),
                col("SecurityId", Integer, false, None, "Security identifier"),
                col("SecName", Text, true, None, "Security name"),
                col("SecurityTypeName", Text, true, None, "Type of security (Bond, Equity, AssetBacked, ...)"),
                col("Qty", Float, true, None, "Quantity held"),
                col("Price", Float, true, None, "Current price"),
                col("MV_Base", Float, true, None, "Market value in base currency (USD)"),
                col("MV_Local", Float, true, None, "Market value in local currency"),
                col("PL_YTD", Float, true, None, "Year-to-date profit/loss"),
                col("PL_MTD", Float, true, None, "Month-to-date profit/loss"),
                col("PL_DTD", Float, true, None, "Day-to-date profit/loss"),
                col("CloseDate", DateLike, true, None, "Date the position was closed, NULL while open"),
            ],
        };

        let trades = TableSchema {
            name: "trades".to_string(),
            description: "Transaction events".to_string(),
            columns: vec![
                col("id", Integer, false, None, "Trade identifier (one trade may have several allocations)"),
                col("PortfolioName", Text, false, None, "Portfolio name"),
                col("SecurityId", Integer, false, None, "Security identifier"),
                col("SecurityType", Text, true, None, "Type of security"),
                col("Name", Text, true, None, "Security name"),
                col("TradeTypeName", Text, true, None, "Type of trade (Buy, Sell)"),
                col("Quantity", Float, true, None, "Trade quantity"),
                col("Price", Float, true, None, "Trade price"),
                col("Principal", Float, true, None, "Principal amount"),
                col("TotalCash", Float, true, None, "Total cash amount"),
                col("AllocationQTY", Float, true, None, "Allocated quantity"),
                col("AllocationCash", Float, true, None, "Allocated cash amount"),
                col("AllocationRule", Text, true, None, "Allocation rule applied"),
                col("IsCustomAllocation", Integer, true, None, "1 when the allocation was customised"),
                col("Counterparty", Text, true, None, "Trade counterparty"),
                col("TradeDate", DateLike, true, Some(Caveat::UnreliableDate), "Trade date"),
                col("SettleDate", DateLike, true, Some(Caveat::UnreliableDate), "Settlement date"),
            ],
        };

        let catalog = vec![
            term("portfolio, fund, account", "PortfolioName", "both"),
            term("security, stock, bond, asset, instrument", "SecurityId, SecName, Name", "both"),
            term("security type, asset class, type", "SecurityTypeName (holdings), SecurityType (trades)", "both"),
            term("quantity, shares, units, amount", "Qty (holdings), Quantity (trades)", "both"),
            term("price, value per unit", "Price", "both"),
            term("market value, mv, value, worth", "MV_Base", "holdings"),
            term("local value, local mv", "MV_Local", "holdings"),
            term("pnl, p&l, profit, loss, gain, return", "PL_YTD, PL_MTD, PL_DTD", "holdings"),
            term("ytd, year to date", "PL_YTD", "holdings"),
            term("mtd, month to date", "PL_MTD", "holdings"),
            term("dtd, day to date, today", "PL_DTD", "holdings"),
            term("trade type, buy, sell, action", "TradeTypeName", "trades"),
            term("principal, notional", "Principal", "trades"),
            term("cash, total cash", "TotalCash", "trades"),
            term("allocation", "AllocationQTY, AllocationCash, AllocationRule", "trades"),
        ];

        Self {
            tables: vec![holdings, trades],
            portfolio_names: KNOWN_PORTFOLIOS.iter().map(|s| s.to_string()).collect(),
            catalog,
        }
    }

    /// Adds portfolio names discovered in the loaded data. Duplicates
    /// (case-insensitive) and blanks are ignored.
    pub fn with_portfolio_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            let name = name.into();
            let trimmed = name.trim();
            if trimmed.is_empty() || self.canonical_portfolio(trimmed).is_some() {
                continue;
            }
            self.portfolio_names.push(trimmed.to_string());
        }
        self
    }

    pub fn tables(&self) -> &[TableSchema] {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn is_known_table(&self, name: &str) -> bool {
        self.table(name).is_some()
    }

    pub fn portfolio_names(&self) -> &[String] {
        &self.portfolio_names
    }

    /// Case-insensitive lookup returning the registry's spelling.
    pub fn canonical_portfolio(&self, candidate: &str) -> Option<&str> {
        let candidate = candidate.trim();
        self.portfolio_names
            .iter()
            .find(|n| n.eq_ignore_ascii_case(candidate))
            .map(|n| n.as_str())
    }

    /// (table, column) pairs that carry a caveat.
    pub fn caveated_columns(&self) -> impl Iterator<Item = (&TableSchema, &ColumnSchema)> {
        self.tables
            .iter()
            .flat_map(|t| t.columns.iter().map(move |c| (t, c)))
            .filter(|(_, c)| c.caveat.is_some())
    }

    /// Markdown description used as grounding in generative prompts.
    pub fn describe(&self) -> String {
        let mut out = String::from("# Database Schema\n");
        for table in &self.tables {
            let _ = write!(out, "\n## Table: {}\n{}\n\nColumns:\n", table.name, table.description);
            for c in &table.columns {
                let _ = write!(out, "- {} ({}): {}", c.name, c.semantic_type.sql_name(), c.description);
                if let Some(caveat) = c.caveat {
                    let _ = write!(out, " (NOTE: {})", caveat.describe());
                }
                out.push('\n');
            }
        }

        out.push_str("\n## Data Catalog - Column Name Mappings\n\n");
        out.push_str("| User Says | Actual Column | Table |\n|---|---|---|\n");
        for m in &self.catalog {
            let _ = writeln!(out, "| {} | {} | {} |", m.user_terms, m.columns, m.table);
        }

        out.push_str("\n## Important Notes:\n");
        out.push_str("- Both tables exist as views; no other tables are available\n");
        for (table, column) in self.caveated_columns() {
            if let Some(caveat) = column.caveat {
                let _ = writeln!(out, "- {}.{} {} - avoid using it", table.name, column.name, caveat.describe());
            }
        }
        let _ = writeln!(out, "- Portfolio names include: {}", self.portfolio_names.join(", "));
        out
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_tables_case_insensitive() {
        let registry = SchemaRegistry::builtin();
        assert!(registry.is_known_table("holdings"));
        assert!(registry.is_known_table("TRADES"));
        assert!(!registry.is_known_table("positions"));
    }

    #[test]
    fn test_caveated_columns_are_trade_dates() {
        let registry = SchemaRegistry::builtin();
        let names: Vec<&str> = registry
            .caveated_columns()
            .map(|(_, c)| c.name.as_str())
            .collect();
        assert_eq!(names, vec!["TradeDate", "SettleDate"]);
    }

    #[test]
    fn test_discovered_portfolios_are_deduplicated() {
        let registry = SchemaRegistry::builtin()
            .with_portfolio_names(vec!["garfield", "Blue Ridge", "  ", "Blue Ridge"]);
        assert_eq!(registry.canonical_portfolio("GARFIELD"), Some("Garfield"));
        assert_eq!(registry.canonical_portfolio("blue ridge"), Some("Blue Ridge"));
        assert_eq!(
            registry.portfolio_names().iter().filter(|n| *n == "Blue Ridge").count(),
            1
        );
    }

    #[test]
    fn test_describe_mentions_caveats() {
        let text = SchemaRegistry::builtin().describe();
        assert!(text.contains("## Table: holdings"));
        assert!(text.contains("trades.TradeDate carries no reliable date values"));
    }
}
