//! SQL Safety Validator
//!
//! Token-level checks run first so that obfuscated input never reaches the
//! parser; the AST is then used for statement kind, relations, row caps and
//! caveated columns.

use crate::candidate::{AcceptedQuery, ColumnWarning, QueryCandidate, RowCap};
use crate::error::ValidationRejection;
use crate::schema::SchemaRegistry;
use sqlparser::ast::{
    visit_relations, Expr, Fetch, ObjectName, Query, SetExpr, Statement, TableFactor, Value, Visit,
    Visitor,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};
use std::collections::{BTreeSet, HashSet};
use std::ops::ControlFlow;
use std::sync::Arc;
use tracing::{debug, warn};

/// Words that never appear as bare tokens in a read-only statement.
pub const MUTATING_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "drop", "alter", "create", "truncate", "attach", "detach",
    "copy", "pragma", "grant", "revoke", "merge", "replace", "install", "load", "export",
    "import", "call", "exec", "execute", "vacuum", "checkpoint", "set",
];

/// Mutating words that are also ordinary scalar functions when called.
const FUNCTION_NAMES: &[&str] = &["replace"];

pub struct SqlValidator {
    schema: Arc<SchemaRegistry>,
    default_limit: u64,
    max_limit: u64,
}

impl SqlValidator {
    pub fn new(schema: Arc<SchemaRegistry>, default_limit: u64, max_limit: u64) -> Self {
        Self {
            schema,
            default_limit: default_limit.min(max_limit),
            max_limit,
        }
    }

    pub fn validate(&self, candidate: &QueryCandidate) -> Result<AcceptedQuery, ValidationRejection> {
        let result = self.check(candidate);
        if let Err(reason) = &result {
            warn!("Rejected {} SQL: {}", candidate.origin(), reason);
        }
        result
    }

    fn check(&self, candidate: &QueryCandidate) -> Result<AcceptedQuery, ValidationRejection> {
        let sql = candidate.sql();

        let tokens = Tokenizer::new(&GenericDialect {}, sql)
            .tokenize()
            .map_err(|e| ValidationRejection::UnparsableStatement(e.to_string()))?;
        check_single_statement(&tokens)?;
        check_mutating_words(&tokens)?;

        let mut statements = Parser::parse_sql(&GenericDialect {}, sql)
            .map_err(|e| ValidationRejection::UnparsableStatement(e.to_string()))?;
        if statements.len() != 1 {
            return Err(match statements.len() {
                0 => ValidationRejection::UnparsableStatement("empty statement".to_string()),
                count => ValidationRejection::MultiStatementRejected { count },
            });
        }
        let mut statement = statements.remove(0);

        let Statement::Query(query) = &mut statement else {
            return Err(ValidationRejection::NotReadOnly(statement_kind(&statement)));
        };

        let mut inspector = Inspector::default();
        inspector.inspect_query(&**query);
        let _ = query.visit(&mut inspector);
        if inspector.select_into {
            return Err(ValidationRejection::NotReadOnly("SELECT INTO".to_string()));
        }
        self.check_relations(&**query, &inspector.cte_names)?;

        let row_cap = self.apply_row_cap(query);
        let warnings = self.column_warnings(&inspector.identifiers);

        let final_sql = match row_cap {
            RowCap::Kept { .. } => strip_terminator(sql),
            _ => statement.to_string(),
        };
        debug!("Accepted SQL ({:?}): {}", row_cap, final_sql);

        Ok(AcceptedQuery {
            candidate: candidate.with_sql(final_sql),
            row_cap,
            warnings,
        })
    }

    fn check_relations(&self, query: &Query, cte_names: &HashSet<String>) -> Result<(), ValidationRejection> {
        let outcome = visit_relations(query, |relation: &ObjectName| {
            let name = relation_name(relation);
            let lowered = name.to_lowercase();
            if relation.0.len() == 1 && (cte_names.contains(&lowered) || self.schema.is_known_table(&name)) {
                ControlFlow::Continue(())
            } else {
                ControlFlow::Break(name)
            }
        });
        match outcome {
            ControlFlow::Break(table) => Err(ValidationRejection::UnknownTableRejected { table }),
            ControlFlow::Continue(()) => Ok(()),
        }
    }

    /// Caps the outermost query; nested limits are left alone.
    fn apply_row_cap(&self, query: &mut Query) -> RowCap {
        if let Some(limit) = &query.limit {
            return match literal_u64(limit) {
                Some(n) if n <= self.max_limit => RowCap::Kept { limit: n },
                requested => {
                    query.limit = Some(number(self.max_limit));
                    RowCap::Clamped {
                        requested,
                        applied: self.max_limit,
                    }
                }
            };
        }

        if let Some(fetch) = &mut query.fetch {
            let requested = if fetch.percent {
                None
            } else {
                fetch.quantity.as_ref().and_then(literal_u64)
            };
            return match requested {
                Some(n) if n <= self.max_limit => RowCap::Kept { limit: n },
                requested => {
                    *fetch = Fetch {
                        with_ties: fetch.with_ties,
                        percent: false,
                        quantity: Some(number(self.max_limit)),
                    };
                    RowCap::Clamped {
                        requested,
                        applied: self.max_limit,
                    }
                }
            };
        }

        query.limit = Some(number(self.default_limit));
        RowCap::Injected {
            limit: self.default_limit,
        }
    }

    fn column_warnings(&self, identifiers: &BTreeSet<String>) -> Vec<ColumnWarning> {
        self.schema
            .caveated_columns()
            .filter(|(_, column)| identifiers.contains(&column.name.to_lowercase()))
            .filter_map(|(table, column)| {
                column.caveat.map(|caveat| ColumnWarning {
                    table: table.name.clone(),
                    column: column.name.clone(),
                    message: format!("{}.{} {}", table.name, column.name, caveat.describe()),
                })
            })
            .collect()
    }
}

#[derive(Default)]
struct Inspector {
    cte_names: HashSet<String>,
    identifiers: BTreeSet<String>,
    select_into: bool,
}

impl Inspector {
    /// Records CTE names and `SELECT ... INTO` for one query and the set
    /// operations and CTE bodies under it. Nested subqueries reach this
    /// through the visitor hooks below.
    fn inspect_query(&mut self, query: &Query) {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.cte_names.insert(cte.alias.name.value.to_lowercase());
                self.inspect_query(&cte.query);
            }
        }
        self.inspect_set_expr(&query.body);
    }

    fn inspect_set_expr(&mut self, body: &SetExpr) {
        match body {
            SetExpr::Select(select) => {
                if select.into.is_some() {
                    self.select_into = true;
                }
            }
            SetExpr::Query(query) => self.inspect_query(query),
            SetExpr::SetOperation { left, right, .. } => {
                self.inspect_set_expr(left);
                self.inspect_set_expr(right);
            }
            _ => {}
        }
    }
}

impl Visitor for Inspector {
    type Break = ();

    fn pre_visit_table_factor(&mut self, table_factor: &TableFactor) -> ControlFlow<Self::Break> {
        if let TableFactor::Derived { subquery, .. } = table_factor {
            self.inspect_query(subquery);
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        match expr {
            Expr::Identifier(ident) => {
                self.identifiers.insert(ident.value.to_lowercase());
            }
            Expr::CompoundIdentifier(parts) => {
                if let Some(last) = parts.last() {
                    self.identifiers.insert(last.value.to_lowercase());
                }
            }
            Expr::Subquery(subquery)
            | Expr::InSubquery { subquery, .. }
            | Expr::Exists { subquery, .. } => self.inspect_query(subquery),
            _ => {}
        }
        ControlFlow::Continue(())
    }
}

fn is_trivia(token: &Token) -> bool {
    matches!(token, Token::Whitespace(_) | Token::EOF)
}

fn check_single_statement(tokens: &[Token]) -> Result<(), ValidationRejection> {
    let mut count = 0;
    let mut in_statement = false;
    for token in tokens {
        match token {
            Token::SemiColon => in_statement = false,
            t if is_trivia(t) => {}
            _ => {
                if !in_statement {
                    count += 1;
                    in_statement = true;
                }
            }
        }
    }
    if count > 1 {
        return Err(ValidationRejection::MultiStatementRejected { count });
    }
    Ok(())
}

/// A word from `FUNCTION_NAMES` directly followed by `(` is a function call
/// (`REPLACE(x, ...)`) and is not treated as a statement keyword.
fn check_mutating_words(tokens: &[Token]) -> Result<(), ValidationRejection> {
    for (i, token) in tokens.iter().enumerate() {
        let Token::Word(word) = token else { continue };
        if word.quote_style.is_some() {
            continue;
        }
        let lowered = word.value.to_lowercase();
        if !MUTATING_KEYWORDS.contains(&lowered.as_str()) {
            continue;
        }
        let next = tokens[i + 1..].iter().find(|t| !is_trivia(t));
        if FUNCTION_NAMES.contains(&lowered.as_str()) && matches!(next, Some(Token::LParen)) {
            continue;
        }
        return Err(ValidationRejection::MutationRejected { keyword: lowered });
    }
    Ok(())
}

fn statement_kind(statement: &Statement) -> String {
    statement
        .to_string()
        .split_whitespace()
        .next()
        .unwrap_or("statement")
        .to_uppercase()
}

fn relation_name(relation: &ObjectName) -> String {
    relation
        .0
        .iter()
        .map(|ident| ident.value.as_str())
        .collect::<Vec<_>>()
        .join(".")
}

fn literal_u64(expr: &Expr) -> Option<u64> {
    match expr {
        Expr::Value(Value::Number(n, _)) => n.parse().ok(),
        _ => None,
    }
}

fn number(n: u64) -> Expr {
    Expr::Value(Value::Number(n.to_string(), false))
}

fn strip_terminator(sql: &str) -> String {
    sql.trim().trim_end_matches(';').trim_end().to_string()
}
