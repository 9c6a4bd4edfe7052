//! Template Tier
//!
//! Deterministic question → SQL rules. Each rule is data: trigger patterns with
//! named capture groups plus a SQL template whose `{name}` placeholders are filled
//! from those captures. The rule set is validated once at registration and never
//! mutated afterwards.

pub mod catalog;
pub mod matcher;

pub use matcher::{normalize_question, TemplateMatch, TemplateMatcher};

use crate::error::TemplateRegistrationError;
use crate::schema::SchemaRegistry;
use lazy_static::lazy_static;
use regex::{Regex, RegexBuilder};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Largest row count a template capture may request.
pub const MAX_TEMPLATE_ROWS: u64 = 5000;

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\{([a-z_][a-z0-9_]*)\}").unwrap();
}

/// Shapes a captured value must have before it is spliced into SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureShape {
    /// Decimal digits, 1..=MAX_TEMPLATE_ROWS.
    RowCount,
    /// Decimal digits, at most 18.
    NumericId,
    /// One of the registry's known portfolio names.
    PortfolioName,
}

impl CaptureShape {
    /// Returns the SQL-safe rendering of `raw`, or `None` when it does not fit.
    pub fn sanitize(&self, raw: &str, registry: &SchemaRegistry) -> Option<String> {
        let raw = raw.trim();
        match self {
            CaptureShape::RowCount => {
                if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                let n: u64 = raw.parse().ok()?;
                (1..=MAX_TEMPLATE_ROWS).contains(&n).then(|| n.to_string())
            }
            CaptureShape::NumericId => {
                if raw.is_empty() || raw.len() > 18 || !raw.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                Some(raw.to_string())
            }
            CaptureShape::PortfolioName => registry
                .canonical_portfolio(raw)
                .map(|name| name.replace('\'', "''")),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CaptureSpec {
    pub name: &'static str,
    pub shape: CaptureShape,
    pub default: Option<&'static str>,
}

impl CaptureSpec {
    pub const fn required(name: &'static str, shape: CaptureShape) -> Self {
        Self {
            name,
            shape,
            default: None,
        }
    }

    pub const fn with_default(name: &'static str, shape: CaptureShape, default: &'static str) -> Self {
        Self {
            name,
            shape,
            default: Some(default),
        }
    }
}

/// Declarative form of a rule, as written in the catalog.
#[derive(Debug, Clone, Copy)]
pub struct RuleDefinition {
    pub id: &'static str,
    pub description: &'static str,
    /// A question documented to trigger this rule.
    pub example: &'static str,
    pub triggers: &'static [&'static str],
    pub sql: &'static str,
    pub captures: &'static [CaptureSpec],
}

#[derive(Debug, Clone)]
pub struct Trigger {
    pub pattern: String,
    pub regex: Regex,
}

#[derive(Debug, Clone)]
pub struct TemplateRule {
    pub id: String,
    pub description: String,
    pub example: String,
    pub triggers: Vec<Trigger>,
    pub sql: String,
    pub captures: Vec<CaptureSpec>,
}

impl TemplateRule {
    fn compile(def: &RuleDefinition) -> Result<Self, TemplateRegistrationError> {
        if def.triggers.is_empty() {
            return Err(TemplateRegistrationError::NoTriggers(def.id.to_string()));
        }

        let mut triggers = Vec::with_capacity(def.triggers.len());
        for pattern in def.triggers {
            let regex = RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| TemplateRegistrationError::InvalidPattern {
                    rule: def.id.to_string(),
                    pattern: pattern.to_string(),
                    message: e.to_string(),
                })?;
            triggers.push(Trigger {
                pattern: pattern.to_string(),
                regex,
            });
        }

        let placeholders: BTreeSet<String> = PLACEHOLDER
            .captures_iter(def.sql)
            .map(|c| c[1].to_string())
            .collect();
        let declared: BTreeSet<String> = def.captures.iter().map(|c| c.name.to_string()).collect();
        if placeholders != declared {
            return Err(TemplateRegistrationError::PlaceholderMismatch {
                rule: def.id.to_string(),
                missing: declared.difference(&placeholders).cloned().collect(),
                extra: placeholders.difference(&declared).cloned().collect(),
            });
        }

        let produced: HashSet<&str> = triggers
            .iter()
            .flat_map(|t| t.regex.capture_names().flatten())
            .collect();
        for capture in def.captures {
            if capture.default.is_none() && !produced.contains(capture.name) {
                return Err(TemplateRegistrationError::UnreachableCapture {
                    rule: def.id.to_string(),
                    capture: capture.name.to_string(),
                });
            }
        }

        Ok(Self {
            id: def.id.to_string(),
            description: def.description.to_string(),
            example: def.example.to_string(),
            triggers,
            sql: def.sql.trim().to_string(),
            captures: def.captures.to_vec(),
        })
    }
}

/// The prioritized, immutable rule table.
#[derive(Debug, Clone)]
pub struct TemplateSet {
    rules: Vec<TemplateRule>,
}

impl TemplateSet {
    /// Compiles and cross-checks `definitions`; the slice order is the priority order.
    pub fn register(definitions: &[RuleDefinition]) -> Result<Self, TemplateRegistrationError> {
        let mut rules = Vec::with_capacity(definitions.len());
        let mut ids = HashSet::new();
        let mut owners: HashMap<&str, &str> = HashMap::new();

        for def in definitions {
            if !ids.insert(def.id) {
                return Err(TemplateRegistrationError::DuplicateRuleId(def.id.to_string()));
            }
            for &pattern in def.triggers {
                if let Some(first) = owners.insert(pattern, def.id) {
                    return Err(TemplateRegistrationError::DuplicateTrigger {
                        pattern: pattern.to_string(),
                        first: first.to_string(),
                        second: def.id.to_string(),
                    });
                }
            }
            rules.push(TemplateRule::compile(def)?);
        }

        Ok(Self { rules })
    }

    pub fn builtin() -> Result<Self, TemplateRegistrationError> {
        Self::register(catalog::BUILTIN_RULES)
    }

    pub fn rules(&self) -> &[TemplateRule] {
        &self.rules
    }

    pub fn get(&self, id: &str) -> Option<&TemplateRule> {
        self.rules.iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
