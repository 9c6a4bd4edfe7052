use super::{TemplateRule, TemplateSet};
use crate::candidate::QueryCandidate;
use crate::schema::SchemaRegistry;
use regex::Captures;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Lower-cases, collapses whitespace and drops trailing punctuation.
pub fn normalize_question(question: &str) -> String {
    let collapsed = question
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    collapsed
        .trim_end_matches(|c: char| matches!(c, '?' | '.' | '!'))
        .trim()
        .to_string()
}

/// A rule hit with the values that were substituted.
#[derive(Debug, Clone)]
pub struct TemplateMatch {
    pub rule_id: String,
    pub trigger: String,
    pub values: BTreeMap<String, String>,
    pub candidate: QueryCandidate,
}

pub struct TemplateMatcher {
    templates: Arc<TemplateSet>,
    schema: Arc<SchemaRegistry>,
}

impl TemplateMatcher {
    pub fn new(templates: Arc<TemplateSet>, schema: Arc<SchemaRegistry>) -> Self {
        Self { templates, schema }
    }

    pub fn templates(&self) -> &TemplateSet {
        &self.templates
    }

    pub fn match_question(&self, question: &str) -> Option<QueryCandidate> {
        self.find(question).map(|m| m.candidate)
    }

    /// First rule (in priority order) whose first satisfied trigger yields
    /// well-shaped captures.
    pub fn find(&self, question: &str) -> Option<TemplateMatch> {
        let normalized = normalize_question(question);
        if normalized.is_empty() {
            return None;
        }

        for rule in self.templates.rules() {
            let Some((trigger, caps)) = rule
                .triggers
                .iter()
                .find_map(|t| t.regex.captures(&normalized).map(|c| (t, c)))
            else {
                continue;
            };

            match self.render(rule, &caps) {
                Some((sql, values)) => {
                    info!("Template '{}' matched via '{}'", rule.id, trigger.pattern);
                    return Some(TemplateMatch {
                        rule_id: rule.id.clone(),
                        trigger: trigger.pattern.clone(),
                        values,
                        candidate: QueryCandidate::from_template(rule.id.clone(), sql),
                    });
                }
                None => {
                    debug!("Template '{}' skipped: capture did not fit its shape", rule.id);
                }
            }
        }

        None
    }

    fn render(&self, rule: &TemplateRule, caps: &Captures<'_>) -> Option<(String, BTreeMap<String, String>)> {
        let mut sql = rule.sql.clone();
        let mut values = BTreeMap::new();

        for spec in &rule.captures {
            let raw = caps
                .name(spec.name)
                .map(|m| m.as_str().trim())
                .filter(|s| !s.is_empty())
                .or(spec.default)?;
            let value = spec.shape.sanitize(raw, &self.schema)?;
            sql = sql.replace(&format!("{{{}}}", spec.name), &value);
            values.insert(spec.name.to_string(), value);
        }

        Some((sql, values))
    }
}
