//! Reference resolution for follow-up questions.
//!
//! Rewrites a follow-up such as "now just for portfolio Garfield" into a
//! self-contained question built from the previous turn. Total and pure: when
//! nothing can be resolved the text comes back unchanged.

use super::window::ConversationTurn;
use crate::schema::SchemaRegistry;
use crate::templates::normalize_question;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

const LEADING_MARKERS: &[&str] = &["now", "and", "also", "same", "just", "only", "then", "but"];
const INLINE_MARKERS: &[&str] = &["it", "that", "those", "them", "same"];
/// Words that name what a question is about. A message carrying one of these
/// is already self-contained, even if it opens with "now" or "and".
const SUBJECT_NOUNS: &[&str] = &[
    "trade", "trades", "holding", "holdings", "position", "positions", "p&l", "pnl", "profit",
    "performance", "securities", "allocation", "allocations", "summary", "overview",
];

lazy_static! {
    static ref ABOUT_PREFIX: Regex = Regex::new(r"^(?:and |so )?(?:what|how) about\b").unwrap();
    static ref DIMENSION: Regex =
        Regex::new(r"\b(?:grouped by|broken down by|split by|by|per) (?P<dim>[a-z][a-z& ]*?)$").unwrap();
    static ref FOR_TARGET: Regex = Regex::new(
        r"\b(?:for|in) (?:the )?(?:portfolio |fund )?(?P<target>[^?.!]+?)(?: portfolio| fund)?$"
    )
    .unwrap();
    static ref ABOUT_TARGET: Regex = Regex::new(
        r"^(?:and |so )?(?:what|how) about (?:the )?(?:portfolio |fund )?(?P<target>.+?)(?: portfolio| fund)?$"
    )
    .unwrap();
    static ref PRIOR_DIMENSION: Regex = Regex::new(r"(?i)\s+(?:by|per)\s+.+$").unwrap();
    static ref PRIOR_FILTER: Regex =
        Regex::new(r"(?i)\s+(?:for|in)\s+(?:the\s+)?(?:portfolio|fund)\s+.+$").unwrap();
    static ref PRIOR_FOR: Regex = Regex::new(r"(?i)\s+for\s+(?P<target>.+)$").unwrap();
}

/// Whether `text` reads like a follow-up to an earlier question.
pub fn is_follow_up(text: &str) -> bool {
    let normalized = normalize_question(text);
    let mut words = normalized.split(' ');
    let first = words.next().unwrap_or("");
    LEADING_MARKERS.contains(&first)
        || ABOUT_PREFIX.is_match(&normalized)
        || normalized.split(' ').any(|w| INLINE_MARKERS.contains(&w))
}

pub fn resolve_reference(prior: Option<&ConversationTurn>, text: &str, registry: &SchemaRegistry) -> String {
    let Some(prior) = prior.filter(|t| t.sql.is_some()) else {
        return text.to_string();
    };
    let normalized = normalize_question(text);
    if !is_follow_up(text) || names_own_subject(&normalized) {
        return text.to_string();
    }

    let base = prior
        .question
        .trim()
        .trim_end_matches(|c: char| matches!(c, '?' | '.' | '!'))
        .trim_end();

    let resolved = if let Some(dim) = DIMENSION.captures(&normalized).map(|c| c["dim"].trim().to_string()) {
        Some(replace_dimension(base, &dim))
    } else {
        filter_target(&normalized, registry).map(|filter| replace_filter(base, &filter, registry))
    };

    match resolved {
        Some(question) => {
            debug!("Resolved follow-up '{}' -> '{}'", text, question);
            question
        }
        None => text.to_string(),
    }
}

fn names_own_subject(normalized: &str) -> bool {
    normalized
        .split(' ')
        .map(|w| w.trim_matches(|c: char| matches!(c, ',' | '?' | '.' | '!' | '\'' | '"')))
        .any(|w| SUBJECT_NOUNS.contains(&w))
}

fn replace_dimension(base: &str, dim: &str) -> String {
    let stem = PRIOR_DIMENSION.replace(base, "");
    format!("{} by {}", stem.trim_end(), dim)
}

fn filter_target(normalized: &str, registry: &SchemaRegistry) -> Option<String> {
    let raw = FOR_TARGET
        .captures(normalized)
        .or_else(|| ABOUT_TARGET.captures(normalized))
        .map(|c| c["target"].trim().to_string())
        .or_else(|| {
            // "now garfield", "just heather"
            let rest = strip_leading_markers(normalized);
            registry.canonical_portfolio(rest).map(|_| rest.to_string())
        })?;

    if raw.is_empty() {
        return None;
    }
    Some(match registry.canonical_portfolio(&raw) {
        Some(name) => format!("for portfolio {}", name),
        None => format!("for {}", raw),
    })
}

fn strip_leading_markers(text: &str) -> &str {
    let mut rest = text;
    loop {
        let (first, tail) = rest.split_once(' ').unwrap_or((rest, ""));
        if !tail.is_empty() && (LEADING_MARKERS.contains(&first) || first == "show" || first == "for") {
            rest = tail;
        } else {
            return rest;
        }
    }
}

fn replace_filter(base: &str, filter: &str, registry: &SchemaRegistry) -> String {
    let mut stem = PRIOR_FILTER.replace(base, "").into_owned();
    let trailing_portfolio = PRIOR_FOR
        .captures(&stem)
        .filter(|c| registry.canonical_portfolio(&c["target"]).is_some())
        .and_then(|c| c.get(0).map(|m| m.start()));
    if let Some(start) = trailing_portfolio {
        stem.truncate(start);
    }
    format!("{} {}", stem.trim_end(), filter)
}
