use portfolio_query::context::{resolve_reference, ConversationWindow};
use portfolio_query::error::ValidationRejection;
use portfolio_query::safety::{SqlValidator, MUTATING_KEYWORDS};
use portfolio_query::templates::{TemplateMatcher, TemplateSet};
use portfolio_query::{QueryCandidate, RowCap, SchemaRegistry};
use std::sync::Arc;

fn validator() -> SqlValidator {
    SqlValidator::new(Arc::new(SchemaRegistry::builtin()), 200, 5000)
}

#[test]
fn test_every_template_example_is_accepted() {
    let schema = Arc::new(SchemaRegistry::builtin());
    let templates = Arc::new(TemplateSet::builtin().unwrap());
    let matcher = TemplateMatcher::new(templates.clone(), schema);
    let validator = validator();

    for rule in templates.rules() {
        let candidate = matcher
            .match_question(&rule.example)
            .unwrap_or_else(|| panic!("example for {} did not match", rule.id));
        assert_eq!(candidate.template_id(), Some(rule.id.as_str()));
        let accepted = validator
            .validate(&candidate)
            .unwrap_or_else(|e| panic!("{} rejected: {}", rule.id, e));

        let lowered = accepted.sql().to_lowercase();
        for keyword in MUTATING_KEYWORDS {
            assert!(
                !lowered.split(|c: char| !c.is_alphanumeric() && c != '_').any(|w| w == *keyword),
                "{} contains {}",
                rule.id,
                keyword
            );
        }
        match accepted.row_cap {
            RowCap::Kept { limit } | RowCap::Injected { limit } => assert!(limit <= 5000),
            RowCap::Clamped { applied, .. } => assert!(applied <= 5000),
        }
    }
}

#[test]
fn test_mutations_rejected_in_any_spelling() {
    let validator = validator();
    let statements = [
        "drop table trades",
        "DROP TABLE trades",
        "  Drop\n\tTable holdings",
        "DELETE FROM trades WHERE id = 1",
        "update holdings set Qty = 0",
        "INSERT INTO trades (id) VALUES (1)",
        "truncate trades",
        "ALTER TABLE trades ADD COLUMN x INT",
        "CREATE TABLE t AS SELECT * FROM trades",
        "GRANT SELECT ON trades TO public",
        "MERGE INTO trades USING holdings ON 1 = 1 WHEN MATCHED THEN DELETE",
    ];
    for sql in statements {
        let result = validator.validate(&QueryCandidate::generated(sql, sql));
        assert!(
            matches!(result, Err(ValidationRejection::MutationRejected { .. })),
            "{} -> {:?}",
            sql,
            result
        );
    }
}

#[test]
fn test_stacked_statements_rejected() {
    let validator = validator();
    for sql in [
        "SELECT * FROM trades; SELECT * FROM holdings",
        "SELECT 1; DROP TABLE trades",
    ] {
        assert!(validator.validate(&QueryCandidate::generated(sql, sql)).is_err(), "{}", sql);
    }
    let result = validator.validate(&QueryCandidate::generated(
        "SELECT * FROM trades; SELECT * FROM holdings",
        "",
    ));
    assert!(matches!(result, Err(ValidationRejection::MultiStatementRejected { count: 2 })));
}

#[test]
fn test_row_cap_never_exceeds_ceiling() {
    let validator = validator();
    for (sql, expected) in [
        ("SELECT * FROM trades", 200),
        ("SELECT * FROM trades LIMIT 3", 3),
        ("SELECT * FROM trades LIMIT 99999", 5000),
        ("SELECT PortfolioName FROM holdings GROUP BY PortfolioName LIMIT 5000", 5000),
    ] {
        let accepted = validator.validate(&QueryCandidate::generated(sql, sql)).unwrap();
        let applied = match accepted.row_cap {
            RowCap::Kept { limit } | RowCap::Injected { limit } => limit,
            RowCap::Clamped { applied, .. } => applied,
        };
        assert_eq!(applied, expected, "{}", sql);
    }
}

#[test]
fn test_window_keeps_only_recent_turns() {
    let mut window = ConversationWindow::new(3);
    for i in 0..10 {
        window.append(format!("question {}", i), Some(format!("SELECT {}", i)), String::new());
    }
    assert_eq!(window.len(), 3);
    let ordinals: Vec<u64> = window.turns().map(|t| t.ordinal).collect();
    assert!(ordinals.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(window.last().unwrap().question, "question 9");
}

#[test]
fn test_resolution_is_identity_without_history() {
    let schema = SchemaRegistry::builtin();
    for text in ["now just for Garfield", "what about Heather?", "Top 10 holdings by market value"] {
        assert_eq!(resolve_reference(None, text, &schema), text);
    }
}
