//! Query Planner
//!
//! Template tier first, generative tier only on a miss. Whichever tier
//! produced the candidate, its SQL must pass the validator; a rejection is
//! final and never escalates to the other tier.

use crate::candidate::AcceptedQuery;
use crate::context::ConversationTurn;
use crate::error::{GenerationFailure, PlanningFailure};
use crate::generation::SqlGenerator;
use crate::safety::SqlValidator;
use crate::templates::TemplateMatcher;
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize)]
pub struct PlannedQuery {
    pub question: String,
    pub accepted: AcceptedQuery,
}

pub struct QueryPlanner {
    matcher: TemplateMatcher,
    generator: Option<SqlGenerator>,
    validator: SqlValidator,
}

impl QueryPlanner {
    pub fn new(matcher: TemplateMatcher, generator: Option<SqlGenerator>, validator: SqlValidator) -> Self {
        Self {
            matcher,
            generator,
            validator,
        }
    }

    pub fn matcher(&self) -> &TemplateMatcher {
        &self.matcher
    }

    pub fn has_generator(&self) -> bool {
        self.generator.is_some()
    }

    pub async fn plan(
        &self,
        question: &str,
        history: &[ConversationTurn],
    ) -> Result<PlannedQuery, PlanningFailure> {
        let candidate = match self.matcher.match_question(question) {
            Some(candidate) => candidate,
            None => {
                let generator = self.generator.as_ref().ok_or_else(|| {
                    PlanningFailure::NoCandidate(GenerationFailure::BackendUnavailable(
                        "no generative backend configured".to_string(),
                    ))
                })?;
                info!("No template matched; asking {}", generator.backend_name());
                generator
                    .generate(question, history)
                    .await
                    .map_err(PlanningFailure::NoCandidate)?
            }
        };

        let accepted = self.validator.validate(&candidate).map_err(|reason| {
            if let Some(raw) = candidate.raw_response() {
                debug!("Backend reply behind rejected SQL: {}", raw);
            }
            PlanningFailure::RejectedSql {
                sql: candidate.sql().to_string(),
                origin: candidate.origin(),
                reason,
            }
        })?;

        Ok(PlannedQuery {
            question: question.to_string(),
            accepted,
        })
    }
}
