use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One question/answer exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub ordinal: u64,
    pub timestamp: DateTime<Utc>,
    /// The question after reference resolution.
    pub question: String,
    /// SQL that ran or was rejected, when one was produced.
    pub sql: Option<String>,
    pub summary: String,
}

/// Most-recent-last bounded history. Turns are never edited once appended.
#[derive(Debug, Clone)]
pub struct ConversationWindow {
    capacity: usize,
    turns: VecDeque<ConversationTurn>,
    next_ordinal: u64,
}

impl ConversationWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            turns: VecDeque::with_capacity(capacity),
            next_ordinal: 1,
        }
    }

    pub fn append(
        &mut self,
        question: impl Into<String>,
        sql: Option<String>,
        summary: impl Into<String>,
    ) -> &ConversationTurn {
        if self.turns.len() == self.capacity {
            self.turns.pop_front();
        }
        self.turns.push_back(ConversationTurn {
            ordinal: self.next_ordinal,
            timestamp: Utc::now(),
            question: question.into(),
            sql,
            summary: summary.into(),
        });
        self.next_ordinal += 1;
        &self.turns[self.turns.len() - 1]
    }

    pub fn turns(&self) -> impl DoubleEndedIterator<Item = &ConversationTurn> + '_ {
        self.turns.iter()
    }

    /// Owned copy, oldest first.
    pub fn snapshot(&self) -> Vec<ConversationTurn> {
        self.turns.iter().cloned().collect()
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.back()
    }

    /// Latest turn that produced SQL.
    pub fn last_with_sql(&self) -> Option<&ConversationTurn> {
        self.turns.iter().rev().find(|t| t.sql.is_some())
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
