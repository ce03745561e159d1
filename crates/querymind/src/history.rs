//! Bounded per-session conversation history used as prompt context.


use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Turns kept per session; the oldest is evicted first.
pub const HISTORY_CAPACITY: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub question: String,
    pub query: String,
}

impl ConversationTurn {
    pub fn new(question: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            query: query.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationHistory {
    turns: VecDeque<ConversationTurn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        while self.turns.len() >= HISTORY_CAPACITY {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }
}

pub trait HistoryStore: Send + Sync {
    fn get_history(&self, session_id: &str) -> ConversationHistory;
    fn add_turn(&self, session_id: &str, turn: ConversationTurn);
    fn clear_history(&self, session_id: &str);
}

#[derive(Clone, Default)]
pub struct InMemoryHistoryStore {
    store: Arc<DashMap<String, ConversationHistory>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_count(&self) -> usize {
        self.store.len()
    }
}

impl HistoryStore for InMemoryHistoryStore {
    fn get_history(&self, session_id: &str) -> ConversationHistory {
        match self.store.get(session_id) {
            Some(history) => history.clone(),
            None => ConversationHistory::new(),
        }
    }

    fn add_turn(&self, session_id: &str, turn: ConversationTurn) {
        let mut entry = self.store.entry(session_id.to_string()).or_default();
        entry.push(turn);
    }

    fn clear_history(&self, session_id: &str) {
        self.store.remove(session_id);
    }
}
