use crate::config::{ConversationSettings, TransactionType};
use chrono::{DateTime, Utc};
use log::debug;
use serde::Serialize;
use std::collections::VecDeque;

#[derive(Debug, Clone, Serialize)]
pub struct ConversationEntry {
    pub question: String,
    pub transaction_type: TransactionType,
    pub asked_at: DateTime<Utc>,
}

/// Bounded history of (question, resolved transaction) pairs for one
/// conversational session. The buffer is the only mutable state in the engine;
/// callers serialize access per session.
pub struct ConversationContext {
    entries: VecDeque<ConversationEntry>,
    capacity: usize,
    follow_up_max_chars: usize,
    indicators: Vec<String>,
}

impl ConversationContext {
    pub fn new(settings: &ConversationSettings) -> Self {
        Self {
            entries: VecDeque::with_capacity(settings.history_capacity),
            capacity: settings.history_capacity,
            follow_up_max_chars: settings.follow_up_max_chars,
            indicators: settings
                .follow_up_indicators
                .iter()
                .map(|i| i.to_lowercase())
                .collect(),
        }
    }

    /// A question qualifies as a follow-up when it is short and carries a
    /// deictic indicator, and a prior transaction exists to fall back on. The
    /// caller additionally checks that retrieval found no direct signal.
    pub fn is_follow_up(&self, question: &str) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        if question.chars().count() >= self.follow_up_max_chars {
            return false;
        }
        let question_lower = question.to_lowercase();
        self.indicators
            .iter()
            .any(|i| question_lower.contains(i.as_str()))
    }

    pub fn last_transaction(&self) -> Option<&TransactionType> {
        self.entries.back().map(|e| &e.transaction_type)
    }

    pub fn record(&mut self, question: &str, transaction_type: TransactionType) {
        if self.entries.len() == self.capacity {
            let evicted = self.entries.pop_front();
            if let Some(evicted) = evicted {
                debug!("conversation buffer full, evicting: {}", evicted.question);
            }
        }
        self.entries.push_back(ConversationEntry {
            question: question.to_string(),
            transaction_type,
            asked_at: Utc::now(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &ConversationEntry> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
