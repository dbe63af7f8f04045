use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use uuid::Uuid;

use crate::card::{CardId, StampApplicationResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub entry_id: Uuid,
    pub card_id: CardId,
    pub stamps_count: u32,
    pub stamps_needed: u32,
    pub reward_earned: bool,
    pub applied_at: DateTime<Utc>,
}

/// Operator's answer to "clear the whole history?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    Cancelled,
}

/// In-memory record of applied stamps, newest first. Lost on restart.
#[derive(Debug, Default)]
pub struct HistoryLedger {
    entries: VecDeque<HistoryEntry>,
}

impl HistoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, result: &StampApplicationResult) -> HistoryEntry {
        let entry = HistoryEntry {
            entry_id: Uuid::new_v4(),
            card_id: result.card_id,
            stamps_count: result.stamps_count,
            stamps_needed: result.stamps_needed,
            reward_earned: result.reward_issued,
            applied_at: result.applied_at,
        };
        self.entries.push_front(entry.clone());
        entry
    }

    /// Empty the ledger if the operator confirmed. Returns how many entries were removed.
    pub fn clear(&mut self, confirmation: Confirmation) -> usize {
        match confirmation {
            Confirmation::Confirmed => {
                let removed = self.entries.len();
                self.entries.clear();
                tracing::info!(removed, "History cleared");
                removed
            }
            Confirmation::Cancelled => 0,
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    #[cfg(test)]
    pub(crate) fn latest(&self) -> Option<&HistoryEntry> {
        self.entries.front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
