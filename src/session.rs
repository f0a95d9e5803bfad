//! Shared owner of the ledger, selection and statistics cache
//!
//! One [`Session`] is created per connected account and handed (behind an
//! `Arc`) to the scheduler and the dispatcher. Those two are the only writers;
//! everything else gets snapshots and read accessors.

use std::collections::HashSet;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::Result;
use crate::ledger::{LedgerSnapshot, MessageLedger};
use crate::models::{Category, Message};
use crate::selection::SelectionSet;
use crate::stats::{AnalysisStats, StatsAggregator};

pub const DEFAULT_DISPLAY_LIMIT: usize = 10;

#[derive(Debug, Default)]
struct SessionState {
    ledger: MessageLedger,
    selection: SelectionSet,
    stats: StatsAggregator,
    /// Ids with a reply send in flight
    sending: HashSet<String>,
}

impl SessionState {
    /// Runs after every ledger mutation
    fn after_mutation(&mut self) {
        self.stats.invalidate();
        self.selection.prune(&self.ledger);
    }
}

/// Result of trying to reserve a message for a reply send
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ReplyClaim {
    Claimed(Message),
    InFlight,
    Ineligible,
}

#[derive(Debug)]
pub struct Session {
    state: Mutex<SessionState>,
    display_limit: usize,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(DEFAULT_DISPLAY_LIMIT)
    }
}

impl Session {
    pub fn new(display_limit: usize) -> Self {
        Self {
            state: Mutex::new(SessionState::default()),
            display_limit,
        }
    }

    pub async fn snapshot(&self) -> LedgerSnapshot {
        self.state.lock().await.ledger.snapshot()
    }

    /// Most recent messages within the display window
    pub async fn recent(&self) -> Vec<Message> {
        self.snapshot().await.recent(self.display_limit).to_vec()
    }

    pub async fn message(&self, id: &str) -> Option<Message> {
        self.state.lock().await.ledger.get(id).cloned()
    }

    pub async fn stats(&self) -> AnalysisStats {
        let mut state = self.state.lock().await;
        let snapshot = state.ledger.snapshot();
        state.stats.current(&snapshot)
    }

    pub async fn selected_ids(&self) -> Vec<String> {
        self.state.lock().await.selection.ids().to_vec()
    }

    pub async fn is_selected(&self, id: &str) -> bool {
        self.state.lock().await.selection.contains(id)
    }

    pub async fn eligible_ids(&self) -> Vec<String> {
        SelectionSet::eligible_ids(&self.snapshot().await)
    }

    /// User control: select/deselect a message for reply. Returns whether
    /// the message is selected afterwards.
    pub async fn toggle_selection(&self, id: &str) -> bool {
        let mut state = self.state.lock().await;
        let SessionState {
            ledger, selection, ..
        } = &mut *state;
        selection.toggle(id, ledger)
    }

    pub async fn clear_selection(&self) {
        self.state.lock().await.selection.clear();
    }

    pub(crate) async fn ingest(&self, incoming: Vec<Message>) -> Vec<Message> {
        let mut state = self.state.lock().await;
        let added = state.ledger.ingest(incoming);
        state.after_mutation();
        added
    }

    pub(crate) async fn mark_processing(&self, id: &str) -> Result<()> {
        self.mutate(|ledger| ledger.mark_processing(id)).await
    }

    pub(crate) async fn mark_analyzed(
        &self,
        id: &str,
        category: Category,
        suggested_reply: String,
    ) -> Result<()> {
        self.mutate(|ledger| ledger.mark_analyzed(id, category, suggested_reply))
            .await
    }

    pub(crate) async fn mark_failed(&self, id: &str, reason: String) -> Result<()> {
        self.mutate(|ledger| ledger.mark_failed(id, reason)).await
    }

    pub(crate) async fn mark_replied(&self, id: &str) -> Result<()> {
        self.mutate(|ledger| ledger.mark_replied(id)).await
    }

    /// Reserve an eligible message for one send. A message already being
    /// sent by another batch is refused until that batch settles.
    pub(crate) async fn claim_for_reply(&self, id: &str) -> ReplyClaim {
        let mut state = self.state.lock().await;
        if state.sending.contains(id) {
            debug!(message_id = %id, "Reply already in flight");
            return ReplyClaim::InFlight;
        }
        let eligible = state.ledger.get(id).filter(|m| m.is_eligible()).cloned();
        match eligible {
            Some(message) => {
                state.sending.insert(id.to_string());
                ReplyClaim::Claimed(message)
            }
            None => ReplyClaim::Ineligible,
        }
    }

    /// Settle a claimed send. On success the message becomes Replied and
    /// leaves the selection; either way the reservation is released.
    pub(crate) async fn settle_reply(&self, id: &str, sent: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        state.sending.remove(id);
        if !sent {
            return Ok(());
        }
        let result = state.ledger.mark_replied(id);
        state.selection.remove(id);
        state.after_mutation();
        result
    }

    async fn mutate<F>(&self, op: F) -> Result<()>
    where
        F: FnOnce(&mut MessageLedger) -> Result<()>,
    {
        let mut state = self.state.lock().await;
        let result = op(&mut state.ledger);
        state.after_mutation();
        result
    }
}
