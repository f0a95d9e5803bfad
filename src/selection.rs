//! User selection of messages queued for a batch reply

use tracing::debug;

use crate::ledger::{LedgerSnapshot, MessageLedger};

/// Ids the user marked for reply, in selection order.
///
/// Only eligible messages (Analyzed, Productive, not replied) may be members;
/// [`SelectionSet::prune`] drops anything that stopped being eligible.
#[derive(Debug, Default, Clone)]
pub struct SelectionSet {
    ids: Vec<String>,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip membership of `id`. Ineligible ids are ignored.
    ///
    /// Returns whether `id` is selected afterwards.
    pub fn toggle(&mut self, id: &str, ledger: &MessageLedger) -> bool {
        if let Some(pos) = self.ids.iter().position(|s| s == id) {
            self.ids.remove(pos);
            return false;
        }

        let eligible = ledger.get(id).map_or(false, |m| m.is_eligible());
        if !eligible {
            debug!(message_id = %id, "Ignoring selection of ineligible message");
            return false;
        }

        self.ids.push(id.to_string());
        true
    }

    /// Candidate ids for selection, most recent first
    pub fn eligible_ids(snapshot: &LedgerSnapshot) -> Vec<String> {
        snapshot
            .iter()
            .filter(|m| m.is_eligible())
            .map(|m| m.id.clone())
            .collect()
    }

    /// Drop members that are no longer eligible; returns the dropped ids
    pub fn prune(&mut self, ledger: &MessageLedger) -> Vec<String> {
        let mut removed = Vec::new();
        self.ids.retain(|id| {
            let keep = ledger.get(id).map_or(false, |m| m.is_eligible());
            if !keep {
                removed.push(id.clone());
            }
            keep
        });

        if !removed.is_empty() {
            debug!("Pruned {} ineligible ids from selection", removed.len());
        }
        removed
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.ids.len();
        self.ids.retain(|s| s != id);
        self.ids.len() != before
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|s| s == id)
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
