//! In-memory ledger of discovered messages and their processing state
//!
//! The ledger owns every [`Message`] seen during a session. Entries are never
//! removed; the rendering layer reads immutable [`LedgerSnapshot`]s and limits
//! what it shows with [`LedgerSnapshot::recent`].

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

use crate::error::{AutoReplyError, Result};
use crate::models::{Category, Message, ProcessingState};

#[derive(Debug, Default)]
pub struct MessageLedger {
    /// Insertion order
    messages: Vec<Message>,
    index: HashMap<String, usize>,
    /// Bumped on every mutation
    revision: u64,
}

impl MessageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add messages whose id is not tracked yet. New entries start Unseen.
    ///
    /// Returns the messages actually added, in provider order. Re-ingesting
    /// known ids is a no-op.
    pub fn ingest(&mut self, incoming: Vec<Message>) -> Vec<Message> {
        let mut added = Vec::new();

        for mut message in incoming {
            if self.index.contains_key(&message.id) {
                debug!(message_id = %message.id, "Skipping already tracked message");
                continue;
            }

            message.state = ProcessingState::Unseen;
            message.category = None;
            message.suggested_reply = None;
            message.analyzed_at = None;
            message.failure_reason = None;
            message.replied_at = None;

            self.index.insert(message.id.clone(), self.messages.len());
            self.messages.push(message.clone());
            added.push(message);
        }

        if !added.is_empty() {
            self.revision += 1;
            debug!("Ingested {} new messages ({} tracked)", added.len(), self.messages.len());
        }

        added
    }

    pub fn mark_processing(&mut self, id: &str) -> Result<()> {
        self.transition(id, ProcessingState::Processing)?;
        Ok(())
    }

    pub fn mark_analyzed(
        &mut self,
        id: &str,
        category: Category,
        suggested_reply: impl Into<String>,
    ) -> Result<()> {
        let message = self.transition(id, ProcessingState::Analyzed)?;
        message.category = Some(category);
        message.suggested_reply = Some(suggested_reply.into());
        message.analyzed_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_failed(&mut self, id: &str, reason: impl Into<String>) -> Result<()> {
        let message = self.transition(id, ProcessingState::Failed)?;
        message.failure_reason = Some(reason.into());
        Ok(())
    }

    pub fn mark_replied(&mut self, id: &str) -> Result<()> {
        let message = self.transition(id, ProcessingState::Replied)?;
        message.replied_at = Some(Utc::now());
        Ok(())
    }

    fn transition(&mut self, id: &str, to: ProcessingState) -> Result<&mut Message> {
        let idx = *self
            .index
            .get(id)
            .ok_or_else(|| AutoReplyError::UnknownMessage(id.to_string()))?;

        let from = self.messages[idx].state;
        if !from.can_transition_to(to) {
            error!(message_id = %id, %from, %to, "Rejected ledger transition");
            return Err(AutoReplyError::InvalidTransition {
                id: id.to_string(),
                from,
                to,
            });
        }

        self.revision += 1;
        let message = &mut self.messages[idx];
        message.state = to;
        debug!(message_id = %id, %from, %to, "Message state changed");
        Ok(message)
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.index.get(id).map(|&idx| &self.messages[idx])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Iterate in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    /// Immutable view ordered most-recent-first by received time.
    /// Messages received at the same instant keep provider order.
    pub fn snapshot(&self) -> LedgerSnapshot {
        let mut ordered: Vec<Message> = self.messages.clone();
        ordered.sort_by(|a, b| b.received_at.cmp(&a.received_at));

        LedgerSnapshot {
            revision: self.revision,
            messages: Arc::from(ordered),
        }
    }
}

/// Read-only, cheaply clonable view of the ledger at one revision
#[derive(Debug, Clone)]
pub struct LedgerSnapshot {
    revision: u64,
    messages: Arc<[Message]>,
}

impl LedgerSnapshot {
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Most recent `limit` messages (display retention window)
    pub fn recent(&self, limit: usize) -> &[Message] {
        &self.messages[..limit.min(self.messages.len())]
    }

    /// Messages in a given state, most recent first
    pub fn in_state(&self, state: ProcessingState) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(move |m| m.state == state)
    }
}
