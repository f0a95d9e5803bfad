//! Batch reply dispatch with per-message outcomes

use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::AutoReplyError;
use crate::models::{ReplyJob, ReplyStatus, DEFAULT_ACCOUNT};
use crate::provider::MailProvider;
use crate::session::{ReplyClaim, Session};

pub const DEFAULT_MAX_CONCURRENT_SENDS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    Failed(String),
}

impl DispatchOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, DispatchOutcome::Sent)
    }
}

/// Aggregate result of one batch. Always returned, even when nothing was sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    pub sent: usize,
    pub failed: usize,
    /// One entry per distinct requested id, in request order
    pub outcomes: Vec<(String, DispatchOutcome)>,
    /// Ledger integrity faults hit while recording outcomes
    pub faults: Vec<String>,
}

impl BatchResult {
    pub fn outcome(&self, id: &str) -> Option<&DispatchOutcome> {
        self.outcomes
            .iter()
            .find(|(outcome_id, _)| outcome_id == id)
            .map(|(_, outcome)| outcome)
    }

    pub fn all_failed(&self) -> bool {
        self.sent == 0 && self.failed > 0
    }
}

pub struct ReplyDispatcher {
    session: Arc<Session>,
    provider: Arc<dyn MailProvider>,
    max_concurrent_sends: usize,
    account: String,
}

impl ReplyDispatcher {
    pub fn new(
        session: Arc<Session>,
        provider: Arc<dyn MailProvider>,
        max_concurrent_sends: usize,
    ) -> Self {
        Self {
            session,
            provider,
            max_concurrent_sends: max_concurrent_sends.max(1),
            account: DEFAULT_ACCOUNT.to_string(),
        }
    }

    /// Send from `account` instead of the authenticated user's alias
    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = account.into();
        self
    }

    /// Send replies for `ids` using each message's suggested reply
    pub async fn send_batch(&self, ids: &[String]) -> BatchResult {
        self.send_batch_with_overrides(ids, &HashMap::new()).await
    }

    /// Send the current selection
    pub async fn send_selected(&self) -> BatchResult {
        let ids = self.session.selected_ids().await;
        self.send_batch(&ids).await
    }

    /// Like [`send_batch`](Self::send_batch), with per-id body overrides
    pub async fn send_batch_with_overrides(
        &self,
        ids: &[String],
        overrides: &HashMap<String, String>,
    ) -> BatchResult {
        let mut seen = HashSet::new();
        let ids: Vec<&String> = ids.iter().filter(|id| seen.insert(id.as_str())).collect();

        // Claim every id up front so an overlapping batch cannot send the same reply
        let mut prepared = Vec::with_capacity(ids.len());
        for id in ids {
            let job = match self.session.claim_for_reply(id).await {
                ReplyClaim::Claimed(message) => {
                    match ReplyJob::for_message(&message, overrides.get(id).map(String::as_str)) {
                        Some(job) => Ok(ReplyJob {
                            account: self.account.clone(),
                            ..job
                        }),
                        None => {
                            let _ = self.session.settle_reply(id, false).await;
                            Err("no reply body".to_string())
                        }
                    }
                }
                ReplyClaim::InFlight => Err("send in progress".to_string()),
                ReplyClaim::Ineligible => Err("not eligible for reply".to_string()),
            };
            prepared.push((id.clone(), job));
        }

        // Fan out, then wait for every job before reconciling
        let settled: Vec<(String, DispatchOutcome, bool)> = stream::iter(prepared)
            .map(|(id, job)| async move {
                match job {
                    Ok(job) => (id, self.send_one(&job).await, true),
                    Err(reason) => (id, DispatchOutcome::Failed(reason), false),
                }
            })
            .buffered(self.max_concurrent_sends)
            .collect()
            .await;

        let mut result = BatchResult::default();
        for (id, outcome, claimed) in settled {
            if claimed {
                if let Err(e) = self.session.settle_reply(&id, outcome.is_sent()).await {
                    error!(message_id = %id, "Reply sent but ledger rejected it: {}", e);
                    result.faults.push(e.to_string());
                }
            }
            match outcome {
                DispatchOutcome::Sent => result.sent += 1,
                DispatchOutcome::Failed(ref reason) => {
                    warn!(message_id = %id, "Reply not sent: {}", reason);
                    result.failed += 1;
                }
            }
            result.outcomes.push((id, outcome));
        }

        info!(sent = result.sent, failed = result.failed, "Reply batch finished");
        result
    }

    async fn send_one(&self, job: &ReplyJob) -> DispatchOutcome {
        match self.provider.reply(job).await {
            Ok(ReplyStatus::Sent { .. }) => DispatchOutcome::Sent,
            Ok(ReplyStatus::Failed { detail }) => DispatchOutcome::Failed(detail),
            Err(e) => {
                let err = match e {
                    AutoReplyError::SendFailed { .. } => e,
                    other => AutoReplyError::SendFailed {
                        id: job.message_id.clone(),
                        reason: other.to_string(),
                    },
                };
                DispatchOutcome::Failed(err.to_string())
            }
        }
    }
}
