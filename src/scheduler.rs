//! Periodic and manual discovery cycles
//!
//! A [`PollingScheduler`] is either Idle or Running. While Running a timer task
//! fires a discovery cycle every `interval`; [`PollingScheduler::refresh_now`]
//! runs one cycle in either state. At most one cycle is in flight at a time:
//! a trigger that arrives while a cycle runs is coalesced (dropped).
//!
//! Each cycle lists messages, ingests them into the session ledger and then
//! classifies the newly added ones strictly one at a time, in provider order.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::classifier::ClassificationClient;
use crate::config::PollingConfig;
use crate::error::{AutoReplyError, Result};
use crate::models::{Category, Message};
use crate::provider::MailProvider;
use crate::session::Session;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub account: String,
    pub max_results: u32,
    /// Trimmed subject+body shorter than this is not sent to the classifier
    pub min_text_len: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            account: "me".to_string(),
            max_results: 10,
            min_text_len: 10,
        }
    }
}

impl From<&PollingConfig> for SchedulerConfig {
    fn from(config: &PollingConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_secs),
            account: config.account.clone(),
            max_results: config.max_results,
            min_text_len: config.min_text_len,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
}

/// Summary of one completed discovery cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Messages newly added to the ledger
    pub discovered: usize,
    pub analyzed: usize,
    pub failed: usize,
    /// Analyzed messages the provider reported as already answered
    pub already_replied: usize,
    /// Ledger integrity faults observed during the cycle
    pub faults: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// Another cycle was already in flight; nothing was done
    Coalesced,
}

#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    Started,
    Stopped,
    CycleStarted,
    CycleCompleted(CycleReport),
    CycleFailed { reason: String },
    CycleCoalesced,
    Processing { id: String },
    Analyzed { id: String, category: Category },
    Failed { id: String, reason: String },
}

struct Engine {
    session: Arc<Session>,
    provider: Arc<dyn MailProvider>,
    classifier: Arc<dyn ClassificationClient>,
    config: SchedulerConfig,
    cycle_lock: Mutex<()>,
    current: watch::Sender<Option<String>>,
    events: broadcast::Sender<SchedulerEvent>,
}

impl Engine {
    fn emit(&self, event: SchedulerEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    async fn run_cycle(&self) -> Result<CycleOutcome> {
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            debug!("Discovery cycle already in flight, coalescing trigger");
            self.emit(SchedulerEvent::CycleCoalesced);
            return Ok(CycleOutcome::Coalesced);
        };

        self.emit(SchedulerEvent::CycleStarted);

        let listed = match self
            .provider
            .list(&self.config.account, self.config.max_results)
            .await
        {
            Ok(listed) => listed,
            Err(e) => {
                let err = match e {
                    AutoReplyError::ProviderUnavailable(_) => e,
                    other => AutoReplyError::ProviderUnavailable(other.to_string()),
                };
                warn!("Discovery failed: {}", err);
                self.emit(SchedulerEvent::CycleFailed {
                    reason: err.to_string(),
                });
                return Err(err);
            }
        };

        let added = self.session.ingest(listed).await;
        let mut report = CycleReport {
            discovered: added.len(),
            ..Default::default()
        };
        if !added.is_empty() {
            info!("Discovered {} new messages", added.len());
        }

        for message in &added {
            self.classify_one(message, &mut report).await;
        }

        info!(
            discovered = report.discovered,
            analyzed = report.analyzed,
            failed = report.failed,
            "Discovery cycle completed"
        );
        self.emit(SchedulerEvent::CycleCompleted(report.clone()));
        Ok(CycleOutcome::Completed(report))
    }

    async fn classify_one(&self, message: &Message, report: &mut CycleReport) {
        let id = message.id.as_str();

        if let Err(e) = self.session.mark_processing(id).await {
            record_fault(report, e);
            return;
        }
        self.current.send_replace(Some(id.to_string()));
        self.emit(SchedulerEvent::Processing { id: id.to_string() });

        let text = message.analysis_text();
        let outcome = if text.trim().chars().count() < self.config.min_text_len {
            Err(format!(
                "text shorter than {} characters",
                self.config.min_text_len
            ))
        } else {
            self.classifier
                .classify(&text)
                .await
                .map_err(|e| e.to_string())
        };

        match outcome {
            Ok(classification) => {
                let category = classification.category;
                match self
                    .session
                    .mark_analyzed(id, category, classification.suggested_reply)
                    .await
                {
                    Ok(()) => {
                        report.analyzed += 1;
                        debug!(message_id = %id, %category, "Message analyzed");
                        self.emit(SchedulerEvent::Analyzed {
                            id: id.to_string(),
                            category,
                        });

                        if message.already_replied {
                            match self.session.mark_replied(id).await {
                                Ok(()) => report.already_replied += 1,
                                Err(e) => record_fault(report, e),
                            }
                        }
                    }
                    Err(e) => record_fault(report, e),
                }
            }
            Err(reason) => {
                warn!(message_id = %id, "Classification failed: {}", reason);
                match self.session.mark_failed(id, reason.clone()).await {
                    Ok(()) => {
                        report.failed += 1;
                        self.emit(SchedulerEvent::Failed {
                            id: id.to_string(),
                            reason,
                        });
                    }
                    Err(e) => record_fault(report, e),
                }
            }
        }

        self.current.send_replace(None);
    }
}

/// Cycles run detached so stopping the timer never cancels one
fn spawn_cycle(engine: Arc<Engine>) {
    tokio::spawn(async move {
        if let Err(e) = engine.run_cycle().await {
            debug!("Scheduled cycle ended with error: {}", e);
        }
    });
}

fn record_fault(report: &mut CycleReport, fault: AutoReplyError) {
    error!("Ledger integrity fault during discovery: {}", fault);
    report.faults.push(fault.to_string());
}

pub struct PollingScheduler {
    engine: Arc<Engine>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl PollingScheduler {
    pub fn new(
        session: Arc<Session>,
        provider: Arc<dyn MailProvider>,
        classifier: Arc<dyn ClassificationClient>,
        config: SchedulerConfig,
    ) -> Self {
        let (current, _) = watch::channel(None);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            engine: Arc::new(Engine {
                session,
                provider,
                classifier,
                config,
                cycle_lock: Mutex::new(()),
                current,
                events,
            }),
            timer: Mutex::new(None),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.engine.session
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.engine.events.subscribe()
    }

    /// Id of the message currently being classified
    pub fn current(&self) -> Option<String> {
        self.engine.current.borrow().clone()
    }

    pub async fn state(&self) -> SchedulerState {
        match self.timer.lock().await.as_ref() {
            Some(handle) if !handle.is_finished() => SchedulerState::Running,
            _ => SchedulerState::Idle,
        }
    }

    /// Idle -> Running. Runs one cycle immediately, then every `interval`.
    pub async fn start(&self) {
        let mut timer = self.timer.lock().await;
        if timer.as_ref().map_or(false, |h| !h.is_finished()) {
            warn!("Scheduler already running");
            return;
        }

        let interval = self.engine.config.interval;
        info!("Monitoring started (every {:?})", interval);
        self.engine.emit(SchedulerEvent::Started);

        // First cycle runs now, even if stop() follows before the timer is polled
        spawn_cycle(Arc::clone(&self.engine));

        let engine = Arc::clone(&self.engine);
        let first_tick = Instant::now() + interval;
        *timer = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(first_tick, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                spawn_cycle(Arc::clone(&engine));
            }
        }));
    }

    /// Running -> Idle. An in-flight cycle finishes; no new one is armed.
    pub async fn stop(&self) {
        if let Some(handle) = self.timer.lock().await.take() {
            handle.abort();
            info!("Monitoring stopped");
            self.engine.emit(SchedulerEvent::Stopped);
        }
    }

    /// Run one discovery cycle now, without touching the timer
    pub async fn refresh_now(&self) -> Result<CycleOutcome> {
        self.engine.run_cycle().await
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.get_mut().take() {
            handle.abort();
        }
    }
}
