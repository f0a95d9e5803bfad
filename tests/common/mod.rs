//! Common test utilities and fixtures
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use gmail_autoreply::classifier::ClassificationClient;
use gmail_autoreply::error::{AutoReplyError, Result};
use gmail_autoreply::models::{Category, Classification, Message, ReplyJob, ReplyStatus};
use gmail_autoreply::provider::MailProvider;
use gmail_autoreply::scheduler::{PollingScheduler, SchedulerConfig};
use gmail_autoreply::session::Session;
use mockall::mock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, Semaphore};

/// Create a test message; `minute` orders messages by received time
pub fn create_test_message(id: &str, subject: &str, body: &str, minute: i64) -> Message {
    let base = Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap();
    let mut message = Message::new(
        id,
        format!("{}@cliente.com.br", id),
        subject,
        body,
        base + Duration::minutes(minute),
    );
    message.thread_id = Some(format!("thread_{}", id));
    message.sender_name = format!("Sender {}", id);
    message
}

/// Two budget requests and one promotion, newest first as Gmail lists them
pub fn inbox_fixture() -> Vec<Message> {
    vec![
        create_test_message("a", "Pedido de orçamento", "Podem enviar o orçamento do projeto?", 3),
        create_test_message("b", "Orçamento para reforma", "Gostaria de um orçamento detalhado.", 2),
        create_test_message("c", "Black Friday!", "Descontos de até 70% em toda a loja.", 1),
    ]
}

pub fn classification(category: Category, reply: &str) -> Classification {
    Classification {
        category,
        suggested_reply: reply.to_string(),
        metadata: None,
    }
}

/// Productive when the text mentions a budget ("orçamento")
pub fn classify_by_budget(text: &str) -> Result<Classification> {
    if text.to_lowercase().contains("orçamento") {
        Ok(classification(Category::Productive, "Enviaremos o orçamento em breve."))
    } else {
        Ok(classification(Category::Unproductive, "Obrigado pelo contato."))
    }
}

pub fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        interval: std::time::Duration::from_secs(3600),
        ..Default::default()
    }
}

pub fn build_scheduler(
    provider: Arc<dyn MailProvider>,
    classifier: Arc<dyn ClassificationClient>,
    config: SchedulerConfig,
) -> (Arc<Session>, Arc<PollingScheduler>) {
    let session = Arc::new(Session::default());
    let scheduler = Arc::new(PollingScheduler::new(
        Arc::clone(&session),
        provider,
        classifier,
        config,
    ));
    (session, scheduler)
}

// Mock implementation of MailProvider for testing
mock! {
    pub MailProvider {}

    #[async_trait::async_trait]
    impl MailProvider for MailProvider {
        async fn list(&self, account: &str, max_results: u32) -> Result<Vec<Message>>;
        async fn reply(&self, job: &ReplyJob) -> Result<ReplyStatus>;
    }
}

// Mock implementation of ClassificationClient for testing
mock! {
    pub ClassificationClient {}

    #[async_trait::async_trait]
    impl ClassificationClient for ClassificationClient {
        async fn classify(&self, text: &str) -> Result<Classification>;
    }
}

/// Blocks until released; signals when it is entered
pub struct Gate {
    entered: Notify,
    release: Semaphore,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entered: Notify::new(),
            release: Semaphore::new(0),
        })
    }

    pub async fn pass(&self) {
        self.entered.notify_one();
        if let Ok(permit) = self.release.acquire().await {
            permit.forget();
        }
    }

    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn open(&self, passes: usize) {
        self.release.add_permits(passes);
    }
}

/// Provider whose `list` waits on a gate and counts calls
pub struct GatedProvider {
    pub gate: Arc<Gate>,
    pub messages: Vec<Message>,
    pub list_calls: AtomicUsize,
}

impl GatedProvider {
    pub fn new(messages: Vec<Message>) -> Arc<Self> {
        Arc::new(Self {
            gate: Gate::new(),
            messages,
            list_calls: AtomicUsize::new(0),
        })
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MailProvider for GatedProvider {
    async fn list(&self, _account: &str, _max_results: u32) -> Result<Vec<Message>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.gate.pass().await;
        Ok(self.messages.clone())
    }

    async fn reply(&self, _job: &ReplyJob) -> Result<ReplyStatus> {
        Ok(ReplyStatus::Sent { detail: None })
    }
}

/// Provider that lists a fixed inbox and counts calls
pub struct FixedProvider {
    pub messages: Vec<Message>,
    pub list_calls: AtomicUsize,
}

impl FixedProvider {
    pub fn new(messages: Vec<Message>) -> Arc<Self> {
        Arc::new(Self {
            messages,
            list_calls: AtomicUsize::new(0),
        })
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MailProvider for FixedProvider {
    async fn list(&self, _account: &str, _max_results: u32) -> Result<Vec<Message>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.messages.clone())
    }

    async fn reply(&self, job: &ReplyJob) -> Result<ReplyStatus> {
        Err(AutoReplyError::SendFailed {
            id: job.message_id.clone(),
            reason: "read-only provider".to_string(),
        })
    }
}

/// Provider whose replies take `delay` and that records every send and the
/// peak number of sends in flight
pub struct SlowReplyProvider {
    pub delay: std::time::Duration,
    pub sent: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl SlowReplyProvider {
    pub fn new(delay: std::time::Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            sent: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailProvider for SlowReplyProvider {
    async fn list(&self, _account: &str, _max_results: u32) -> Result<Vec<Message>> {
        Ok(Vec::new())
    }

    async fn reply(&self, job: &ReplyJob) -> Result<ReplyStatus> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.sent.lock().unwrap().push(job.message_id.clone());

        tokio::time::sleep(self.delay).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(ReplyStatus::Sent { detail: None })
    }
}

/// Classifier that records call order and peak concurrency.
/// With a gate, every call blocks until the gate is opened.
pub struct TrackingClassifier {
    pub gate: Option<Arc<Gate>>,
    pub calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl TrackingClassifier {
    pub fn new(gate: Option<Arc<Gate>>) -> Arc<Self> {
        Arc::new(Self {
            gate,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    /// Subjects in the order they were classified
    pub fn subjects(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClassificationClient for TrackingClassifier {
    async fn classify(&self, text: &str) -> Result<Classification> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls
            .lock()
            .unwrap()
            .push(text.lines().next().unwrap_or_default().to_string());

        if let Some(gate) = &self.gate {
            gate.pass().await;
        } else {
            tokio::task::yield_now().await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        classify_by_budget(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbox_fixture_is_newest_first() {
        let inbox = inbox_fixture();
        assert_eq!(inbox.len(), 3);
        assert!(inbox[0].received_at > inbox[2].received_at);
        assert_eq!(inbox[0].sender_email, "a@cliente.com.br");
    }

    #[test]
    fn test_classify_by_budget() {
        assert_eq!(
            classify_by_budget("Orçamento\n\ntexto").unwrap().category,
            Category::Productive
        );
        assert_eq!(
            classify_by_budget("Promoção\n\ntexto").unwrap().category,
            Category::Unproductive
        );
    }
}
