//! Mail provider: inbox discovery and reply delivery over the Gmail API

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use futures::stream::{self, StreamExt};
use google_gmail1::api::{Message as GmailMessage, MessagePart};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::auth::GmailHub;
use crate::error::{AutoReplyError, Result};
use crate::models::{Message, ReplyJob, ReplyStatus};

const READONLY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";
const SEND_SCOPE: &str = "https://www.googleapis.com/auth/gmail.send";
const SENT_LABEL: &str = "SENT";
const API_TIMEOUT: Duration = Duration::from_secs(30);

/// Mail operations the engine depends on
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Most recent messages for `account`, newest first as the provider
    /// returns them. A failure here means discovery is unavailable.
    async fn list(&self, account: &str, max_results: u32) -> Result<Vec<Message>>;

    /// Deliver one reply. An `Err` is treated as a failed send.
    async fn reply(&self, job: &ReplyJob) -> Result<ReplyStatus>;
}

#[async_trait]
impl<T: MailProvider + ?Sized> MailProvider for Arc<T> {
    async fn list(&self, account: &str, max_results: u32) -> Result<Vec<Message>> {
        self.as_ref().list(account, max_results).await
    }

    async fn reply(&self, job: &ReplyJob) -> Result<ReplyStatus> {
        self.as_ref().reply(job).await
    }
}

/// Gmail-backed provider with bounded concurrency and retry on transient errors
pub struct GmailMailProvider {
    hub: GmailHub,
    label: String,
    max_concurrent: usize,
    permits: Arc<Semaphore>,
}

impl GmailMailProvider {
    /// `max_concurrent` bounds in-flight API calls (message fetches and sends)
    pub fn new(hub: GmailHub, label: impl Into<String>, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            hub,
            label: label.into(),
            max_concurrent,
            permits: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    fn should_retry(error: &AutoReplyError) -> bool {
        error.is_transient()
    }

    /// Execute an async operation with exponential backoff retry
    async fn with_retry<T, F, Fut>(
        operation_name: &str,
        max_retries: u32,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut delay = Duration::from_secs(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if Self::should_retry(&e) && attempts <= max_retries => {
                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                        operation_name,
                        attempts,
                        max_retries + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, Duration::from_secs(30));
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn with_timeout<T, Fut>(operation_name: &str, call: Fut) -> Result<T>
    where
        Fut: std::future::Future<Output = std::result::Result<T, google_gmail1::Error>>,
    {
        match tokio::time::timeout(API_TIMEOUT, call).await {
            Ok(result) => result.map_err(AutoReplyError::from),
            Err(_) => {
                warn!("Gmail API {} call timed out after {:?}", operation_name, API_TIMEOUT);
                Err(AutoReplyError::NetworkError(format!(
                    "API call timed out after {:?}",
                    API_TIMEOUT
                )))
            }
        }
    }

    async fn list_ids(&self, account: &str, max_results: u32) -> Result<Vec<String>> {
        Self::with_retry("list_messages", 3, || async {
            let call = self
                .hub
                .users()
                .messages_list(account)
                .add_label_ids(&self.label)
                .max_results(max_results)
                .add_scope(READONLY_SCOPE)
                .doit();
            let (_, response) = Self::with_timeout("list_messages", call).await?;

            Ok(response
                .messages
                .unwrap_or_default()
                .into_iter()
                .filter_map(|m| m.id)
                .collect())
        })
        .await
    }

    async fn fetch_message(&self, account: &str, id: &str) -> Result<Message> {
        let _permit = self.permits.acquire().await.map_err(|e| {
            AutoReplyError::Unknown(format!("Failed to acquire request permit: {}", e))
        })?;

        let raw = Self::with_retry("get_message", 3, || async {
            let call = self
                .hub
                .users()
                .messages_get(account, id)
                .format("full")
                .add_scope(READONLY_SCOPE)
                .doit();
            let (_, msg) = Self::with_timeout("get_message", call).await?;
            Ok(msg)
        })
        .await?;

        let mut message = parse_message(raw)?;
        if let Some(thread_id) = message.thread_id.clone() {
            match self.thread_has_reply(account, &thread_id, &message).await {
                Ok(replied) => message.already_replied = replied,
                Err(e) => debug!(message_id = %id, "Could not inspect thread: {}", e),
            }
        }
        Ok(message)
    }

    async fn thread_has_reply(&self, account: &str, thread_id: &str, message: &Message) -> Result<bool> {
        let call = self
            .hub
            .users()
            .threads_get(account, thread_id)
            .format("minimal")
            .add_scope(READONLY_SCOPE)
            .doit();
        let (_, thread) = Self::with_timeout("get_thread", call).await?;

        Ok(has_sent_reply(
            thread.messages.as_deref().unwrap_or_default(),
            &message.id,
            message.received_at,
        ))
    }
}

#[async_trait]
impl MailProvider for GmailMailProvider {
    async fn list(&self, account: &str, max_results: u32) -> Result<Vec<Message>> {
        let ids = self
            .list_ids(account, max_results)
            .await
            .map_err(|e| AutoReplyError::ProviderUnavailable(e.to_string()))?;
        debug!("Listed {} message ids in {}", ids.len(), self.label);

        // Fetch concurrently but keep provider order
        let results: Vec<(String, Result<Message>)> = stream::iter(ids)
            .map(|id| async move {
                let result = self.fetch_message(account, &id).await;
                (id, result)
            })
            .buffered(self.max_concurrent)
            .collect()
            .await;

        let mut messages = Vec::with_capacity(results.len());
        for (id, result) in results {
            match result {
                Ok(message) => messages.push(message),
                Err(e) if e.is_transient() || matches!(e, AutoReplyError::AuthError(_)) => {
                    return Err(AutoReplyError::ProviderUnavailable(e.to_string()));
                }
                Err(e) => warn!(message_id = %id, "Skipping unreadable message: {}", e),
            }
        }
        Ok(messages)
    }

    async fn reply(&self, job: &ReplyJob) -> Result<ReplyStatus> {
        let _permit = self.permits.acquire().await.map_err(|e| {
            AutoReplyError::Unknown(format!("Failed to acquire request permit: {}", e))
        })?;

        let raw = build_reply_mime(job);
        let mime_type: mime::Mime = "message/rfc822"
            .parse()
            .map_err(|e| AutoReplyError::Unknown(format!("Invalid MIME type: {}", e)))?;
        let envelope = GmailMessage {
            thread_id: job.thread_ref.clone(),
            ..Default::default()
        };

        // Sends are not retried: a timed out send may still have been delivered
        let call = self
            .hub
            .users()
            .messages_send(envelope, &job.account)
            .add_scope(SEND_SCOPE)
            .upload(Cursor::new(raw.into_bytes()), mime_type);

        match Self::with_timeout("send_message", call).await {
            Ok((_, sent)) => {
                info!(message_id = %job.message_id, to = %job.to_address, "Reply sent");
                Ok(ReplyStatus::Sent { detail: sent.id })
            }
            Err(e) => {
                warn!(message_id = %job.message_id, "Reply failed: {}", e);
                Ok(ReplyStatus::Failed {
                    detail: e.to_string(),
                })
            }
        }
    }
}

/// Parse a full-format Gmail message into a ledger [`Message`]
fn parse_message(msg: GmailMessage) -> Result<Message> {
    let id = msg
        .id
        .ok_or_else(|| AutoReplyError::InvalidMessageFormat("Missing message ID".to_string()))?;

    let payload = msg
        .payload
        .as_ref()
        .ok_or_else(|| AutoReplyError::InvalidMessageFormat("Missing payload".to_string()))?;

    let mut sender_email = String::new();
    let mut sender_name = String::new();
    let mut subject = String::new();
    let mut date_str = String::new();
    let mut header_id = None;

    for header in payload.headers.as_deref().unwrap_or_default() {
        if let (Some(name), Some(value)) = (&header.name, &header.value) {
            match name.to_lowercase().as_str() {
                "from" => {
                    if let Some((name_part, email_part)) = parse_email_header(value) {
                        sender_name = name_part;
                        sender_email = email_part;
                    } else {
                        sender_email = value.trim().to_string();
                    }
                }
                "subject" => subject = value.clone(),
                "date" => date_str = value.clone(),
                "message-id" => header_id = Some(value.trim().to_string()),
                _ => {}
            }
        }
    }

    let received_at = msg
        .internal_date
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .or_else(|| parse_date(&date_str).ok())
        .unwrap_or_else(Utc::now);

    let body = extract_plain_text(payload)
        .or(msg.snippet)
        .unwrap_or_default();

    let mut message = Message::new(id, sender_email, subject, body.trim(), received_at);
    message.thread_id = msg.thread_id;
    message.header_id = header_id;
    message.sender_name = sender_name;
    Ok(message)
}

/// First text/plain body found walking the MIME tree depth-first
fn extract_plain_text(part: &MessagePart) -> Option<String> {
    let mime_type = part.mime_type.as_deref().unwrap_or_default();
    if mime_type.starts_with("text/plain") {
        if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_ref()) {
            return Some(String::from_utf8_lossy(data).into_owned());
        }
    }

    part.parts
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find_map(extract_plain_text)
}

/// Whether a SENT message later than `received_at` exists in the thread
fn has_sent_reply(thread: &[GmailMessage], message_id: &str, received_at: DateTime<Utc>) -> bool {
    let after_ms = received_at.timestamp_millis();
    thread.iter().any(|m| {
        m.id.as_deref() != Some(message_id)
            && m.label_ids
                .as_ref()
                .map_or(false, |labels| labels.iter().any(|l| l == SENT_LABEL))
            && m.internal_date.map_or(true, |ts| ts >= after_ms)
    })
}

/// Parse email header in "Name <email@example.com>" format
fn parse_email_header(header: &str) -> Option<(String, String)> {
    let start = header.find('<')?;
    let end = header[start..].find('>')? + start;
    let name = header[..start].trim().trim_matches('"').to_string();
    let email = header[start + 1..end].trim().to_string();
    Some((name, email))
}

/// Parse RFC 2822 date string
fn parse_date(date_str: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(date_str)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| DateTime::parse_from_rfc3339(date_str).map(|dt| dt.with_timezone(&Utc)))
        .map_err(|e| AutoReplyError::InvalidMessageFormat(format!("Invalid date format: {}", e)))
}

/// Longest run of UTF-8 bytes per encoded word; base64 of 45 bytes keeps each
/// word within the 75 characters RFC 2047 allows
const ENCODED_WORD_BYTES: usize = 45;

/// Header value as-is when ASCII, otherwise as RFC 2047 `B` encoded words
pub fn encode_header_value(value: &str) -> String {
    if value.is_ascii() {
        return value.to_string();
    }

    let mut words = Vec::new();
    let mut chunk = String::new();
    for ch in value.chars() {
        if chunk.len() + ch.len_utf8() > ENCODED_WORD_BYTES {
            words.push(format!("=?UTF-8?B?{}?=", STANDARD.encode(&chunk)));
            chunk.clear();
        }
        chunk.push(ch);
    }
    if !chunk.is_empty() {
        words.push(format!("=?UTF-8?B?{}?=", STANDARD.encode(&chunk)));
    }
    // Folded continuation lines; whitespace between encoded words is dropped on decode
    words.join("\r\n ")
}

/// RFC 822 text of a plain-text reply
pub fn build_reply_mime(job: &ReplyJob) -> String {
    let mut raw = format!(
        "To: {}\r\nSubject: {}\r\n",
        job.to_address,
        encode_header_value(&job.subject)
    );
    if let Some(ref parent) = job.in_reply_to {
        raw.push_str(&format!("In-Reply-To: {}\r\nReferences: {}\r\n", parent, parent));
    }
    raw.push_str("MIME-Version: 1.0\r\n");
    raw.push_str("Content-Type: text/plain; charset=\"UTF-8\"\r\n");
    raw.push_str("Content-Transfer-Encoding: 8bit\r\n\r\n");
    raw.push_str(&job.body.replace("\r\n", "\n").replace('\n', "\r\n"));
    raw
}
