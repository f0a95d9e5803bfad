use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A mail message tracked for the current session.
///
/// Provider fields are filled at discovery; the analysis fields are set once
/// by the ledger when classification completes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub thread_id: Option<String>,
    /// RFC 5322 Message-ID header, used for In-Reply-To on replies
    #[serde(default)]
    pub header_id: Option<String>,
    pub sender_email: String,
    pub sender_name: String,
    pub subject: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
    /// Provider reports a reply from this account already exists in the thread
    #[serde(default)]
    pub already_replied: bool,
    #[serde(default)]
    pub state: ProcessingState,
    pub category: Option<Category>,
    pub suggested_reply: Option<String>,
    pub analyzed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub replied_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(
        id: impl Into<String>,
        sender_email: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            thread_id: None,
            header_id: None,
            sender_email: sender_email.into(),
            sender_name: String::new(),
            subject: subject.into(),
            body: body.into(),
            received_at,
            already_replied: false,
            state: ProcessingState::Unseen,
            category: None,
            suggested_reply: None,
            analyzed_at: None,
            failure_reason: None,
            replied_at: None,
        }
    }

    /// Text submitted to the classifier: subject, blank line, body.
    pub fn analysis_text(&self) -> String {
        format!("{}\n\n{}", self.subject, self.body)
    }

    /// Analyzed, Productive and not yet replied
    pub fn is_eligible(&self) -> bool {
        self.state == ProcessingState::Analyzed && self.category == Some(Category::Productive)
    }

    pub fn priority(&self) -> Priority {
        match self.category {
            Some(Category::Productive) => Priority::High,
            _ => Priority::Low,
        }
    }

    /// Display form of the sender, "Name <email>" when a name is known
    pub fn sender_display(&self) -> String {
        if self.sender_name.is_empty() {
            self.sender_email.clone()
        } else {
            format!("{} <{}>", self.sender_name, self.sender_email)
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Category {
    #[serde(alias = "Produtivo", alias = "produtivo", alias = "productive")]
    Productive,
    #[serde(alias = "Improdutivo", alias = "improdutivo", alias = "unproductive")]
    Unproductive,
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "productive" | "produtivo" => Ok(Category::Productive),
            "unproductive" | "improdutivo" => Ok(Category::Unproductive),
            other => Err(format!("unknown category '{}'", other)),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Productive => write!(f, "Productive"),
            Category::Unproductive => write!(f, "Unproductive"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    High,
    Low,
}

/// Per-message lifecycle. Transitions only move forward:
/// Unseen -> Processing -> {Analyzed, Failed}, Analyzed -> Replied.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum ProcessingState {
    #[default]
    Unseen,
    Processing,
    Analyzed,
    Failed,
    Replied,
}

impl ProcessingState {
    /// Position along the lifecycle; Analyzed and Failed share a rank.
    pub fn rank(self) -> u8 {
        match self {
            ProcessingState::Unseen => 0,
            ProcessingState::Processing => 1,
            ProcessingState::Analyzed | ProcessingState::Failed => 2,
            ProcessingState::Replied => 3,
        }
    }

    /// Whether `next` is a legal direct successor of this state
    pub fn can_transition_to(self, next: ProcessingState) -> bool {
        matches!(
            (self, next),
            (ProcessingState::Unseen, ProcessingState::Processing)
                | (ProcessingState::Processing, ProcessingState::Analyzed)
                | (ProcessingState::Processing, ProcessingState::Failed)
                | (ProcessingState::Analyzed, ProcessingState::Replied)
        )
    }

    /// Counted as processed in the running statistics
    pub fn is_processed(self) -> bool {
        matches!(self, ProcessingState::Analyzed | ProcessingState::Replied)
    }
}

impl fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessingState::Unseen => "unseen",
            ProcessingState::Processing => "processing",
            ProcessingState::Analyzed => "analyzed",
            ProcessingState::Failed => "failed",
            ProcessingState::Replied => "replied",
        };
        f.write_str(name)
    }
}

/// Result returned by a classification backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Classification {
    pub category: Category,
    #[serde(alias = "suggestion")]
    pub suggested_reply: String,
    #[serde(default)]
    pub metadata: Option<ClassificationMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ClassificationMetadata {
    #[serde(default)]
    pub processing_time_seconds: Option<f64>,
    #[serde(default)]
    pub text_length: Option<usize>,
    #[serde(default)]
    pub processed_at: Option<String>,
}

/// One outgoing reply, built at dispatch time from ledger state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplyJob {
    pub message_id: String,
    pub to_address: String,
    pub subject: String,
    pub body: String,
    pub thread_ref: Option<String>,
    pub in_reply_to: Option<String>,
    /// Mailbox the reply is sent from
    #[serde(default = "default_account")]
    pub account: String,
}

fn default_account() -> String {
    DEFAULT_ACCOUNT.to_string()
}

/// Gmail's alias for the authenticated user
pub const DEFAULT_ACCOUNT: &str = "me";

impl ReplyJob {
    /// Build a job from an analyzed message, sent from the authenticated
    /// user. `body_override` replaces the stored suggested reply. Returns
    /// None when there is no body to send.
    pub fn for_message(message: &Message, body_override: Option<&str>) -> Option<Self> {
        let body = body_override
            .map(str::to_string)
            .or_else(|| message.suggested_reply.clone())?;

        Some(Self {
            message_id: message.id.clone(),
            to_address: message.sender_email.clone(),
            subject: reply_subject(&message.subject),
            body,
            thread_ref: message.thread_id.clone(),
            in_reply_to: message.header_id.clone(),
            account: default_account(),
        })
    }
}

/// Prefix a subject with "Re: " unless it already carries one
pub fn reply_subject(subject: &str) -> String {
    let trimmed = subject.trim();
    let has_prefix = trimmed
        .get(..3)
        .map_or(false, |prefix| prefix.eq_ignore_ascii_case("re:"));
    if has_prefix {
        trimmed.to_string()
    } else {
        format!("Re: {}", trimmed)
    }
}

/// Provider answer for a single reply job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyStatus {
    Sent { detail: Option<String> },
    Failed { detail: String },
}
