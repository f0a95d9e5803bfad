//! Gmail Auto-Reply
//!
//! Watches a Gmail inbox, classifies each new message as productive or
//! unproductive with a remote analyzer (or an offline keyword classifier), and
//! sends the suggested replies for the messages the user picks.
//!
//! # Overview
//!
//! - **Discovery**: [`PollingScheduler`] lists the inbox on a fixed interval or
//!   on demand, never running two cycles at once, and classifies new messages
//!   one at a time
//! - **Ledger**: [`MessageLedger`] tracks every message and its forward-only
//!   processing state
//! - **Statistics**: [`StatsAggregator`] derives counts from ledger snapshots
//! - **Replies**: [`SelectionSet`] holds the user's picks and
//!   [`ReplyDispatcher`] sends them as one batch with per-message outcomes
//!
//! # Example Usage
//!
//! ```no_run
//! use gmail_autoreply::{auth, classifier, config::Config};
//! use gmail_autoreply::{GmailMailProvider, PollingScheduler, ReplyDispatcher, Session};
//! use gmail_autoreply::scheduler::SchedulerConfig;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml".as_ref()).await?;
//!     let hub = auth::connect(
//!         "credentials.json".as_ref(),
//!         ".gmail-autoreply/token.json".as_ref(),
//!         false,
//!     )
//!     .await?;
//!
//!     let session = Arc::new(Session::new(config.replies.display_limit));
//!     let provider = Arc::new(GmailMailProvider::new(hub, "INBOX", 5));
//!     let scheduler = PollingScheduler::new(
//!         Arc::clone(&session),
//!         provider.clone(),
//!         classifier::from_config(&config.classifier)?,
//!         SchedulerConfig::from(&config.polling),
//!     );
//!
//!     scheduler.refresh_now().await?;
//!     for id in session.eligible_ids().await {
//!         session.toggle_selection(&id).await;
//!     }
//!
//!     let result = ReplyDispatcher::new(session, provider, 5).send_selected().await;
//!     println!("sent {}, failed {}", result.sent, result.failed);
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`auth`] - OAuth2 sign-in and Gmail hub construction
//! - [`classifier`] - Classification backends
//! - [`cli`] - Command-line interface and console rendering
//! - [`config`] - Configuration management
//! - [`dispatcher`] - Batch reply dispatch
//! - [`error`] - Error types and result aliases
//! - [`ledger`] - Message ledger and snapshots
//! - [`models`] - Core data structures
//! - [`provider`] - Mail provider trait and Gmail implementation
//! - [`scheduler`] - Discovery cycles
//! - [`selection`] - Reply selection
//! - [`session`] - Shared owner of ledger, selection and stats
//! - [`stats`] - Running statistics

pub mod auth;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod ledger;
pub mod models;
pub mod provider;
pub mod scheduler;
pub mod selection;
pub mod session;
pub mod stats;

// Re-export commonly used types for convenience
pub use error::{AutoReplyError, Result};

pub use models::{
    Category, Classification, ClassificationMetadata, Message, Priority, ProcessingState,
    ReplyJob, ReplyStatus,
};

pub use classifier::{ClassificationClient, HttpClassificationClient, KeywordClassifier, ReplyStyle};
pub use provider::{GmailMailProvider, MailProvider};

pub use ledger::{LedgerSnapshot, MessageLedger};
pub use selection::SelectionSet;
pub use session::Session;
pub use stats::{AnalysisStats, StatsAggregator};

pub use dispatcher::{BatchResult, DispatchOutcome, ReplyDispatcher};
pub use scheduler::{CycleOutcome, CycleReport, PollingScheduler, SchedulerEvent, SchedulerState};

pub use config::{ClassifierConfig, Config, PollingConfig, ReplyConfig};

pub use cli::{Cli, Commands, ProgressReporter};
