//! Command-line interface

use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::classifier::HttpClassificationClient;
use crate::config::ClassifierConfig;
use crate::dispatcher::{BatchResult, DispatchOutcome, ReplyDispatcher};
use crate::error::{AutoReplyError, Result};
use crate::models::{Message, Priority, ProcessingState};
use crate::scheduler::{CycleOutcome, CycleReport, PollingScheduler, SchedulerEvent};
use crate::session::Session;
use crate::stats::AnalysisStats;

#[derive(Parser, Debug)]
#[command(name = "gmail-autoreply")]
#[command(version)]
#[command(about = "Classify incoming Gmail messages and send suggested replies", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Path to OAuth2 credentials file
    #[arg(long, default_value = "credentials.json")]
    pub credentials: PathBuf,

    /// Path to token cache file
    #[arg(long, default_value = ".gmail-autoreply/token.json")]
    pub token_cache: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authenticate with Gmail API
    Auth {
        /// Force re-authentication even if token exists
        #[arg(long)]
        force: bool,
    },

    /// Run one discovery cycle and show the analyzed messages
    Check {
        /// Pick productive messages and send their suggested replies
        #[arg(long)]
        reply: bool,

        /// Write a Markdown summary to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Poll the inbox until interrupted (Ctrl-C)
    Monitor,

    /// Check that the remote analyzer is reachable
    Health,

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

/// Truncate a string to max_len characters, adding "..." if truncated
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max_len.saturating_sub(3)).collect::<String>())
    }
}

/// Spinner output that shares a MultiProgress with the log writer
pub struct ProgressReporter {
    multi: Arc<MultiProgress>,
    spinner_style: ProgressStyle,
}

impl ProgressReporter {
    pub fn new(multi: Arc<MultiProgress>) -> Self {
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed:>6}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");

        Self {
            multi,
            spinner_style,
        }
    }

    pub fn add_spinner(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(self.spinner_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    pub fn finish_spinner(&self, pb: &ProgressBar, msg: &str) {
        pb.finish_and_clear();
        let _ = self.multi.println(format!("  ✓ {}", msg));
    }

    pub fn println(&self, line: impl AsRef<str>) {
        let _ = self.multi.println(line.as_ref());
    }
}

fn state_marker(message: &Message) -> &'static str {
    match message.state {
        ProcessingState::Unseen => "·",
        ProcessingState::Processing => "…",
        ProcessingState::Analyzed => match message.priority() {
            Priority::High => "★",
            Priority::Low => "○",
        },
        ProcessingState::Failed => "✗",
        ProcessingState::Replied => "↩",
    }
}

/// One line per message for the console listing
pub fn format_message_line(message: &Message) -> String {
    let category = message
        .category
        .map(|c| c.to_string())
        .unwrap_or_else(|| message.state.to_string());

    format!(
        "{} {:<12} {:<30} {}",
        state_marker(message),
        category,
        truncate_string(&message.sender_display(), 30),
        truncate_string(&message.subject, 60)
    )
}

pub fn format_stats(stats: &AnalysisStats) -> String {
    format!(
        "Total: {} | Productive: {} | Unproductive: {} | Processed: {}",
        stats.total, stats.productive, stats.unproductive, stats.processed
    )
}

pub fn format_cycle(report: &CycleReport) -> String {
    let mut line = format!(
        "{} new, {} analyzed, {} failed",
        report.discovered, report.analyzed, report.failed
    );
    if report.already_replied > 0 {
        line.push_str(&format!(", {} already answered", report.already_replied));
    }
    line
}

pub fn format_batch(result: &BatchResult) -> String {
    let mut out = format!("Replies sent: {} | failed: {}", result.sent, result.failed);
    for (id, outcome) in &result.outcomes {
        if let DispatchOutcome::Failed(reason) = outcome {
            out.push_str(&format!("\n  ✗ {}: {}", id, reason));
        }
    }
    out
}

/// Markdown summary of a `check` run
pub struct CheckReport {
    pub generated_at: chrono::DateTime<chrono::Utc>,
    pub cycle: Option<CycleReport>,
    pub stats: AnalysisStats,
    pub messages: Vec<Message>,
    pub batch: Option<BatchResult>,
}

impl CheckReport {
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        md.push_str("# Inbox Analysis Report\n\n");
        md.push_str(&format!(
            "Generated: {}\n\n",
            self.generated_at.format("%Y-%m-%d %H:%M:%S")
        ));

        md.push_str("## Summary\n\n");
        md.push_str(&format!("- **Total analyzed:** {}\n", self.stats.total));
        md.push_str(&format!("- **Productive:** {}\n", self.stats.productive));
        md.push_str(&format!("- **Unproductive:** {}\n", self.stats.unproductive));
        md.push_str(&format!("- **Processed:** {}\n", self.stats.processed));
        if let Some(ref cycle) = self.cycle {
            md.push_str(&format!("- **Last cycle:** {}\n", format_cycle(cycle)));
        }
        md.push('\n');

        md.push_str("## Messages\n\n");
        if self.messages.is_empty() {
            md.push_str("_No messages found._\n\n");
        } else {
            md.push_str("| State | Category | Sender | Subject |\n");
            md.push_str("|-------|----------|--------|---------|\n");
            for message in &self.messages {
                let category = message.category.map(|c| c.to_string()).unwrap_or_default();
                md.push_str(&format!(
                    "| {} | {} | {} | {} |\n",
                    message.state,
                    category,
                    message.sender_email.replace('|', "\\|"),
                    truncate_string(&message.subject, 60).replace('|', "\\|")
                ));
            }
            md.push('\n');
        }

        if let Some(ref batch) = self.batch {
            md.push_str("## Replies\n\n");
            md.push_str(&format!("- **Sent:** {}\n", batch.sent));
            md.push_str(&format!("- **Failed:** {}\n", batch.failed));
            for (id, outcome) in &batch.outcomes {
                if let DispatchOutcome::Failed(reason) = outcome {
                    md.push_str(&format!("  - `{}`: {}\n", id, reason));
                }
            }
        }

        md
    }

    pub async fn save(&self, path: &std::path::Path) -> std::io::Result<()> {
        tokio::fs::write(path, self.to_markdown()).await
    }
}

fn print_messages(progress: &ProgressReporter, session_messages: &[Message]) {
    if session_messages.is_empty() {
        progress.println("No messages found.");
        return;
    }
    for message in session_messages {
        progress.println(format_message_line(message));
    }
}

/// One discovery cycle, listing, and optionally a reply batch
pub async fn run_check(
    scheduler: &PollingScheduler,
    dispatcher: &ReplyDispatcher,
    progress: &ProgressReporter,
    reply: bool,
    report_path: Option<PathBuf>,
) -> Result<()> {
    let session = scheduler.session();
    let spinner = progress.add_spinner("Checking inbox...");

    let cycle = match scheduler.refresh_now().await {
        Ok(CycleOutcome::Completed(report)) => {
            progress.finish_spinner(&spinner, &format_cycle(&report));
            Some(report)
        }
        Ok(CycleOutcome::Coalesced) => {
            progress.finish_spinner(&spinner, "Another check is already running");
            None
        }
        Err(e) => {
            spinner.finish_and_clear();
            return Err(e);
        }
    };

    print_messages(progress, &session.recent().await);
    progress.println(format_stats(&session.stats().await));

    let batch = if reply {
        reply_to_chosen(session, dispatcher, progress).await?
    } else {
        None
    };

    if let Some(path) = report_path {
        let report = CheckReport {
            generated_at: chrono::Utc::now(),
            cycle,
            stats: session.stats().await,
            messages: session.recent().await,
            batch,
        };
        report.save(&path).await?;
        info!("Report written to {:?}", path);
    }

    Ok(())
}

/// Prompt for a selection and send it as one batch
async fn reply_to_chosen(
    session: &Arc<Session>,
    dispatcher: &ReplyDispatcher,
    progress: &ProgressReporter,
) -> Result<Option<BatchResult>> {
    choose_replies(session).await?;
    let selected = session.selected_ids().await;
    if selected.is_empty() {
        progress.println("No replies selected.");
        return Ok(None);
    }

    let spinner = progress.add_spinner(&format!("Sending {} replies...", selected.len()));
    let result = dispatcher.send_selected().await;
    progress.finish_spinner(&spinner, &format_batch(&result));
    if result.all_failed() {
        warn!("No reply in the batch was delivered");
    }
    Ok(Some(result))
}

/// Ask which eligible messages to answer and record them in the selection
async fn choose_replies(session: &Arc<Session>) -> Result<()> {
    let snapshot = session.snapshot().await;
    let candidates: Vec<Message> = snapshot
        .iter()
        .filter(|m| m.is_eligible())
        .cloned()
        .collect();
    if candidates.is_empty() {
        return Ok(());
    }

    let options: Vec<String> = candidates
        .iter()
        .map(|m| {
            format!(
                "{} | {} → {}",
                truncate_string(&m.sender_display(), 30),
                truncate_string(&m.subject, 40),
                truncate_string(m.suggested_reply.as_deref().unwrap_or_default(), 50)
            )
        })
        .collect();

    let picked = tokio::task::spawn_blocking(move || {
        inquire::MultiSelect::new("Select messages to reply to:", options)
            .raw_prompt()
            .map(|choices| choices.into_iter().map(|c| c.index).collect::<Vec<_>>())
    })
    .await
    .map_err(|e| AutoReplyError::Unknown(format!("Prompt task failed: {}", e)))?
    .map_err(|e| AutoReplyError::Unknown(format!("Prompt failed: {}", e)))?;

    session.clear_selection().await;
    for index in picked {
        if let Some(message) = candidates.get(index) {
            session.toggle_selection(&message.id).await;
        }
    }
    Ok(())
}

/// Keyboard commands accepted while monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorCommand {
    Refresh,
    Reply,
    Pause,
    Resume,
    Stats,
    Quit,
}

impl MonitorCommand {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "r" | "refresh" => Some(MonitorCommand::Refresh),
            "s" | "send" | "reply" => Some(MonitorCommand::Reply),
            "p" | "pause" | "stop" => Some(MonitorCommand::Pause),
            "c" | "resume" | "start" => Some(MonitorCommand::Resume),
            "t" | "stats" => Some(MonitorCommand::Stats),
            "q" | "quit" | "exit" => Some(MonitorCommand::Quit),
            _ => None,
        }
    }
}

const MONITOR_HELP: &str =
    "Commands: [r]efresh, [s]end replies, [p]ause, [c]ontinue, s[t]ats, [q]uit";

/// Start the scheduler, print its events and act on keyboard commands
/// until quit or Ctrl-C
pub async fn run_monitor(
    scheduler: &PollingScheduler,
    dispatcher: &ReplyDispatcher,
    progress: &ProgressReporter,
) -> Result<()> {
    let session = scheduler.session();
    let mut events = scheduler.subscribe();
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    scheduler.start().await;
    progress.println("Monitoring inbox. Press Ctrl-C to stop.");
    progress.println(MONITOR_HELP);

    let spinner = progress.add_spinner("Waiting for next check...");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = input.next_line(), if stdin_open => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) | Err(_) => {
                        debug!("Standard input closed, keyboard commands disabled");
                        stdin_open = false;
                        continue;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match MonitorCommand::parse(&line) {
                    Some(MonitorCommand::Refresh) => match scheduler.refresh_now().await {
                        Ok(CycleOutcome::Completed(report)) => {
                            spinner.set_message(format!("Last check: {}", format_cycle(&report)));
                        }
                        Ok(CycleOutcome::Coalesced) => {
                            progress.println("A check is already running");
                        }
                        Err(e) => progress.println(format!("Refresh failed: {}", e)),
                    },
                    Some(MonitorCommand::Reply) => {
                        if let Err(e) = reply_to_chosen(session, dispatcher, progress).await {
                            progress.println(format!("Reply batch aborted: {}", e));
                        }
                    }
                    Some(MonitorCommand::Pause) => {
                        scheduler.stop().await;
                        spinner.set_message("Paused; [c] to continue");
                    }
                    Some(MonitorCommand::Resume) => scheduler.start().await,
                    Some(MonitorCommand::Stats) => {
                        print_messages(progress, &session.recent().await);
                        progress.println(format_stats(&session.stats().await));
                    }
                    Some(MonitorCommand::Quit) => break,
                    None => progress.println(MONITOR_HELP),
                }
            }
            event = events.recv() => match event {
                Ok(SchedulerEvent::Processing { id }) => {
                    let subject = session
                        .message(&id)
                        .await
                        .map(|m| truncate_string(&m.subject, 50))
                        .unwrap_or(id);
                    spinner.set_message(format!("Analyzing: {}", subject));
                }
                Ok(SchedulerEvent::CycleCompleted(report)) => {
                    if report.discovered > 0 {
                        print_messages(progress, &session.recent().await);
                        progress.println(format_stats(&session.stats().await));
                    }
                    spinner.set_message(format!("Last check: {}", format_cycle(&report)));
                }
                Ok(SchedulerEvent::CycleFailed { reason }) => {
                    spinner.set_message(format!("Last check failed: {}", reason));
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Display fell behind, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    scheduler.stop().await;
    progress.finish_spinner(&spinner, "Monitoring stopped");
    Ok(())
}

pub async fn run_health(config: &ClassifierConfig) -> Result<()> {
    if config.mode != "remote" {
        println!("Classifier mode is '{}', no remote analyzer to check", config.mode);
        return Ok(());
    }

    let timeout = Some(Duration::from_secs(config.request_timeout_secs.unwrap_or(30)));
    let client = HttpClassificationClient::new(&config.base_url, config.style, timeout)?;
    let health = client.health().await?;
    println!(
        "Analyzer at {} is {} ({} {})",
        config.base_url,
        health.status,
        health.service.unwrap_or_default(),
        health.version.unwrap_or_default()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;
    use chrono::Utc;

    fn analyzed(id: &str, category: Category) -> Message {
        let mut message = Message::new(id, "ana@example.com", "Proposta | revisão", "texto", Utc::now());
        message.sender_name = "Ana".to_string();
        message.state = ProcessingState::Analyzed;
        message.category = Some(category);
        message
    }

    #[test]
    fn test_cli_parses_check_reply() {
        let cli = Cli::parse_from(["gmail-autoreply", "check", "--reply"]);
        assert!(matches!(cli.command, Commands::Check { reply: true, report: None }));
        assert_eq!(cli.config, PathBuf::from("config.toml"));

        let cli = Cli::parse_from(["gmail-autoreply", "-v", "auth", "--force"]);
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Auth { force: true }));
    }

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("short", 10), "short");
        assert_eq!(truncate_string("Solicitação urgente", 10), "Solicit...");
    }

    #[test]
    fn test_format_message_line() {
        let line = format_message_line(&analyzed("m1", Category::Productive));
        assert!(line.starts_with("★ Productive"));
        assert!(line.contains("Ana <ana@example.com>"));

        let mut pending = analyzed("m2", Category::Unproductive);
        pending.state = ProcessingState::Processing;
        pending.category = None;
        assert!(format_message_line(&pending).starts_with("… processing"));
    }

    #[test]
    fn test_format_batch_lists_failures() {
        let result = BatchResult {
            sent: 1,
            failed: 1,
            outcomes: vec![
                ("a".to_string(), DispatchOutcome::Sent),
                ("b".to_string(), DispatchOutcome::Failed("quota".to_string())),
            ],
            faults: Vec::new(),
        };
        let text = format_batch(&result);
        assert!(text.starts_with("Replies sent: 1 | failed: 1"));
        assert!(text.contains("✗ b: quota"));
        assert!(!text.contains("✗ a"));
    }

    #[test]
    fn test_report_markdown_escapes_pipes() {
        let report = CheckReport {
            generated_at: Utc::now(),
            cycle: Some(CycleReport {
                discovered: 1,
                analyzed: 1,
                ..Default::default()
            }),
            stats: AnalysisStats {
                total: 1,
                productive: 1,
                unproductive: 0,
                processed: 1,
            },
            messages: vec![analyzed("m1", Category::Productive)],
            batch: None,
        };

        let md = report.to_markdown();
        assert!(md.contains("- **Productive:** 1"));
        assert!(md.contains("Proposta \\| revisão"));
        assert!(md.contains("1 new, 1 analyzed, 0 failed"));
        assert!(!md.contains("## Replies"));
    }

    #[test]
    fn test_monitor_command_parse() {
        assert_eq!(MonitorCommand::parse("r"), Some(MonitorCommand::Refresh));
        assert_eq!(MonitorCommand::parse(" Send \n"), Some(MonitorCommand::Reply));
        assert_eq!(MonitorCommand::parse("pause"), Some(MonitorCommand::Pause));
        assert_eq!(MonitorCommand::parse("c"), Some(MonitorCommand::Resume));
        assert_eq!(MonitorCommand::parse("t"), Some(MonitorCommand::Stats));
        assert_eq!(MonitorCommand::parse("quit"), Some(MonitorCommand::Quit));
        assert_eq!(MonitorCommand::parse("delete everything"), None);
    }
}
