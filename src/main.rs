use anyhow::Result;
use clap::Parser;
use gmail_autoreply::cli::{self, Cli, Commands, ProgressReporter};
use gmail_autoreply::config::Config;
use gmail_autoreply::dispatcher::ReplyDispatcher;
use gmail_autoreply::error::AutoReplyError;
use gmail_autoreply::provider::{GmailMailProvider, MailProvider};
use gmail_autoreply::scheduler::{PollingScheduler, SchedulerConfig};
use gmail_autoreply::session::Session;
use gmail_autoreply::{auth, classifier};
use indicatif::MultiProgress;
use std::io::Write;
use std::process;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// A writer that prints through MultiProgress to avoid progress bar conflicts
#[derive(Clone)]
struct MultiProgressWriter {
    multi: Arc<MultiProgress>,
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl MultiProgressWriter {
    fn new(multi: Arc<MultiProgress>) -> Self {
        Self {
            multi,
            buffer: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Write for MultiProgressWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        if !buffer.is_empty() {
            let msg = String::from_utf8_lossy(&buffer);
            let msg = msg.trim_end_matches('\n');
            if !msg.is_empty() {
                let _ = self.multi.println(msg);
            }
            buffer.clear();
        }
        Ok(())
    }
}

impl Drop for MultiProgressWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// MakeWriter implementation for tracing
#[derive(Clone)]
struct MultiProgressMakeWriter {
    multi: Arc<MultiProgress>,
}

impl<'a> MakeWriter<'a> for MultiProgressMakeWriter {
    type Writer = MultiProgressWriter;

    fn make_writer(&'a self) -> Self::Writer {
        MultiProgressWriter::new(Arc::clone(&self.multi))
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        display_error(&e);
        eprintln!("\nFor help, run: gmail-autoreply --help");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Several dependencies pull in rustls; pick one crypto provider explicitly
    #[cfg(not(windows))]
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    #[cfg(windows)]
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("gmail_autoreply=debug,info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gmail_autoreply=info,warn"))
    };

    let multi_progress = Arc::new(MultiProgress::new());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(MultiProgressMakeWriter {
            multi: Arc::clone(&multi_progress),
        })
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let progress = ProgressReporter::new(Arc::clone(&multi_progress));

    match cli.command {
        Commands::Auth { force } => {
            tracing::info!("Authenticating with Gmail API...");
            if let Some(parent) = cli.token_cache.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            let hub = auth::connect(&cli.credentials, &cli.token_cache, force).await?;
            println!("Successfully authenticated with Gmail API");
            println!("Token cached at: {:?}", cli.token_cache);

            let (_, profile) = hub
                .users()
                .get_profile("me")
                .add_scope(auth::SCOPES[0])
                .doit()
                .await
                .map_err(AutoReplyError::from)?;
            println!(
                "Connected to account: {}",
                profile.email_address.unwrap_or_default()
            );
            Ok(())
        }

        Commands::Check { reply, ref report } => {
            let config = Config::load(&cli.config).await?;
            let (scheduler, dispatcher) = build_engine(&cli, &config).await?;
            cli::run_check(&scheduler, &dispatcher, &progress, reply, report.clone()).await?;
            Ok(())
        }

        Commands::Monitor => {
            let config = Config::load(&cli.config).await?;
            let (scheduler, dispatcher) = build_engine(&cli, &config).await?;
            cli::run_monitor(&scheduler, &dispatcher, &progress).await?;
            Ok(())
        }

        Commands::Health => {
            let config = Config::load(&cli.config).await?;
            cli::run_health(&config.classifier).await?;
            Ok(())
        }

        Commands::InitConfig { output, force } => {
            if output.exists() && !force {
                return Err(AutoReplyError::ConfigError(format!(
                    "Configuration file already exists at {:?}. Use --force to overwrite.",
                    output
                ))
                .into());
            }

            Config::create_example(&output).await?;

            println!("Created example configuration file at: {:?}", output);
            println!("\nKey settings to review:");
            println!("  - polling.interval_secs: seconds between inbox checks");
            println!("  - classifier.mode: 'remote' (analyzer service) or 'keywords' (offline)");
            println!("  - classifier.style: tone of suggested replies");
            println!("  - replies.max_concurrent_sends: parallel sends per batch");
            Ok(())
        }
    }
}

/// Wire session, provider, classifier, scheduler and dispatcher from config
async fn build_engine(cli: &Cli, config: &Config) -> Result<(PollingScheduler, ReplyDispatcher)> {
    let hub = auth::connect(&cli.credentials, &cli.token_cache, false).await?;
    let provider: Arc<dyn MailProvider> = Arc::new(GmailMailProvider::new(
        hub,
        config.polling.label.clone(),
        config.replies.max_concurrent_sends,
    ));
    let classifier = classifier::from_config(&config.classifier)?;
    let session = Arc::new(Session::new(config.replies.display_limit));

    let scheduler = PollingScheduler::new(
        Arc::clone(&session),
        Arc::clone(&provider),
        classifier,
        SchedulerConfig::from(&config.polling),
    );
    let dispatcher = ReplyDispatcher::new(session, provider, config.replies.max_concurrent_sends)
        .with_account(config.polling.account.clone());
    Ok((scheduler, dispatcher))
}

fn display_error(error: &anyhow::Error) {
    eprintln!("Error: {}", error);

    let mut cause = error.source();
    while let Some(e) = cause {
        eprintln!("  Caused by: {}", e);
        cause = e.source();
    }

    if let Some(err) = error.downcast_ref::<AutoReplyError>() {
        match err {
            AutoReplyError::AuthError(_) => {
                eprintln!("\nHint: Make sure your credentials.json file is valid.");
                eprintln!("      Try running: gmail-autoreply auth --force");
            }
            AutoReplyError::ProviderUnavailable(_) => {
                eprintln!("\nHint: Gmail could not be reached. Check your connection and try again.");
            }
            AutoReplyError::ClassificationUnavailable(_) => {
                eprintln!("\nHint: The analyzer service is unreachable.");
                eprintln!("      Run: gmail-autoreply health, or set classifier.mode = \"keywords\"");
            }
            AutoReplyError::ConfigError(_) => {
                eprintln!("\nHint: Check your configuration file for errors.");
                eprintln!("      Run: gmail-autoreply init-config --force");
            }
            _ => {}
        }
    }
}
