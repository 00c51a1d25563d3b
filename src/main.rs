//! RSS-Harvester main entry point
//!
//! This is the command-line interface for running crawl jobs and managing the
//! subscriptions, signing services and credentials they depend on.

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use rss_harvester::config::{load_config_with_hash, Config};
use rss_harvester::fetch::build_http_client;
use rss_harvester::jobs::{
    check_credentials, JobError, JobOrchestrator, RunOutcome, RunRequest, TaskType, EXPIRY_WARNING,
};
use rss_harvester::notify::build_notifier;
use rss_harvester::signing::CredentialKind;
use rss_harvester::storage::{
    open_storage, CredentialStore, JobStatus, JobStore, SignerStore, SqliteStorage,
    SubscriptionStore,
};
use rss_harvester::ContentKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// RSS-Harvester: an unattended content harvester
///
/// Crawls subscribed authors on a signed Q&A platform and a paid community,
/// keeping runs idempotent and resumable.
#[derive(Parser, Debug)]
#[command(name = "rss-harvester")]
#[command(version = "1.0.0")]
#[command(about = "An unattended content harvester", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(short, long, value_name = "CONFIG", default_value = "harvester.toml")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one crawl job
    Run {
        /// Task type: crawl-qa or crawl-community
        task: TaskType,

        #[command(flatten)]
        selection: Selection,
    },

    /// Run a crawl job on a fixed interval
    Watch {
        task: TaskType,

        /// Seconds between runs
        #[arg(long, default_value_t = 3600)]
        every: u64,
    },

    /// Manage subscriptions
    Sub {
        #[command(subcommand)]
        action: SubAction,
    },

    /// Manage signing services
    Signer {
        #[command(subcommand)]
        action: SignerAction,
    },

    /// Manage platform credentials
    Cookie {
        #[command(subcommand)]
        action: CookieAction,
    },

    /// List jobs
    Jobs {
        /// Only jobs in this status (running, finished, error)
        #[arg(long)]
        status: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
struct Selection {
    /// Continue the running job of this task type
    #[arg(long)]
    resume: bool,

    /// Source keys to crawl (default: all)
    #[arg(long, value_delimiter = ',')]
    include: Vec<String>,

    /// Source keys to leave out
    #[arg(long, value_delimiter = ',')]
    exclude: Vec<String>,

    /// Only crawl sources after this key
    #[arg(long)]
    last_crawled: Option<String>,
}

#[derive(Subcommand, Debug)]
enum SubAction {
    Add { kind: ContentKind, author: String },
    List,
}

#[derive(Subcommand, Debug)]
enum SignerAction {
    Add { slug: String, url: String },
    List,
    Enable { slug: String },
    Disable { slug: String },
}

#[derive(Subcommand, Debug)]
enum CookieAction {
    Set {
        kind: CredentialKind,
        value: String,

        /// Days until the value expires
        #[arg(long, default_value_t = 30)]
        ttl_days: u64,
    },
    Del { kind: CredentialKind },

    /// Notify about credentials close to expiry
    Check {
        /// Hours ahead to look
        #[arg(long, default_value_t = 48)]
        within_hours: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let storage = Arc::new(
        open_storage(Path::new(&config.storage.database_path))
            .with_context(|| format!("opening {}", config.storage.database_path))?,
    );

    match cli.command {
        Command::Run { task, selection } => {
            let req = RunRequest {
                resume: selection.resume,
                include: selection.include,
                exclude: selection.exclude,
                last_crawled: selection.last_crawled,
            };
            handle_run(&config, &config_hash, storage, task, req).await
        }
        Command::Watch { task, every } => {
            handle_watch(&config, &config_hash, storage, task, every).await
        }
        Command::Sub { action } => handle_sub(&storage, action),
        Command::Signer { action } => handle_signer(&storage, action),
        Command::Cookie { action } => handle_cookie(&config, &storage, action).await,
        Command::Jobs { status } => handle_jobs(&storage, status.as_deref()),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("rss_harvester=info,warn"),
            1 => EnvFilter::new("rss_harvester=debug,info"),
            2 => EnvFilter::new("rss_harvester=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles `run`: one job, exit status reflects the job status
async fn handle_run(
    config: &Config,
    config_hash: &str,
    storage: Arc<SqliteStorage>,
    task: TaskType,
    req: RunRequest,
) -> anyhow::Result<()> {
    let orchestrator = JobOrchestrator::from_config(config, config_hash, storage, task)?;
    let outcome = orchestrator.run(&req).await?;

    println!(
        "Job {} {}: {} sources crawled, {} skipped, {} errors",
        outcome.job_id,
        outcome.status.to_db_string(),
        outcome.processed.len(),
        outcome.already_done,
        outcome.errors
    );

    match outcome.status {
        JobStatus::Error => Err(anyhow!("job {} ended with errors", outcome.job_id)),
        _ => Ok(()),
    }
}

/// Handles `watch`: runs the task on an interval until interrupted
async fn handle_watch(
    config: &Config,
    config_hash: &str,
    storage: Arc<SqliteStorage>,
    task: TaskType,
    every: u64,
) -> anyhow::Result<()> {
    let notifier = build_notifier(build_http_client(&config.user_agent)?, &config.notify);
    let orchestrator =
        JobOrchestrator::from_config(config, config_hash, storage.clone(), task)?;
    let mut ticker = tokio::time::interval(Duration::from_secs(every.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut expiry_ticker = tokio::time::interval(Duration::from_secs(24 * 3600));
    expiry_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    // a job left running by a killed process would block every tick
    match orchestrator.resume_running().await {
        Ok(Some(outcome)) => log_outcome(&outcome),
        Ok(None) => {}
        Err(e) => tracing::error!("Resume failed: {}", e),
    }

    tracing::info!("Watching {} every {}s", task, every);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = expiry_ticker.tick() => {
                if let Err(e) =
                    check_credentials(&*storage, notifier.as_ref(), EXPIRY_WARNING).await
                {
                    tracing::error!("Credential check failed: {}", e);
                }
                continue;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, stopping watch");
                return Ok(());
            }
        }

        match orchestrator.run(&RunRequest::default()).await {
            Ok(outcome) => log_outcome(&outcome),
            Err(JobError::AlreadyRunning { job_id, .. }) => {
                tracing::warn!("Skipping tick, job {} still running", job_id)
            }
            Err(e) => tracing::error!("Run failed: {}", e),
        }
    }
}

fn log_outcome(outcome: &RunOutcome) {
    tracing::info!(
        "Job {} ended {}",
        outcome.job_id,
        outcome.status.to_db_string()
    );
}

fn handle_sub(storage: &SqliteStorage, action: SubAction) -> anyhow::Result<()> {
    match action {
        SubAction::Add { kind, author } => {
            let sub = storage.add_subscription(kind, &author)?;
            println!("✓ Subscribed {}", sub.key);
        }
        SubAction::List => {
            let subs = storage.list_subscriptions(&[
                ContentKind::Post,
                ContentKind::Article,
                ContentKind::Note,
            ])?;
            println!("Subscriptions ({}):", subs.len());
            for sub in subs {
                let state = if sub.finished { "backfilled" } else { "partial" };
                println!("  - {} ({})", sub.key, state);
            }
        }
    }
    Ok(())
}

fn handle_signer(storage: &SqliteStorage, action: SignerAction) -> anyhow::Result<()> {
    let find = |slug: &str| -> anyhow::Result<String> {
        storage
            .load_signers()?
            .into_iter()
            .find(|s| s.slug == slug)
            .map(|s| s.id)
            .ok_or_else(|| anyhow!("no signing service named '{}'", slug))
    };

    match action {
        SignerAction::Add { slug, url } => {
            let record = storage.register_signer(&slug, &url)?;
            println!("✓ Registered {} at {}", record.slug, record.url);
        }
        SignerAction::List => {
            let signers = storage.load_signers()?;
            println!("Signing services ({}):", signers.len());
            for s in signers {
                println!(
                    "  - {} {} [{}] used={} failed={}",
                    s.slug,
                    s.url,
                    if s.is_available { "on" } else { "off" },
                    s.used_count,
                    s.failed_count
                );
            }
        }
        SignerAction::Enable { slug } => {
            storage.set_signer_available(&find(&slug)?, true)?;
            println!("✓ Enabled {}", slug);
        }
        SignerAction::Disable { slug } => {
            storage.set_signer_available(&find(&slug)?, false)?;
            println!("✓ Disabled {}", slug);
        }
    }
    Ok(())
}

async fn handle_cookie(
    config: &Config,
    storage: &SqliteStorage,
    action: CookieAction,
) -> anyhow::Result<()> {
    match action {
        CookieAction::Set {
            kind,
            value,
            ttl_days,
        } => {
            storage.set_credential(kind, &value, Duration::from_secs(ttl_days * 24 * 3600))?;
            println!("✓ Stored {} (expires in {} days)", kind, ttl_days);
        }
        CookieAction::Del { kind } => {
            storage.del_credential(kind)?;
            println!("✓ Deleted {}", kind);
        }
        CookieAction::Check { within_hours } => {
            let notifier = build_notifier(build_http_client(&config.user_agent)?, &config.notify);
            let within = Duration::from_secs(within_hours * 3600);
            let expiring = check_credentials(storage, notifier.as_ref(), within).await?;
            if expiring.is_empty() {
                println!("✓ No credential expires within {} hours", within_hours);
            } else {
                for kind in expiring {
                    println!("✗ {} expires within {} hours", kind, within_hours);
                }
            }
        }
    }
    Ok(())
}

fn handle_jobs(storage: &SqliteStorage, status: Option<&str>) -> anyhow::Result<()> {
    let status = match status {
        Some(s) => Some(
            JobStatus::from_db_string(s).ok_or_else(|| anyhow!("unknown job status '{}'", s))?,
        ),
        None => None,
    };

    let jobs = storage.list_jobs(status)?;
    println!("Jobs ({}):", jobs.len());
    for job in jobs {
        println!(
            "  - {} {} {} (started {}, updated {})",
            job.id,
            job.task_type,
            job.status.to_db_string(),
            job.created_at,
            job.updated_at
        );
    }
    Ok(())
}
