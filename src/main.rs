// Chronicle Desktop - analysis runner
//
// Drives the conversation analysis queue outside the desktop shell.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, SecondsFormat, Utc};
use chronicle_core::{AnalysisType, ScanScope};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use chronicle_desktop::services::analysis::{AnalysisProgress, PathProbe};
use chronicle_desktop::{AppState, ConfigService, Database};

#[derive(Parser, Debug)]
#[command(name = "chronicle-desktop", version, about = "Run conversation analysis")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: ~/.chronicle/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database file (default: ~/.chronicle/data.db)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one processing cycle over the pending queue
    Process {
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Queue every matching conversation and process until nothing is pending
    Scan {
        /// Analysis types to run (default: all)
        #[arg(long = "type", value_name = "TYPE")]
        types: Vec<AnalysisType>,
        /// Only conversations updated in the last N days
        #[arg(long)]
        since_days: Option<i64>,
        /// Only conversations of this project path
        #[arg(long)]
        project: Option<String>,
        /// Provider allow-list
        #[arg(long = "provider")]
        providers: Vec<String>,
    },
    /// Queue analysis for specific conversations
    Enqueue {
        #[arg(required = true)]
        ids: Vec<String>,
        #[arg(long = "type", value_name = "TYPE")]
        analysis_type: AnalysisType,
        #[arg(long, default_value_t = 0)]
        priority: i64,
    },
    /// Print the number of pending items
    Pending,
    /// Fail items left claimed by a previous session
    Recover,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).context("failed to install logger")?;

    let database = match &cli.database {
        Some(path) => Database::open(path),
        None => Database::new(),
    }
    .context("failed to open database")?;
    let config = match &cli.config {
        Some(path) => ConfigService::with_path(path.clone()),
        None => ConfigService::new(),
    }
    .context("failed to load config")?;
    let state = AppState::from_parts(database, config, Arc::new(PathProbe::new()))?;
    let orchestrator = state.orchestrator().clone();

    let recovered = orchestrator.recover_orphaned_claims().await?;
    if recovered > 0 {
        info!(recovered, "Recovered orphaned claims");
    }

    match cli.command {
        Command::Process { batch_size } => {
            let cycle = orchestrator.process_queue(batch_size, None).await?;
            println!("{}", serde_json::to_string_pretty(&cycle)?);
        }
        Command::Scan {
            types,
            since_days,
            project,
            providers,
        } => {
            let types = if types.is_empty() {
                AnalysisType::CONVERSATION_TYPES.to_vec()
            } else {
                types
            };
            let scope = ScanScope {
                since: since_days.map(|days| {
                    (Utc::now() - Duration::days(days)).to_rfc3339_opts(SecondsFormat::Micros, true)
                }),
                until: None,
                project_path: project,
                providers,
            };

            let cancel = CancellationToken::new();
            let ctrl_c_token = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Received Ctrl+C, stopping after the current cycle");
                    ctrl_c_token.cancel();
                }
            });

            let (tx, mut rx) = mpsc::unbounded_channel();
            let reporter = tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    if let AnalysisProgress::Progress(snapshot) = &event {
                        info!(
                            processed = snapshot.processed,
                            total = snapshot.total,
                            eta_secs = snapshot.eta_secs.unwrap_or_default().round(),
                            "Scan progress"
                        );
                    }
                }
            });

            let result = orchestrator
                .run_full_scan(&types, &scope, &cancel, Some(&tx))
                .await;
            drop(tx);
            let _ = reporter.await;

            let summary = result?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Enqueue {
            ids,
            analysis_type,
            priority,
        } => {
            let queued = orchestrator.enqueue(&ids, analysis_type, priority).await?;
            println!("{}", serde_json::to_string_pretty(&queued)?);
        }
        Command::Pending => {
            println!("{}", orchestrator.pending_count().await?);
        }
        Command::Recover => {
            println!("{}", recovered);
        }
    }

    Ok(())
}
