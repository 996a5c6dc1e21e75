mod cancel;
mod cli;
mod config;
mod container;
mod error;
mod events;
mod integration;
mod locks;
mod logging;
mod model;
mod principal;
mod store;
mod workflow;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use crate::cancel::CancellationToken;
use crate::cli::{ContainerCommand, IntegrationCommand, OutputMode, WorkflowCommand};
use crate::events::{BroadcastSink, EventSink, FanoutSink, NoopSink, TracingSink};
use crate::principal::Principal;
use crate::store::SqliteStore;

#[derive(Parser)]
#[command(name = "flowdeck")]
#[command(about = "Build automation workflows and manage simulated MCP containers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// User the command acts for
    #[arg(long, global = true, default_value = "local")]
    owner: String,

    /// SQLite database (overrides [storage] path)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Project directory holding .flowdeck/config.toml (defaults to current)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Print every change event to stderr as it happens
    #[arg(long, global = true)]
    events: bool,

    /// Also write logs to a file under the data directory
    #[arg(long, global = true)]
    log_file: bool,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Suppress normal output
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a workflow definition file without storing it
    Validate {
        /// TOML or JSON definition
        file: PathBuf,
    },

    /// Manage workflows and their executions
    #[command(subcommand)]
    Workflow(WorkflowCommand),

    /// Manage simulated MCP containers
    #[command(subcommand)]
    Container(ContainerCommand),

    /// Manage service integrations
    #[command(subcommand)]
    Integration(IntegrationCommand),
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Validate { .. } => "validate",
            Commands::Workflow(_) => "workflow",
            Commands::Container(_) => "container",
            Commands::Integration(_) => "integration",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_file = if cli.log_file {
        Some(logging::default_log_path(cli.command.name())?)
    } else {
        None
    };
    logging::init_logging(cli.debug, cli.quiet, log_file)?;

    let config = config::FlowdeckConfig::load(cli.dir.as_deref())?;
    let handler = cli::create_handler(OutputMode::from_flags(cli.json, cli.quiet), cli.debug);

    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            if let Err(err) = cli::setup_signal_handlers(token).await {
                tracing::warn!(error = %err, "Could not install signal handlers");
            }
        });
    }

    let principal = Principal::new(cli.owner);
    let result = match cli.command {
        Commands::Validate { file } => cli::validate_definition(&file, &*handler),
        Commands::Workflow(command) => {
            let ctx = open_context(principal, cli.db, cli.events, &config)?;
            cli::run_workflow(&ctx, command, &*handler).await
        }
        Commands::Container(command) => {
            let ctx = open_context(principal, cli.db, cli.events, &config)?;
            cli::run_container(&ctx, command, &token, &*handler).await
        }
        Commands::Integration(command) => {
            let ctx = open_context(principal, cli.db, cli.events, &config)?;
            cli::run_integration(&ctx, command, &*handler).await
        }
    };

    match result {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(err) => {
            let client_error = err
                .downcast_ref::<error::FlowError>()
                .is_some_and(|e| e.is_client_error());
            eprintln!("Error: {:#}", err);
            std::process::exit(if client_error { 2 } else { 1 });
        }
    }
}

/// Open the store and wire the services for one command
fn open_context(
    principal: Principal,
    db: Option<PathBuf>,
    print_events: bool,
    config: &config::FlowdeckConfig,
) -> Result<cli::Context> {
    let db_path = match db {
        Some(path) => path,
        None => config.storage.database_path()?,
    };
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let store = Arc::new(
        SqliteStore::open(&db_path)
            .with_context(|| format!("opening database {}", db_path.display()))?,
    );
    tracing::debug!(path = %db_path.display(), "Opened database");

    let mut sinks = FanoutSink::new();
    if config.events.log {
        sinks = sinks.with(Arc::new(TracingSink));
    }
    if print_events {
        let broadcast = BroadcastSink::new(config.events.capacity);
        let mut receiver = broadcast.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if let Ok(line) = serde_json::to_string(&event) {
                            eprintln!("{}", line);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Event printer fell behind");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        sinks = sinks.with(Arc::new(broadcast));
    }
    let events: Arc<dyn EventSink> = if sinks.is_empty() {
        Arc::new(NoopSink)
    } else {
        Arc::new(sinks)
    };

    Ok(cli::Context::new(principal, store, events, config))
}
