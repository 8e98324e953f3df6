//! forgehand CLI - runs the agent over GitHub events.
//!
//! This is the main binary entry point. See the `forgehand` library for the
//! core functionality.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use forgehand::{Agent, CliSessionFactory, Config, HandleOutcome, RestGithubClient, WorktreeProvisioner};
use mimalloc::MiMalloc;
use serde::Deserialize;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Global allocator configured per M-MIMALLOC-APPS guideline.
/// mimalloc provides better multi-threaded performance than the system allocator.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

// CLI
#[derive(Parser)]
#[command(name = "forgehand")]
#[command(version)]
#[command(about = "Turns GitHub events into AI-authored code changes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Handle a single event and print the outcome
    Handle {
        /// Event type, as in the X-GitHub-Event header
        #[arg(long)]
        event: String,
        /// Payload file, or `-` for stdin
        #[arg(long, default_value = "-")]
        payload: String,
    },
    /// Run the sweeper and handle newline-delimited event envelopes from stdin
    Run,
    /// Print the effective configuration
    Config,
}

/// One line of `forgehand run` input.
#[derive(Deserialize)]
struct Envelope {
    event: String,
    payload: serde_json::Value,
}

fn init_logging() -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Ok(path) = std::env::var("FORGEHAND_LOG_FILE") {
        let path = PathBuf::from(path);
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {:?}", path))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }
    builder.format_timestamp_secs().init();
    Ok(())
}

fn build_agent(config: Config) -> Result<Agent> {
    if !config.has_token() {
        log::warn!("No GitHub token configured; set GITHUB_TOKEN or FORGEHAND_GITHUB_TOKEN");
    }
    let github = RestGithubClient::new(&config.github_api_url, &config.github_token)?;
    let provisioner = WorktreeProvisioner::new(config.workspace_base.clone(), &config.branch_prefix)
        .with_token(&config.github_token)
        .with_identity(&config.git_user_name, &config.git_user_email);
    let sessions = CliSessionFactory::new(Arc::new(config.clone()));
    Ok(Agent::new(
        config,
        Arc::new(github),
        Arc::new(provisioner),
        Arc::new(sessions),
    ))
}

fn read_payload(source: &str) -> Result<Vec<u8>> {
    if source == "-" {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .context("Failed to read payload from stdin")?;
        Ok(buf)
    } else {
        std::fs::read(source).with_context(|| format!("Failed to read payload {}", source))
    }
}

fn print_outcome(outcome: &HandleOutcome) {
    match outcome {
        HandleOutcome::Handled { mode } => println!("handled by {mode}"),
        HandleOutcome::Ignored => println!("ignored"),
    }
}

async fn run(agent: Arc<Agent>) -> Result<()> {
    let token = CancellationToken::new();
    let sweeper = agent.spawn_sweeper(token.clone());
    let mut tasks = JoinSet::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    log::info!("Reading events from stdin");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted, shutting down");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    log::info!("End of input");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let envelope: Envelope = match serde_json::from_str(&line) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        log::error!("Skipping malformed envelope: {}", e);
                        continue;
                    }
                };
                let agent = Arc::clone(&agent);
                tasks.spawn(async move {
                    let payload = envelope.payload.to_string();
                    if let Err(e) = agent.handle(&envelope.event, payload.as_bytes()).await {
                        log::error!("Failed to handle {} event: {:#}", envelope.event, e);
                    }
                });
            }
        }
    }

    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            log::error!("Event task failed: {}", e);
        }
    }
    token.cancel();
    sweeper.await.context("Sweeper task failed")?;
    Ok(())
}

fn main() -> Result<()> {
    init_logging()?;
    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Handle { event, payload } => {
            let payload = read_payload(&payload)?;
            let agent = build_agent(config)?;
            let runtime = tokio::runtime::Runtime::new()?;
            let outcome = runtime.block_on(agent.handle(&event, &payload))?;
            print_outcome(&outcome);
        }
        Commands::Run => {
            let agent = Arc::new(build_agent(config)?);
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(run(agent))?;
        }
    }

    Ok(())
}
