//! Session Trust Agent for Zentinel
//!
//! Runs the session engine with its TTL sweep, or replays recorded sessions
//! from a JSONL file and prints one verdict per line.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use zentinel_agent_session_trust::{
    Event, RecordOutcome, RequestMeta, SessionManager, TelemetrySnapshot, TrustConfig,
};

#[derive(Parser, Debug)]
#[command(name = "zentinel-agent-session-trust")]
#[command(author, version, about = "Invisible bot detection agent for Zentinel")]
struct Args {
    /// Path to configuration file (JSON or YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Replay sessions from a JSONL file instead of serving
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Enable JSON logging format
    #[arg(long)]
    json_logs: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// One recorded session in a replay file.
#[derive(Debug, Deserialize)]
struct ReplayRecord {
    snapshot: TelemetrySnapshot,
    #[serde(default)]
    request: RequestMeta,
    #[serde(default)]
    events: Vec<Event>,
}

fn init_logging(json: bool, level: &str) {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let env_filter = EnvFilter::from_default_env().add_directive(level.into());

    // logs go to stderr so replay output stays clean
    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn load_config(path: &Path) -> Result<TrustConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let yaml = path.extension().is_some_and(|e| e == "yaml" || e == "yml");
    Ok(TrustConfig::parse(&content, yaml)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(args.json_logs, &args.log_level);

    // Load configuration
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => TrustConfig::default(),
    };

    let manager = Arc::new(SessionManager::new(config)?);

    if let Some(path) = &args.replay {
        return replay(&manager, path).await;
    }

    info!(
        ttl_seconds = manager.config().session.ttl_seconds,
        sweep_interval_seconds = manager.config().session.sweep_interval_seconds,
        "Starting session trust agent"
    );

    let sweeper = tokio::spawn(Arc::clone(&manager).sweep_loop());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    sweeper.abort();
    manager.shutdown();

    Ok(())
}

/// Push every recorded session through create, record and evaluate.
async fn replay(manager: &SessionManager, path: &Path) -> Result<()> {
    let file = std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut replayed = 0usize;

    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let record: ReplayRecord = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                warn!(line = index + 1, error = %e, "Skipping malformed replay record");
                continue;
            }
        };

        let created = manager.create_session(record.snapshot, record.request).await;
        for event in record.events {
            if let RecordOutcome::Closed { .. } = manager.record_event(&created.session_id, event)? {
                break;
            }
        }

        let verdict = manager.evaluate(&created.session_id)?;
        serde_json::to_writer(&mut out, &verdict)?;
        writeln!(out)?;
        replayed += 1;
    }

    out.flush()?;
    info!(sessions = replayed, "Replay complete");
    Ok(())
}
