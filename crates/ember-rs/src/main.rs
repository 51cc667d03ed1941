//! Operator CLI for an Ember memory store.

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use ember_rs::config::{API_KEY_ENV, EmberConfig};
use ember_rs::core::{CompactionOutcome, MemoryService, PipelineError};
use ember_rs::memory::{DirMedium, DurableStore, Role};
use log::{debug, info, warn};
use serde_json::{Value, json};
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Command-line options for the Ember CLI.
#[derive(Parser)]
#[command(name = "ember", version)]
struct Cli {
    /// Optional path to an ember.json5 config file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the store directory
    #[arg(long)]
    root: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print storage figures for the store as JSON
    Status,
    /// Print the active memory document (or a backup)
    Show {
        /// Backup slot to show instead of the active document
        #[arg(long)]
        backup: Option<usize>,
    },
    /// List occupied backup slots
    Backups,
    /// Feed a transcript ("user: ..." / "assistant: ..." lines) and compact it
    Ingest {
        /// Transcript file; stdin when omitted
        file: Option<PathBuf>,
        /// Skip the final compaction of turns left below the threshold
        #[arg(long)]
        no_compact: bool,
    },
    /// Restore a backup slot over the active document
    Rollback { version: usize },
    /// Remove backup slots beyond the configured chain
    Clean,
}

/// Entry point for the Ember CLI.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ember_rs::init_logging();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_ref())?;
    if let Some(root) = cli.root.as_ref() {
        config.storage.root = Some(root.to_string_lossy().to_string());
    }
    info!(
        "ember starting (root={})",
        config.storage_root().display()
    );

    match cli.command {
        Command::Status => {
            let store = open_store(&config)?;
            println!("{}", serde_json::to_string_pretty(&storage_summary(&store)?)?);
        }
        Command::Show { backup } => {
            let store = open_store(&config)?;
            let document = match backup {
                Some(version) => store
                    .backup(version)?
                    .with_context(|| format!("backup {version} is empty"))?,
                None => store.read_memory()?,
            };
            println!("{}", document.to_json_pretty()?);
        }
        Command::Backups => {
            let store = open_store(&config)?;
            for version in store.backup_versions()? {
                println!("{version}");
            }
        }
        Command::Ingest { file, no_compact } => {
            let transcript = read_transcript(file.as_ref())?;
            ingest(&config, &transcript, !no_compact).await?;
        }
        Command::Rollback { version } => {
            let store = open_store(&config)?;
            store
                .rollback_to_backup(version)
                .with_context(|| format!("rollback to backup {version} failed"))?;
            println!("restored backup {version}");
        }
        Command::Clean => {
            let store = open_store(&config)?;
            let removed = store.clean_old_backups()?;
            println!("removed {removed} stale backup(s)");
        }
    }
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<EmberConfig> {
    if let Some(path) = path {
        let mut config = EmberConfig::load_from_path(path).context("failed to load config")?;
        if let Ok(api_key) = std::env::var(API_KEY_ENV)
            && !api_key.trim().is_empty()
        {
            config.device.api_key = Some(api_key);
        }
        return Ok(config);
    }
    let cwd = std::env::current_dir().context("cwd")?;
    let layered = EmberConfig::load_layered(&cwd).context("failed to load layered config")?;
    debug!("layered config loaded (layers={})", layered.layers.len());
    Ok(layered.config)
}

/// Open the store directly; used by commands that do not compact.
fn open_store(config: &EmberConfig) -> anyhow::Result<DurableStore> {
    let medium = DirMedium::open(config.storage_root(), config.storage.partition_bytes)
        .context("failed to open store directory")?;
    Ok(DurableStore::new(
        Arc::new(medium),
        config.storage.max_backups,
    ))
}

/// Storage figures; buffer state lives only in a running worker.
fn storage_summary(store: &DurableStore) -> anyhow::Result<Value> {
    Ok(json!({
        "has_memory": store.has_memory()?,
        "backups": store.backup_versions()?,
        "free_space_kb": store.free_space()? / 1024,
        "used_space_kb": store.used_space()? / 1024,
        "total_space_kb": store.total_space() / 1024,
    }))
}

fn read_transcript(file: Option<&PathBuf>) -> anyhow::Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read stdin")?;
            Ok(buffer)
        }
    }
}

/// Parse a `role: content` transcript line; blank lines yield `None`.
fn parse_line(line: &str) -> anyhow::Result<Option<(Role, String)>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some((role, content)) = line.split_once(':') else {
        bail!("expected `role: content`, got {line:?}");
    };
    let role: Role = role.parse()?;
    Ok(Some((role, content.trim().to_string())))
}

async fn ingest(config: &EmberConfig, transcript: &str, compact: bool) -> anyhow::Result<()> {
    let mut turns = Vec::new();
    for (index, line) in transcript.lines().enumerate() {
        if let Some(turn) =
            parse_line(line).with_context(|| format!("transcript line {}", index + 1))?
        {
            turns.push(turn);
        }
    }
    if turns.is_empty() {
        warn!("transcript contained no turns");
        return Ok(());
    }

    let service = MemoryService::start(config).context("failed to start memory service")?;
    let pipeline = service.pipeline().clone();
    for (role, content) in turns {
        // retry while the worker is busy compacting
        loop {
            match pipeline.add_conversation(role, content.clone()).await {
                Err(PipelineError::QueueFull) => {
                    debug!("queue full, retrying turn");
                    tokio::time::sleep(Duration::from_millis(250)).await;
                }
                result => {
                    result?;
                    break;
                }
            }
        }
    }
    if compact {
        let report = pipeline.update_memory().await?;
        match report.outcome {
            CompactionOutcome::Committed => println!(
                "committed {} turn(s), {} memories, {} bytes",
                report.turns_merged, report.memories, report.document_bytes
            ),
            CompactionOutcome::Skipped => println!("nothing left to compact"),
        }
    }
    println!("{}", serde_json::to_string_pretty(&service.status()?)?);
    drop(pipeline);
    service.shutdown().await?;
    Ok(())
}
