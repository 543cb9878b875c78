//! Command-line inspector for a docsafe recovery store.

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use crossbeam_channel::unbounded;
use docsafe_core::conflict::diff::DiffLine;
use docsafe_core::{
    AutosaveSettings, Config, CorruptedEntry, DiffEngine, DiffRow, DocumentId, EntrySummary,
    LineDiff, MemoryDocuments, RecoveryCoordinator, RecoveryStore, RowTag,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "docsafe", about = "Inspect and manage docsafe recovery snapshots", version)]
struct Cli {
    /// Recovery store directory (defaults to DOCSAFE_STORE_DIR or ~/.cache/docsafe/recovery)
    #[arg(short, long)]
    store: Option<PathBuf>,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List recoverable documents and corrupted snapshots
    List,
    /// Print the recovered content of one document
    Show { id: String },
    /// Diff the recovered content against the file on disk
    Diff { id: String },
    /// Drop the snapshot of one document
    Discard { id: String },
    /// Drop every snapshot
    DeclineAll {
        /// Confirm the irreversible removal
        #[arg(long)]
        yes: bool,
    },
    /// Delete snapshots that failed validation
    DiscardCorrupted,
    /// Apply the age and count retention limits now
    Prune,
    /// Show or change autosave settings
    Settings {
        #[arg(long)]
        enabled: Option<bool>,
        #[arg(long)]
        interval_ms: Option<u64>,
        #[arg(long)]
        max_age_days: Option<u32>,
        #[arg(long)]
        max_files: Option<usize>,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docsafe=info,docsafe_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Environment config with the `--store` override applied.
fn resolve_config(store: Option<PathBuf>) -> Config {
    let mut config = Config::from_env();
    if let Some(store) = store {
        config.store_dir = store;
    }
    config
}

fn format_list_output(
    entries: &[EntrySummary],
    corrupted: &[CorruptedEntry],
    json: bool,
) -> Result<String, String> {
    if json {
        let corrupted: Vec<Value> = corrupted
            .iter()
            .map(|entry| {
                json!({
                    "document_id": entry.document_id,
                    "snapshot_path": entry.snapshot_path,
                    "reason": entry.reason,
                })
            })
            .collect();
        return serde_json::to_string_pretty(&json!({
            "entries": entries,
            "corrupted": corrupted,
        }))
        .map_err(|err| format!("output encoding error: {}", err));
    }

    let mut rows = Vec::with_capacity(entries.len() + corrupted.len());
    for entry in entries {
        let path = entry
            .source_path
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "(untitled)".to_string());
        rows.push(format!(
            "{:<36} {:<20} {:>9}  {}  {}",
            entry.document_id,
            entry.saved_at.format("%Y-%m-%d %H:%M:%S"),
            entry.size_bytes,
            path,
            single_line(&entry.preview)
        ));
    }
    for entry in corrupted {
        let id = entry
            .document_id
            .as_ref()
            .map(DocumentId::to_string)
            .unwrap_or_else(|| "(unknown)".to_string());
        rows.push(format!("{:<36} CORRUPTED: {}", id, entry.reason));
    }
    Ok(rows.join("\n"))
}

fn single_line(text: &str) -> String {
    text.chars()
        .map(|ch| if ch.is_control() { ' ' } else { ch })
        .collect()
}

fn format_diff_rows(rows: &[DiffRow]) -> String {
    let side = |line: &Option<DiffLine>| match line {
        Some(line) => format!("{:>5} {}", line.number, line.text),
        None => String::new(),
    };
    rows.iter()
        .map(|row| {
            let marker = match row.tag {
                RowTag::Equal => ' ',
                RowTag::Changed => '~',
                RowTag::Removed => '-',
                RowTag::Added => '+',
            };
            format!("{} {:<50} | {}", marker, side(&row.left), side(&row.right))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_settings(settings: &AutosaveSettings, json: bool) -> Result<String, String> {
    if json {
        return serde_json::to_string_pretty(settings)
            .map_err(|err| format!("output encoding error: {}", err));
    }
    Ok(format!(
        "enabled: {}\ninterval_ms: {}\nmax_age_days: {}\nmax_files: {}",
        settings.enabled, settings.interval_ms, settings.max_age_days, settings.max_files
    ))
}

fn print_output(output: Result<String, String>) -> anyhow::Result<()> {
    match output {
        Ok(output) if output.is_empty() => Ok(()),
        Ok(output) => {
            println!("{}", output);
            Ok(())
        }
        Err(message) => bail!(message),
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let Cli {
        store,
        json,
        command,
    } = Cli::parse();

    let config = resolve_config(store);
    let store = Arc::new(
        RecoveryStore::open(&config)
            .with_context(|| format!("opening recovery store {}", config.store_dir.display()))?,
    );
    tracing::debug!(store = %store.root().display(), "Opened recovery store");
    let (events_tx, _events) = unbounded();
    let coordinator = RecoveryCoordinator::new(
        store.clone(),
        Arc::new(MemoryDocuments::new()),
        events_tx,
    );

    match command {
        Commands::List => {
            let candidates = coordinator.candidates()?;
            print_output(format_list_output(
                &candidates.entries,
                &candidates.corrupted,
                json,
            ))?;
        }
        Commands::Show { id } => {
            let id = DocumentId::new(id);
            let Some(entry) = store.read_entry(&id)? else {
                bail!("no recovery entry for '{}'", id);
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&entry)?);
            } else {
                print!("{}", entry.content);
            }
        }
        Commands::Diff { id } => {
            let id = DocumentId::new(id);
            let Some(entry) = store.read_entry(&id)? else {
                bail!("no recovery entry for '{}'", id);
            };
            let Some(path) = entry.source_path.as_deref() else {
                bail!("'{}' is untitled; there is no file to compare against", id);
            };
            let disk = match std::fs::read(path) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
                Err(err) => {
                    return Err(err).with_context(|| format!("reading {}", path.display()))
                }
            };
            let rows = LineDiff::default().side_by_side(&disk, &entry.content)?;
            println!("{}", format_diff_rows(&rows));
        }
        Commands::Discard { id } => {
            let id = DocumentId::new(id);
            if !store.discard(&id)? {
                bail!("no recovery entry for '{}'", id);
            }
            println!("Discarded: {}", id);
        }
        Commands::DeclineAll { yes } => {
            if !yes {
                bail!("refusing to drop every snapshot without --yes");
            }
            let removed = coordinator.decline_all()?;
            println!("Discarded {} recovery entries", removed);
        }
        Commands::DiscardCorrupted => {
            let discarded = coordinator.discard_corrupted()?;
            println!("Discarded {} corrupted snapshots", discarded);
        }
        Commands::Prune => {
            let removed = store.prune(Utc::now())?;
            println!("Pruned {} recovery entries", removed);
        }
        Commands::Settings {
            enabled,
            interval_ms,
            max_age_days,
            max_files,
        } => {
            let changed = enabled.is_some()
                || interval_ms.is_some()
                || max_age_days.is_some()
                || max_files.is_some();
            let settings = if changed {
                store.settings().update(|settings| {
                    if let Some(enabled) = enabled {
                        settings.enabled = enabled;
                    }
                    if let Some(interval_ms) = interval_ms {
                        settings.interval_ms = interval_ms;
                    }
                    if let Some(max_age_days) = max_age_days {
                        settings.max_age_days = max_age_days;
                    }
                    if let Some(max_files) = max_files {
                        settings.max_files = max_files;
                    }
                })?
            } else {
                store.settings().get()
            };
            print_output(format_settings(&settings, json))?;
        }
    }
    Ok(())
}
