//! cadence-eval: run one scheduling tick over a snapshot.
//!
//! Loads every policy under the policies directory, evaluates them in
//! dependency order against a JSON graph/state snapshot, persists per-node
//! condition state under the state directory, and prints the partitions
//! requested this tick as JSON.
//!
//! Usage:
//!   cadence-eval --snapshot data/snapshot.json
//!   cadence-eval --snapshot data/snapshot.json --now 2024-03-10T00:30:00Z --dry-run

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use tracing::{info, warn};

use cadence_conditions::memory::Snapshot;
use cadence_conditions::{Evaluator, FileStateStore, FixedClock, LoadStatus, PolicyLoader};
use cadence_core::config::{load_dotenv, Config};

// ── CLI ─────────────────────────────────────────────────────────────

/// Evaluate scheduling policies for a single tick.
#[derive(Parser, Debug)]
#[command(name = "cadence-eval", version, about)]
struct Cli {
    /// JSON snapshot of the asset graph and partition state.
    #[arg(long, env = "CADENCE_SNAPSHOT")]
    snapshot: PathBuf,

    /// Directory of YAML policy files (overrides POLICIES_DIR).
    #[arg(long)]
    policies_dir: Option<PathBuf>,

    /// Directory for persisted condition state (overrides STATE_DIR).
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Evaluation time as RFC 3339. Defaults to the current time.
    #[arg(long)]
    now: Option<DateTime<Utc>>,

    /// Worker threads (overrides EVALUATOR_THREADS).
    #[arg(long)]
    threads: Option<usize>,

    /// Evaluate without persisting condition state.
    #[arg(long)]
    dry_run: bool,

    /// Print full evaluation records instead of just the requested partitions.
    #[arg(long)]
    records: bool,
}

// ── main ────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(dir) = cli.policies_dir {
        config.storage.policies_dir = dir;
    }
    if let Some(dir) = cli.state_dir {
        config.storage.state_dir = dir;
    }
    if let Some(threads) = cli.threads {
        config.evaluator.worker_threads = threads;
    }
    config.log_summary();

    let (policies, load_results) = PolicyLoader::new(&config.storage.policies_dir)
        .load_all()
        .with_context(|| {
            format!(
                "failed to scan policies in {}",
                config.storage.policies_dir.display()
            )
        })?;
    for result in &load_results {
        if let LoadStatus::Failed { error } = &result.status {
            warn!(path = %result.path.display(), error = %error, "skipped invalid policy file");
        }
    }
    info!(policies = policies.len(), files = load_results.len(), "policies loaded");

    let snapshot = Snapshot::from_json_file(&cli.snapshot)
        .with_context(|| format!("failed to read snapshot {}", cli.snapshot.display()))?;
    let (graph, state) = snapshot.into_parts();
    let store = FileStateStore::open(&config.storage.state_dir).with_context(|| {
        format!(
            "failed to open state dir {}",
            config.storage.state_dir.display()
        )
    })?;

    let now = cli.now.unwrap_or_else(Utc::now);
    let evaluator = Evaluator::new(&graph, &state, &store)
        .with_clock(FixedClock(now))
        .with_config(&config.evaluator);
    let tick = evaluator.evaluate_policies(&policies, now)?;

    if cli.dry_run {
        info!("dry run, condition state not persisted");
    } else {
        let mut cursors = 0;
        for (_, result) in &tick.results {
            cursors += evaluator.commit(result, now)?;
        }
        info!(cursors, state_dir = %config.storage.state_dir.display(), "tick committed");
    }

    let output = if cli.records {
        let records: Vec<_> = tick
            .results
            .iter()
            .map(|(asset, result)| {
                serde_json::json!({
                    "asset": asset,
                    "record": result.to_record(),
                })
            })
            .collect();
        serde_json::json!({ "evaluated_at": now, "records": records })
    } else {
        let requests: BTreeMap<String, Vec<String>> = tick
            .requests
            .iter()
            .map(|slice| {
                let keys = slice
                    .iter()
                    .map(|k| k.as_str().unwrap_or_default().to_string())
                    .collect();
                (slice.asset_key.to_user_string(), keys)
            })
            .collect();
        serde_json::json!({ "evaluated_at": now, "requests": requests })
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
