use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;

use loc_registry::domain::{Case, LedgerBlock, SyncCheckpoint};
use loc_registry::infra::{
    CaseRepository, InMemoryBlockJournal, InMemoryCaseRepository, InMemoryCheckpointStore,
    InMemoryLedger,
};
use loc_registry::telemetry::{init_telemetry, TelemetryConfig};
use loc_registry::{CaseFilter, Identity, SyncOutcome, Synchronizer, SynchronizerConfig};

fn print_help() {
    eprintln!(
        "\
loc-replay

Replays recorded ledger blocks against a set of cases and prints the
resulting cases as JSON.

USAGE:
  loc-replay --blocks <path> [options]

OPTIONS:
  --blocks <path>                 (required) NDJSON file, one ledger block per line
  --cases <path>                  (optional) JSON array of cases to start from
  --node-owner <address>          (defaults to env LOC_NODE_OWNER)
  --stream <name>                 (defaults to env LOC_SYNC_STREAM or \"loc\")
  --checkpoint <n>                (optional) Height already processed
  --output <path>                 (optional) Output file path (default: stdout)
"
    );
}

#[derive(Debug, Default)]
struct ReplayArgs {
    blocks: Option<PathBuf>,
    cases: Option<PathBuf>,
    node_owner: Option<String>,
    stream: Option<String>,
    checkpoint: Option<u64>,
    output: Option<PathBuf>,
}

fn parse_args(mut args: VecDeque<String>) -> anyhow::Result<Option<ReplayArgs>> {
    let mut parsed = ReplayArgs::default();
    while let Some(arg) = args.pop_front() {
        let mut value = |name: &str| {
            args.pop_front()
                .ok_or_else(|| anyhow::anyhow!("{name} requires a value"))
        };
        match arg.as_str() {
            "--blocks" => parsed.blocks = Some(PathBuf::from(value("--blocks")?)),
            "--cases" => parsed.cases = Some(PathBuf::from(value("--cases")?)),
            "--node-owner" => parsed.node_owner = Some(value("--node-owner")?),
            "--stream" => parsed.stream = Some(value("--stream")?),
            "--checkpoint" => {
                parsed.checkpoint = Some(
                    value("--checkpoint")?
                        .parse()
                        .context("--checkpoint must be a block height")?,
                )
            }
            "--output" => parsed.output = Some(PathBuf::from(value("--output")?)),
            "-h" | "--help" => return Ok(None),
            other => anyhow::bail!("unknown option: {other}"),
        }
    }
    Ok(Some(parsed))
}

fn load_blocks(path: &Path) -> anyhow::Result<Vec<LedgerBlock>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("{}:{}: invalid ledger block", path.display(), n + 1))
        })
        .collect()
}

fn load_cases(path: &Path) -> anyhow::Result<Vec<Case>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("{}: invalid cases", path.display()))
}

fn build_config(args: &ReplayArgs) -> anyhow::Result<SynchronizerConfig> {
    let mut config = match &args.node_owner {
        Some(owner) => {
            let mut config = SynchronizerConfig::new(Identity::new(owner.clone()));
            if let Ok(stream) = std::env::var("LOC_SYNC_STREAM") {
                config.stream_name = stream;
            }
            config
        }
        None => SynchronizerConfig::from_env()
            .context("pass --node-owner or set LOC_NODE_OWNER")?,
    };
    if let Some(stream) = &args.stream {
        config.stream_name = stream.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: VecDeque<String> = std::env::args().skip(1).collect();
    let Some(args) = parse_args(args)? else {
        print_help();
        return Ok(());
    };
    let Some(blocks_path) = args.blocks.as_ref() else {
        print_help();
        anyhow::bail!("--blocks is required");
    };

    init_telemetry(&TelemetryConfig::from_env())
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    let config = build_config(&args)?;
    let stream = config.stream_name.clone();

    let repository = Arc::new(InMemoryCaseRepository::new());
    if let Some(path) = &args.cases {
        for case in load_cases(path)? {
            repository.insert(case).await;
        }
    }

    let ledger = Arc::new(InMemoryLedger::new());
    for block in load_blocks(blocks_path)? {
        ledger.push_block(block).await;
    }

    let checkpoints = Arc::new(match args.checkpoint {
        Some(height) => InMemoryCheckpointStore::with_checkpoint(SyncCheckpoint::new(&stream, height)),
        None => InMemoryCheckpointStore::new(),
    });

    let synchronizer = Synchronizer::new(
        config,
        ledger,
        checkpoints,
        Arc::new(InMemoryBlockJournal::new()),
        repository.clone(),
    );

    let mut outcome = synchronizer.run_cycle().await?;
    if let SyncOutcome::Reset { .. } = outcome {
        outcome = synchronizer.run_cycle().await?;
    }

    let cases = repository.find_by(&CaseFilter::default()).await?;
    let stats = synchronizer.stats().await;
    let summary = serde_json::json!({
        "outcome": format!("{:?}", outcome),
        "stats": {
            "blocks_processed": stats.blocks_processed,
            "operations_applied": stats.operations_applied,
            "operations_skipped": stats.operations_skipped,
        },
        "cases": cases,
    });
    let rendered = serde_json::to_string_pretty(&summary)?;

    match &args.output {
        Some(path) => std::fs::write(path, rendered)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{rendered}"),
    }

    Ok(())
}
