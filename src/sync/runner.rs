//! Synchronization runner
//!
//! Each cycle reads the checkpoint `C` and the chain head `H`:
//! - `C > H` means the chain diverged from what this node saw; the local
//!   chain-derived state and the checkpoint are dropped and the next cycle
//!   starts from genesis.
//! - Otherwise blocks `(C, H]` are processed in height order and the
//!   checkpoint moves to `H` once all of them are applied.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, instrument, warn};

use super::{DispatchResult, OperationDispatcher, SyncOutcome, SyncStats};
use crate::domain::{BlockRecord, Identity, SyncCheckpoint};
use crate::infra::{
    BlockJournal, CaseRepository, CaseService, CheckpointStore, LedgerClient, LocError, Result,
};

/// Synchronizer configuration
#[derive(Debug, Clone)]
pub struct SynchronizerConfig {
    /// Checkpoint name of the synchronized stream
    pub stream_name: String,

    /// Identity whose cases this node maintains
    pub node_owner: Identity,

    /// Delay between cycles of `run`
    pub poll_interval: Duration,
}

impl SynchronizerConfig {
    pub const DEFAULT_STREAM: &'static str = "loc";
    pub const DEFAULT_POLL_MS: u64 = 6_000;

    pub fn new(node_owner: Identity) -> Self {
        Self {
            stream_name: Self::DEFAULT_STREAM.to_string(),
            node_owner,
            poll_interval: Duration::from_millis(Self::DEFAULT_POLL_MS),
        }
    }

    /// Load configuration from environment variables
    ///
    /// `LOC_NODE_OWNER` is required; `LOC_SYNC_STREAM` and `LOC_SYNC_POLL_MS`
    /// fall back to their defaults.
    pub fn from_env() -> Result<Self> {
        let node_owner = std::env::var("LOC_NODE_OWNER")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| LocError::Configuration("LOC_NODE_OWNER is not set".to_string()))?;

        let stream_name = std::env::var("LOC_SYNC_STREAM")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| Self::DEFAULT_STREAM.to_string());

        let poll_ms = std::env::var("LOC_SYNC_POLL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(Self::DEFAULT_POLL_MS);

        Ok(Self {
            stream_name,
            node_owner: Identity::new(node_owner),
            poll_interval: Duration::from_millis(poll_ms),
        })
    }
}

pub struct Synchronizer {
    config: SynchronizerConfig,
    ledger: Arc<dyn LedgerClient>,
    checkpoints: Arc<dyn CheckpointStore>,
    journal: Arc<dyn BlockJournal>,
    dispatcher: OperationDispatcher,
    stats: RwLock<SyncStats>,
    running: RwLock<bool>,
    /// Pending stop request, consumed by `run` on exit
    stop_tx: watch::Sender<bool>,
}

impl Synchronizer {
    pub fn new(
        config: SynchronizerConfig,
        ledger: Arc<dyn LedgerClient>,
        checkpoints: Arc<dyn CheckpointStore>,
        journal: Arc<dyn BlockJournal>,
        repository: Arc<dyn CaseRepository>,
    ) -> Self {
        let cases = Arc::new(CaseService::new(repository));
        let dispatcher = OperationDispatcher::new(cases, config.node_owner.clone());
        Self {
            config,
            ledger,
            checkpoints,
            journal,
            dispatcher,
            stats: RwLock::new(SyncStats::default()),
            running: RwLock::new(false),
            stop_tx: watch::channel(false).0,
        }
    }

    pub async fn stats(&self) -> SyncStats {
        self.stats.read().await.clone()
    }

    /// Run one synchronization cycle
    #[instrument(skip(self), fields(stream = %self.config.stream_name))]
    pub async fn run_cycle(&self) -> Result<SyncOutcome> {
        let result = self.sync_to_head().await;

        let mut stats = self.stats.write().await;
        stats.cycles += 1;
        match &result {
            Ok(SyncOutcome::Reset { .. }) => {
                stats.resets += 1;
                stats.last_height = None;
            }
            Ok(SyncOutcome::Advanced {
                from,
                to,
                applied,
                skipped,
            }) => {
                // Counted once the checkpoint moved; aborted ranges are retried
                stats.blocks_processed += to - from;
                stats.operations_applied += *applied as u64;
                stats.operations_skipped += *skipped as u64;
                stats.last_height = Some(*to);
            }
            Ok(SyncOutcome::UpToDate { height }) => stats.last_height = Some(*height),
            Err(_) => stats.failed_cycles += 1,
        }
        result
    }

    async fn sync_to_head(&self) -> Result<SyncOutcome> {
        let stream = self.config.stream_name.as_str();
        let head = self.ledger.head_height().await?;
        let checkpoint = self
            .checkpoints
            .find_checkpoint(stream)
            .await?
            .map(|c| c.height)
            .unwrap_or(0);

        if checkpoint > head {
            warn!(
                checkpoint = checkpoint,
                head = head,
                "checkpoint is above chain head, discarding chain-derived state"
            );
            self.journal.discard(stream).await?;
            self.checkpoints.delete_checkpoint(stream).await?;
            return Ok(SyncOutcome::Reset { checkpoint, head });
        }

        if checkpoint == head {
            debug!(height = head, "already at chain head");
            return Ok(SyncOutcome::UpToDate { height: head });
        }

        let mut applied = 0;
        let mut skipped = 0;
        for height in (checkpoint + 1)..=head {
            let record = self.process_block(height).await?;
            applied += record.applied;
            skipped += record.skipped;
        }

        self.checkpoints
            .save_checkpoint(&SyncCheckpoint::new(stream, head))
            .await?;
        info!(
            from = checkpoint,
            to = head,
            applied = applied,
            skipped = skipped,
            "synchronized to chain head"
        );

        Ok(SyncOutcome::Advanced {
            from: checkpoint,
            to: head,
            applied,
            skipped,
        })
    }

    /// Fetch one block and dispatch its operations in emission order
    #[instrument(skip(self))]
    pub async fn process_block(&self, height: u64) -> Result<BlockRecord> {
        let block = self.ledger.block_operations(height).await?;
        let mut record = BlockRecord {
            height,
            timestamp: block.timestamp,
            applied: 0,
            skipped: 0,
        };

        for op in &block.operations {
            match self.dispatcher.dispatch(op, block.timestamp).await {
                Ok(DispatchResult::Applied { .. }) => record.applied += 1,
                Ok(DispatchResult::Skipped { reason }) => {
                    debug!(kind = %op.kind, reason = %reason, "operation skipped");
                    record.skipped += 1;
                }
                Err(e) => {
                    error!(height = height, kind = %op.kind, error = %e, "failed to apply ledger operation");
                    return Err(e);
                }
            }
        }

        self.journal
            .record(&self.config.stream_name, &record)
            .await?;
        Ok(record)
    }

    /// Repeat cycles every poll interval until stopped.
    ///
    /// A `stop` issued before `run` starts makes it return without a cycle.
    pub async fn run(&self) -> Result<()> {
        {
            let mut running = self.running.write().await;
            if *running {
                return Err(LocError::Internal(
                    "synchronizer already running".to_string(),
                ));
            }
            *running = true;
        }

        info!(
            stream = %self.config.stream_name,
            node_owner = %self.config.node_owner,
            "starting synchronizer"
        );

        let mut stop_rx = self.stop_tx.subscribe();
        loop {
            if *stop_rx.borrow_and_update() {
                info!("synchronizer stopping");
                break;
            }

            if let Err(e) = self.run_cycle().await {
                // The checkpoint did not move; the range is retried next tick
                error!(error = %e, category = ?e.category(), "synchronization cycle failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = stop_rx.changed() => {}
            }
        }

        self.stop_tx.send_replace(false);
        *self.running.write().await = false;
        Ok(())
    }

    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }
}
