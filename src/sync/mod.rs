//! Chain synchronizer
//!
//! Pulls ledger blocks above the stored checkpoint and stamps the case
//! aggregates this node owns with their chain confirmations.
//!
//! A cycle either applies the whole range up to the head and advances the
//! checkpoint, or fails and leaves the checkpoint where it was. Replaying a
//! range is safe since every chain stamp is idempotent.

mod dispatch;
mod runner;

pub use dispatch::{DispatchResult, OperationDispatcher};
pub use runner::{Synchronizer, SynchronizerConfig};

/// Result of one synchronization cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Checkpoint already at the head
    UpToDate { height: u64 },

    /// Blocks `from + 1 ..= to` were processed
    Advanced {
        from: u64,
        to: u64,
        applied: usize,
        skipped: usize,
    },

    /// Checkpoint was above the head; local chain state was discarded
    Reset { checkpoint: u64, head: u64 },
}

/// Synchronizer statistics
#[derive(Debug, Default, Clone)]
pub struct SyncStats {
    pub cycles: u64,
    pub blocks_processed: u64,
    pub operations_applied: u64,
    pub operations_skipped: u64,
    pub resets: u64,
    pub failed_cycles: u64,
    pub last_height: Option<u64>,
}
