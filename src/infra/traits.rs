//! Collaborator traits for the LOC registry

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::domain::{BlockRecord, Case, CaseFilter, CaseId, ChangeSet, LedgerBlock, SyncCheckpoint};

use super::Result;

/// Persistence of case aggregates.
///
/// Invariant: (case id, key) is unique per item kind, items keep their index order.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CaseRepository: Send + Sync {
    async fn find_by_id(&self, id: &CaseId) -> Result<Option<Case>>;

    /// List cases matching a filter, in creation order
    async fn find_by(&self, filter: &CaseFilter) -> Result<Vec<Case>>;

    /// Persist a case together with the item delta produced by its last mutation
    ///
    /// New cases are saved with an empty change set.
    async fn save(&self, case: &Case, changes: &ChangeSet) -> Result<()>;
}

/// Synchronization watermarks, unique by stream name
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn find_checkpoint(&self, name: &str) -> Result<Option<SyncCheckpoint>>;

    async fn save_checkpoint(&self, checkpoint: &SyncCheckpoint) -> Result<()>;

    async fn delete_checkpoint(&self, name: &str) -> Result<()>;
}

/// Locally cached chain-derived state, rebuilt after a divergence
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BlockJournal: Send + Sync {
    async fn record(&self, stream: &str, block: &BlockRecord) -> Result<()>;

    /// Drop everything recorded for a stream
    async fn discard(&self, stream: &str) -> Result<()>;
}

/// Read access to the ledger
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Height of the current chain head
    async fn head_height(&self) -> Result<u64>;

    /// Operations of the block at `height`, in emission order
    async fn block_operations(&self, height: u64) -> Result<LedgerBlock>;
}
