//! In-memory adapters for development, replay and tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use crate::domain::{BlockRecord, Case, CaseFilter, CaseId, ChangeSet, LedgerBlock, SyncCheckpoint};

use super::{BlockJournal, CaseRepository, CheckpointStore, LedgerClient, LocError, Result};

#[derive(Default)]
struct CaseTable {
    cases: HashMap<CaseId, Case>,
    /// Insertion order, for listing
    order: Vec<CaseId>,
}

/// In-memory implementation of CaseRepository
pub struct InMemoryCaseRepository {
    table: RwLock<CaseTable>,
    saves: RwLock<Vec<(CaseId, ChangeSet)>>,
}

impl InMemoryCaseRepository {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(CaseTable::default()),
            saves: RwLock::new(Vec::new()),
        }
    }

    /// Seed a case without recording a save
    pub async fn insert(&self, case: Case) {
        let mut table = self.table.write().await;
        if !table.cases.contains_key(&case.id) {
            table.order.push(case.id);
        }
        table.cases.insert(case.id, case);
    }

    pub async fn get(&self, id: &CaseId) -> Option<Case> {
        self.table.read().await.cases.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.table.read().await.cases.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Change sets received by `save`, oldest first
    pub async fn saves(&self) -> Vec<(CaseId, ChangeSet)> {
        self.saves.read().await.clone()
    }
}

impl Default for InMemoryCaseRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaseRepository for InMemoryCaseRepository {
    async fn find_by_id(&self, id: &CaseId) -> Result<Option<Case>> {
        Ok(self.get(id).await)
    }

    async fn find_by(&self, filter: &CaseFilter) -> Result<Vec<Case>> {
        let table = self.table.read().await;
        Ok(table
            .order
            .iter()
            .filter_map(|id| table.cases.get(id))
            .filter(|case| filter.matches(case))
            .cloned()
            .collect())
    }

    async fn save(&self, case: &Case, changes: &ChangeSet) -> Result<()> {
        self.insert(case.clone()).await;
        self.saves.write().await.push((case.id, changes.clone()));
        Ok(())
    }
}

/// In-memory implementation of CheckpointStore
pub struct InMemoryCheckpointStore {
    checkpoints: RwLock<HashMap<String, SyncCheckpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self {
            checkpoints: RwLock::new(HashMap::new()),
        }
    }

    /// Start from an existing watermark
    pub fn with_checkpoint(checkpoint: SyncCheckpoint) -> Self {
        let mut checkpoints = HashMap::new();
        checkpoints.insert(checkpoint.name.clone(), checkpoint);
        Self {
            checkpoints: RwLock::new(checkpoints),
        }
    }

    pub async fn height(&self, name: &str) -> Option<u64> {
        self.checkpoints.read().await.get(name).map(|c| c.height)
    }
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn find_checkpoint(&self, name: &str) -> Result<Option<SyncCheckpoint>> {
        Ok(self.checkpoints.read().await.get(name).cloned())
    }

    async fn save_checkpoint(&self, checkpoint: &SyncCheckpoint) -> Result<()> {
        self.checkpoints
            .write()
            .await
            .insert(checkpoint.name.clone(), checkpoint.clone());
        Ok(())
    }

    async fn delete_checkpoint(&self, name: &str) -> Result<()> {
        self.checkpoints.write().await.remove(name);
        Ok(())
    }
}

/// In-memory implementation of BlockJournal
pub struct InMemoryBlockJournal {
    records: RwLock<HashMap<String, Vec<BlockRecord>>>,
}

impl InMemoryBlockJournal {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    pub async fn records(&self, stream: &str) -> Vec<BlockRecord> {
        self.records
            .read()
            .await
            .get(stream)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for InMemoryBlockJournal {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlockJournal for InMemoryBlockJournal {
    async fn record(&self, stream: &str, block: &BlockRecord) -> Result<()> {
        let mut records = self.records.write().await;
        let journal = records.entry(stream.to_string()).or_default();
        // Replayed heights overwrite their previous record
        journal.retain(|r| r.height != block.height);
        journal.push(block.clone());
        Ok(())
    }

    async fn discard(&self, stream: &str) -> Result<()> {
        self.records.write().await.remove(stream);
        Ok(())
    }
}

#[derive(Default)]
struct Chain {
    head: u64,
    blocks: BTreeMap<u64, LedgerBlock>,
    fetched: Vec<u64>,
}

/// Scripted ledger: blocks are pushed by the caller and heights without a
/// pushed block are empty.
pub struct InMemoryLedger {
    chain: RwLock<Chain>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            chain: RwLock::new(Chain::default()),
        }
    }

    /// Append a block, moving the head forward if needed
    pub async fn push_block(&self, block: LedgerBlock) {
        let mut chain = self.chain.write().await;
        chain.head = chain.head.max(block.height);
        chain.blocks.insert(block.height, block);
    }

    /// Move the head without adding blocks
    pub async fn set_head(&self, height: u64) {
        self.chain.write().await.head = height;
    }

    /// Roll the chain back to `height`, dropping every block above it
    pub async fn rollback(&self, height: u64) {
        let mut chain = self.chain.write().await;
        chain.head = height;
        chain.blocks.retain(|h, _| *h <= height);
    }

    /// Heights requested through `block_operations`, in call order
    pub async fn fetched_heights(&self) -> Vec<u64> {
        self.chain.read().await.fetched.clone()
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn head_height(&self) -> Result<u64> {
        Ok(self.chain.read().await.head)
    }

    async fn block_operations(&self, height: u64) -> Result<LedgerBlock> {
        let mut chain = self.chain.write().await;
        if height > chain.head {
            return Err(LocError::Ledger(format!(
                "block {} is above head {}",
                height, chain.head
            )));
        }
        chain.fetched.push(height);
        Ok(chain.blocks.get(&height).cloned().unwrap_or_else(|| LedgerBlock {
            height,
            timestamp: DateTime::<Utc>::default(),
            operations: Vec::new(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CaseKind, CaseStatus, Identity, NewCase, Requester};

    fn case(owner: &str) -> Case {
        Case::open(
            NewCase {
                id: CaseId::new(),
                owner: Identity::from(owner),
                requester: Some(Requester::Address(Identity::from("requester"))),
                description: "test".to_string(),
                kind: CaseKind::Transaction,
                seal: None,
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_case_repository_lists_in_insertion_order() {
        let repo = InMemoryCaseRepository::new();
        let first = case("alice");
        let second = case("bob");
        let third = case("alice");
        for c in [&first, &second, &third] {
            repo.save(c, &ChangeSet::empty()).await.unwrap();
        }

        let alice = repo
            .find_by(&CaseFilter {
                owner: Some(Identity::from("alice")),
                ..CaseFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(
            alice.iter().map(|c| c.id).collect::<Vec<_>>(),
            vec![first.id, third.id]
        );
        assert_eq!(repo.saves().await.len(), 3);

        let mut updated = first.clone();
        updated.status = CaseStatus::Closed;
        repo.save(&updated, &ChangeSet::empty()).await.unwrap();
        assert_eq!(repo.len().await, 3);
        assert_eq!(
            repo.find_by_id(&first.id).await.unwrap().unwrap().status,
            CaseStatus::Closed
        );
    }

    #[tokio::test]
    async fn test_in_memory_checkpoint_store() {
        let store = InMemoryCheckpointStore::new();
        assert!(store.find_checkpoint("loc").await.unwrap().is_none());

        store
            .save_checkpoint(&SyncCheckpoint::new("loc", 100))
            .await
            .unwrap();
        assert_eq!(store.height("loc").await, Some(100));

        store.delete_checkpoint("loc").await.unwrap();
        assert!(store.find_checkpoint("loc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_block_journal_discard() {
        let journal = InMemoryBlockJournal::new();
        let record = BlockRecord {
            height: 1,
            timestamp: Utc::now(),
            applied: 2,
            skipped: 0,
        };
        journal.record("loc", &record).await.unwrap();
        journal.record("loc", &record).await.unwrap();
        assert_eq!(journal.records("loc").await, vec![record]);

        journal.discard("loc").await.unwrap();
        assert!(journal.records("loc").await.is_empty());
    }

    #[tokio::test]
    async fn test_ledger_serves_empty_blocks_below_head() {
        let ledger = InMemoryLedger::new();
        ledger.set_head(3).await;

        let block = ledger.block_operations(2).await.unwrap();
        assert_eq!(block.height, 2);
        assert!(block.operations.is_empty());
        assert!(ledger.block_operations(4).await.is_err());
        assert_eq!(ledger.fetched_heights().await, vec![2]);
    }

    #[tokio::test]
    async fn test_ledger_rollback() {
        let ledger = InMemoryLedger::new();
        for height in 1..=5 {
            ledger
                .push_block(LedgerBlock {
                    height,
                    timestamp: Utc::now(),
                    operations: Vec::new(),
                })
                .await;
        }
        assert_eq!(ledger.head_height().await.unwrap(), 5);

        ledger.rollback(2).await;
        assert_eq!(ledger.head_height().await.unwrap(), 2);
        assert!(ledger.block_operations(3).await.is_err());
    }
}
