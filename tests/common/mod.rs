//! Common test utilities and fixtures for integration tests

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use std::sync::Arc;

use loc_registry::domain::{FilePayload, LedgerBlock, LedgerOperation, MetadataPayload, SyncCheckpoint};
use loc_registry::infra::{
    InMemoryBlockJournal, InMemoryCaseRepository, InMemoryCheckpointStore, InMemoryLedger,
};
use loc_registry::{
    Case, CaseId, CaseKind, ContentHash, Identity, NewCase, Requester, Synchronizer,
    SynchronizerConfig,
};

pub const STREAM: &str = "loc";

/// Legal officer owning the test cases and running the test node
pub fn owner() -> Identity {
    Identity::from("5LegalOfficer")
}

pub fn requester() -> Identity {
    Identity::from("5Requester")
}

pub fn third_party() -> Identity {
    Identity::from("5Stranger")
}

/// Deterministic block timestamp
pub fn block_time(height: u64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + (height as i64) * 6, 0).unwrap()
}

pub fn new_case(kind: CaseKind) -> NewCase {
    NewCase {
        id: CaseId::new(),
        owner: owner(),
        requester: Some(Requester::Address(requester())),
        description: "Deed of sale".to_string(),
        kind,
        seal: None,
    }
}

pub fn draft_case() -> Case {
    Case::draft(new_case(CaseKind::Transaction)).unwrap()
}

pub fn open_case(kind: CaseKind) -> Case {
    Case::open(new_case(kind), block_time(0)).unwrap()
}

pub fn file(hash: &str) -> FilePayload {
    FilePayload {
        hash: ContentHash::from(hash),
        name: format!("{}.pdf", hash),
        size: 1024,
        content_type: "application/pdf".to_string(),
        storage_ref: format!("cid-{}", hash),
        nature: "contract".to_string(),
        restricted_delivery: false,
        delivered: Vec::new(),
    }
}

pub fn metadata(name: &str, value: &str) -> MetadataPayload {
    MetadataPayload {
        name: name.to_string(),
        value: value.to_string(),
    }
}

pub fn op(kind: &str, case_id: CaseId) -> LedgerOperation {
    LedgerOperation::new(kind, json!({ "loc_id": case_id.to_string() })).with_partial_fee(100)
}

pub fn add_file_op(case_id: CaseId, hash: &str) -> LedgerOperation {
    LedgerOperation::new(
        "loc.add_file",
        json!({ "loc_id": case_id.to_string(), "hash": hash }),
    )
    .with_partial_fee(100)
    .with_storage_fee(40)
}

pub fn add_metadata_op(case_id: CaseId, name: &str) -> LedgerOperation {
    LedgerOperation::new(
        "loc.add_metadata",
        json!({ "loc_id": case_id.to_string(), "name": name }),
    )
    .with_partial_fee(100)
}

pub fn block(height: u64, operations: Vec<LedgerOperation>) -> LedgerBlock {
    LedgerBlock {
        height,
        timestamp: block_time(height),
        operations,
    }
}

/// Synchronizer wired to in-memory collaborators
pub struct SyncHarness {
    pub repository: Arc<InMemoryCaseRepository>,
    pub ledger: Arc<InMemoryLedger>,
    pub checkpoints: Arc<InMemoryCheckpointStore>,
    pub journal: Arc<InMemoryBlockJournal>,
    pub synchronizer: Synchronizer,
}

impl SyncHarness {
    pub fn new() -> Self {
        Self::with_checkpoint(None)
    }

    pub fn with_checkpoint(height: Option<u64>) -> Self {
        let repository = Arc::new(InMemoryCaseRepository::new());
        let ledger = Arc::new(InMemoryLedger::new());
        let checkpoints = Arc::new(match height {
            Some(height) => {
                InMemoryCheckpointStore::with_checkpoint(SyncCheckpoint::new(STREAM, height))
            }
            None => InMemoryCheckpointStore::new(),
        });
        let journal = Arc::new(InMemoryBlockJournal::new());
        let synchronizer = Synchronizer::new(
            SynchronizerConfig::new(owner()),
            ledger.clone(),
            checkpoints.clone(),
            journal.clone(),
            repository.clone(),
        );
        Self {
            repository,
            ledger,
            checkpoints,
            journal,
            synchronizer,
        }
    }

    pub async fn checkpoint(&self) -> Option<u64> {
        self.checkpoints.height(STREAM).await
    }

    pub async fn case(&self, id: &CaseId) -> Case {
        self.repository.get(id).await.unwrap()
    }
}
