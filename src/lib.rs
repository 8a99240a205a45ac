//! LOC Registry Library
//!
//! Governance of Legal Officer Cases (LOC) and their items, kept in step
//! with the ledger by a checkpointed chain synchronizer.
//!
//! ## Modules
//!
//! - [`domain`] - Case state machine, item governance, ledger operations
//! - [`infra`] - Collaborator traits, in-memory adapters, case service
//! - [`sync`] - Chain synchronizer and operation dispatch
//! - [`telemetry`] - Structured logging setup

pub mod domain;
pub mod infra;
pub mod sync;
pub mod telemetry;

// Re-export commonly used types
pub use domain::{
    Case, CaseFilter, CaseId, CaseKind, CaseStatus, ChangeSet, ContentHash, Fees, Identity,
    ItemKind, ItemStatus, LedgerBlock, LedgerOperation, NewCase, Requester,
};

pub use infra::{
    BlockJournal, CaseRepository, CaseService, CheckpointStore, ErrorCategory, LedgerClient,
    LocError, Result,
};

pub use sync::{SyncOutcome, Synchronizer, SynchronizerConfig};
