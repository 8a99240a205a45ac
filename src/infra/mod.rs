//! Infrastructure layer for the LOC registry
//!
//! Contains the collaborator traits, their in-memory implementations and
//! the case service that persists successful mutations.

mod case_service;
mod error;
mod memory;
mod traits;

pub use case_service::CaseService;
pub use error::*;
pub use memory::{InMemoryBlockJournal, InMemoryCaseRepository, InMemoryCheckpointStore, InMemoryLedger};
pub use traits::*;
