//! Synchronization watermarks

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Last fully processed ledger height of one synchronized stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    /// Stream name, unique per checkpoint
    pub name: String,
    pub height: u64,
    pub updated_on: DateTime<Utc>,
}

impl SyncCheckpoint {
    pub fn new(name: impl Into<String>, height: u64) -> Self {
        Self {
            name: name.into(),
            height,
            updated_on: Utc::now(),
        }
    }
}

/// Chain-derived summary of a processed block, discarded on divergence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub height: u64,
    pub timestamp: DateTime<Utc>,
    pub applied: usize,
    pub skipped: usize,
}
