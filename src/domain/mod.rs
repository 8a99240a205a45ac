//! Domain models for the LOC registry
//!
//! Cases and their items, change sets handed to persistence, and the ledger
//! operations the synchronizer consumes.

mod case;
mod changes;
mod checkpoint;
mod items;
mod ledger;
mod types;

pub use case::*;
pub use changes::*;
pub use checkpoint::*;
pub use items::*;
pub use ledger::*;
pub use types::*;
