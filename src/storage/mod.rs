//! Storage layer
//!
//! # Architecture
//!
//! The ledger keeps its working state in memory and makes it durable through
//! a [`CommitStore`]:
//!
//! ```text
//! SerialLedger ──append(mutations)──→ CommitStore
//!      ↑                                 ├─→ FileStore   (checksummed log on disk)
//!      └──────────load() on open─────────└─→ MemoryStore (tests, failure injection)
//! ```
//!
//! A transaction's mutations are appended before its in-memory changes are
//! kept; if the append fails the transaction is rolled back. Compaction
//! replaces the whole history with one snapshot batch.

pub mod compression;
pub mod log;
pub mod mock;

pub use compression::Compression;
pub use log::{CommitBatch, FileStore};
pub use mock::MemoryStore;

use crate::error::Result;
use crate::ledger::Mutation;

/// Durable home of committed ledger mutations
pub trait CommitStore: Send + Sync {
    /// Persists one transaction; returns its sequence number.
    fn append(&self, mutations: &[Mutation]) -> Result<u64>;

    /// Every committed batch, oldest first.
    fn load(&self) -> Result<Vec<CommitBatch>>;

    /// Replaces the history with a single snapshot batch.
    fn compact(&self, snapshot: Vec<Mutation>) -> Result<()>;

    /// Batches currently in the store.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
