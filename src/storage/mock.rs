//! In-memory commit store for testing
//!
//! Keeps committed batches in a vector and can be told to fail the next
//! append, which is how rollback paths are exercised.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::log::CommitBatch;
use super::CommitStore;
use crate::error::{Error, Result};
use crate::ledger::Mutation;

/// In-memory commit store
#[derive(Clone, Default)]
pub struct MemoryStore {
    batches: Arc<Mutex<Vec<CommitBatch>>>,
    next_sequence: Arc<Mutex<u64>>,
    fail_next: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `append` return a storage error.
    pub fn fail_next_append(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Committed batches so far
    pub fn batches(&self) -> Vec<CommitBatch> {
        self.batches.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.lock().is_empty()
    }
}

impl CommitStore for MemoryStore {
    fn append(&self, mutations: &[Mutation]) -> Result<u64> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(Error::Storage("injected append failure".to_string()));
        }
        let mut next = self.next_sequence.lock();
        let sequence = *next;
        *next += 1;
        self.batches
            .lock()
            .push(CommitBatch::new(sequence, mutations.to_vec()));
        Ok(sequence)
    }

    fn load(&self) -> Result<Vec<CommitBatch>> {
        Ok(self.batches())
    }

    fn compact(&self, snapshot: Vec<Mutation>) -> Result<()> {
        let mut next = self.next_sequence.lock();
        let sequence = *next;
        *next += 1;
        *self.batches.lock() = vec![CommitBatch::new(sequence, snapshot)];
        Ok(())
    }

    fn len(&self) -> u64 {
        self.batches.lock().len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_append_and_fail() -> Result<()> {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        store.append(&[Mutation::CounterAdvanced { from: 0, to: 1 }])?;

        store.fail_next_append();
        assert!(matches!(
            store.append(&[Mutation::CounterAdvanced { from: 1, to: 2 }]),
            Err(Error::Storage(_))
        ));
        // Only the next append fails
        assert_eq!(store.append(&[Mutation::CounterAdvanced { from: 1, to: 2 }])?, 1);
        assert_eq!(store.len(), 2);

        store.compact(vec![Mutation::CounterAdvanced { from: 0, to: 2 }])?;
        assert_eq!(store.load()?.len(), 1);
        Ok(())
    }
}
