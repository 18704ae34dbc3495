//! Mutation journal and batch transactions
//!
//! Every change to a batch ledger is expressed as a [`Mutation`] carrying both
//! the old and the new value. A [`BatchTxn`] applies mutations to the ledger
//! as it goes and keeps them in order:
//!
//! ```text
//! begin ──→ create / shrink / reassign / delete / credit / debit / retire
//!       ──→ verify ──→ append to commit log ──→ commit
//!                 └─ any error: drop ──→ revert journal in reverse order
//! ```
//!
//! The same mutations are what the commit log persists and what recovery
//! replays, so a committed transaction and its replay always agree.

use serde::{Deserialize, Serialize};
use tracing::error;

use super::batch::{BatchLedger, CreditBatch};
use super::ids::{BatchId, IntervalId, OrgId};
use super::interval::{Serial, SerialInterval, Subrange};
use super::records::{RetirementRecord, TransferRecord};
use crate::error::{Error, Result};

/// One durable change to ledger state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    CounterAdvanced {
        from: Serial,
        to: Serial,
    },
    BatchOpened {
        batch: CreditBatch,
    },
    IntervalCreated {
        batch_id: BatchId,
        interval: SerialInterval,
    },
    IntervalUpdated {
        batch_id: BatchId,
        before: SerialInterval,
        after: SerialInterval,
    },
    IntervalDeleted {
        batch_id: BatchId,
        interval: SerialInterval,
    },
    HoldingChanged {
        batch_id: BatchId,
        org_id: OrgId,
        before: u64,
        after: u64,
    },
    SerialsRetired {
        batch_id: BatchId,
        range: Subrange,
    },
    TransferRecorded {
        record: TransferRecord,
    },
    RetirementRecorded {
        record: RetirementRecord,
    },
}

impl Mutation {
    /// Batch the mutation belongs to; `None` for registry-wide state.
    pub fn batch_id(&self) -> Option<BatchId> {
        match self {
            Mutation::CounterAdvanced { .. } => None,
            Mutation::BatchOpened { batch } => Some(batch.id),
            Mutation::IntervalCreated { batch_id, .. }
            | Mutation::IntervalUpdated { batch_id, .. }
            | Mutation::IntervalDeleted { batch_id, .. }
            | Mutation::HoldingChanged { batch_id, .. }
            | Mutation::SerialsRetired { batch_id, .. } => Some(*batch_id),
            Mutation::TransferRecorded { record } => Some(record.batch_id),
            Mutation::RetirementRecorded { record } => Some(record.batch_id),
        }
    }
}

/// An open transaction against one batch ledger.
///
/// Dropping an uncommitted transaction reverts everything it applied.
pub struct BatchTxn<'a> {
    ledger: &'a mut BatchLedger,
    journal: Vec<Mutation>,
}

impl<'a> BatchTxn<'a> {
    pub fn begin(ledger: &'a mut BatchLedger) -> Self {
        Self {
            ledger,
            journal: Vec::new(),
        }
    }

    pub fn ledger(&self) -> &BatchLedger {
        self.ledger
    }

    pub fn batch_id(&self) -> BatchId {
        self.ledger.batch().id
    }

    /// Mutations applied so far, in order.
    pub fn mutations(&self) -> &[Mutation] {
        &self.journal
    }

    pub fn create_interval(&mut self, owner: OrgId, range: Subrange) -> Result<SerialInterval> {
        let interval = self
            .ledger
            .ranges_mut()
            .create(owner, range.start, range.end)?;
        let batch_id = self.batch_id();
        self.journal.push(Mutation::IntervalCreated {
            batch_id,
            interval: interval.clone(),
        });
        Ok(interval)
    }

    pub fn shrink_start(&mut self, id: IntervalId, new_start: Serial) -> Result<()> {
        let (before, after) = self.ledger.ranges_mut().shrink_start(id, new_start)?;
        self.push_update(before, after);
        Ok(())
    }

    pub fn shrink_end(&mut self, id: IntervalId, new_end: Serial) -> Result<()> {
        let (before, after) = self.ledger.ranges_mut().shrink_end(id, new_end)?;
        self.push_update(before, after);
        Ok(())
    }

    pub fn reassign(&mut self, id: IntervalId, owner: OrgId) -> Result<()> {
        let (before, after) = self.ledger.ranges_mut().reassign(id, owner)?;
        self.push_update(before, after);
        Ok(())
    }

    pub fn delete_interval(&mut self, id: IntervalId) -> Result<SerialInterval> {
        let interval = self.ledger.ranges_mut().delete(id)?;
        let batch_id = self.batch_id();
        self.journal.push(Mutation::IntervalDeleted {
            batch_id,
            interval: interval.clone(),
        });
        Ok(interval)
    }

    /// Adds `quantity` to the scalar holding of `org`.
    pub fn credit(&mut self, org: &OrgId, quantity: u64) -> Result<()> {
        let before = self.ledger.holding(org);
        let after = before.checked_add(quantity).ok_or_else(|| {
            Error::InvariantViolation(format!("holding overflow for {}", org))
        })?;
        self.set_holding(org, before, after);
        Ok(())
    }

    /// Removes `quantity` from the scalar holding of `org`.
    pub fn debit(&mut self, org: &OrgId, quantity: u64) -> Result<()> {
        let before = self.ledger.holding(org);
        let after = before
            .checked_sub(quantity)
            .ok_or(Error::InsufficientUnits {
                requested: quantity,
                available: before,
            })?;
        self.set_holding(org, before, after);
        Ok(())
    }

    /// Marks `range` as permanently retired.
    pub fn retire_serials(&mut self, range: Subrange) -> Result<()> {
        let mutation = Mutation::SerialsRetired {
            batch_id: self.batch_id(),
            range,
        };
        self.ledger.apply(&mutation)?;
        self.journal.push(mutation);
        Ok(())
    }

    pub fn record_transfer(&mut self, record: TransferRecord) -> Result<()> {
        let mutation = Mutation::TransferRecorded { record };
        self.ledger.apply(&mutation)?;
        self.journal.push(mutation);
        Ok(())
    }

    pub fn record_retirement(&mut self, record: RetirementRecord) -> Result<()> {
        let mutation = Mutation::RetirementRecorded { record };
        self.ledger.apply(&mutation)?;
        self.journal.push(mutation);
        Ok(())
    }

    /// Checks the batch invariants against the current (uncommitted) state.
    pub fn verify(&self) -> Result<()> {
        self.ledger.verify()
    }

    /// Keeps the applied changes and returns the journal.
    pub fn commit(mut self) -> Vec<Mutation> {
        std::mem::take(&mut self.journal)
    }

    /// Reverts every applied change.
    pub fn rollback(self) {
        // Drop does the work
    }

    fn push_update(&mut self, before: SerialInterval, after: SerialInterval) {
        let batch_id = self.batch_id();
        self.journal.push(Mutation::IntervalUpdated {
            batch_id,
            before,
            after,
        });
    }

    fn set_holding(&mut self, org: &OrgId, before: u64, after: u64) {
        self.ledger.set_holding(org, after);
        let batch_id = self.batch_id();
        self.journal.push(Mutation::HoldingChanged {
            batch_id,
            org_id: org.clone(),
            before,
            after,
        });
    }
}

impl Drop for BatchTxn<'_> {
    fn drop(&mut self) {
        while let Some(mutation) = self.journal.pop() {
            if let Err(e) = self.ledger.revert(&mutation) {
                error!(error = %e, ?mutation, "Failed to revert mutation during rollback");
            }
        }
    }
}
