//! Credit batches and their ledgers
//!
//! A [`BatchLedger`] keeps the two views of who owns what in one place: the
//! interval ledger ([`RangeStore`]) and the scalar holdings. Both are only
//! ever changed together inside a [`BatchTxn`](super::journal::BatchTxn), and
//! [`BatchLedger::verify`] checks that they agree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ids::{BatchId, OrgId};
use super::interval::{Serial, Subrange};
use super::journal::Mutation;
use super::range_store::RangeStore;
use super::records::{RetirementRecord, TransferRecord};
use crate::error::{Error, Result};

/// A single issuance event and its serial block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditBatch {
    pub id: BatchId,
    pub project_code: String,
    pub vintage_start: i32,
    pub vintage_end: i32,
    pub issuer: OrgId,
    pub serial_start: Serial,
    pub serial_end: Serial,
    pub total_issued: u64,
    pub total_retired: u64,
    pub created_at: DateTime<Utc>,
}

impl CreditBatch {
    pub fn serial_range(&self) -> Subrange {
        Subrange {
            start: self.serial_start,
            end: self.serial_end,
        }
    }

    /// Units issued and not yet retired.
    pub fn outstanding(&self) -> u64 {
        self.total_issued.saturating_sub(self.total_retired)
    }
}

/// Scalar balance of one organization in one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditHolding {
    pub batch_id: BatchId,
    pub org_id: OrgId,
    pub quantity: u64,
}

/// All ledger state of one batch
#[derive(Debug, Clone)]
pub struct BatchLedger {
    batch: CreditBatch,
    ranges: RangeStore,
    holdings: BTreeMap<OrgId, u64>,
    retired: BTreeMap<Serial, Subrange>,
    transfers: Vec<TransferRecord>,
    retirements: Vec<RetirementRecord>,
}

impl BatchLedger {
    /// Ledger for a freshly opened batch with no intervals yet.
    pub fn open(mut batch: CreditBatch) -> Self {
        // Retirements are rebuilt from SerialsRetired mutations
        batch.total_retired = 0;
        Self {
            batch,
            ranges: RangeStore::new(),
            holdings: BTreeMap::new(),
            retired: BTreeMap::new(),
            transfers: Vec::new(),
            retirements: Vec::new(),
        }
    }

    pub fn batch(&self) -> &CreditBatch {
        &self.batch
    }

    pub fn ranges(&self) -> &RangeStore {
        &self.ranges
    }

    pub(crate) fn ranges_mut(&mut self) -> &mut RangeStore {
        &mut self.ranges
    }

    pub fn holding(&self, org: &OrgId) -> u64 {
        self.holdings.get(org).copied().unwrap_or(0)
    }

    /// Non-zero holdings, ordered by organization.
    pub fn holdings(&self) -> Vec<CreditHolding> {
        self.holdings
            .iter()
            .map(|(org, quantity)| CreditHolding {
                batch_id: self.batch.id,
                org_id: org.clone(),
                quantity: *quantity,
            })
            .collect()
    }

    pub(crate) fn set_holding(&mut self, org: &OrgId, quantity: u64) {
        if quantity == 0 {
            self.holdings.remove(org);
        } else {
            self.holdings.insert(org.clone(), quantity);
        }
    }

    /// Retired serial ranges, ascending.
    pub fn retired_ranges(&self) -> impl Iterator<Item = &Subrange> {
        self.retired.values()
    }

    pub fn is_retired(&self, serial: Serial) -> bool {
        self.retired
            .range(..=serial)
            .next_back()
            .is_some_and(|(_, range)| range.contains(serial))
    }

    pub fn transfers(&self) -> &[TransferRecord] {
        &self.transfers
    }

    pub fn retirements(&self) -> &[RetirementRecord] {
        &self.retirements
    }

    /// Applies a mutation to this ledger (commit path and log replay).
    pub fn apply(&mut self, mutation: &Mutation) -> Result<()> {
        self.check_batch(mutation)?;
        match mutation {
            Mutation::IntervalCreated { interval, .. } => self.ranges.insert(interval.clone()),
            Mutation::IntervalUpdated { after, .. } => self.ranges.replace(after.clone()),
            Mutation::IntervalDeleted { interval, .. } => self.ranges.delete(interval.id).map(|_| ()),
            Mutation::HoldingChanged { org_id, after, .. } => {
                self.set_holding(org_id, *after);
                Ok(())
            }
            Mutation::SerialsRetired { range, .. } => {
                if !self.batch.serial_range().covers(range) {
                    return Err(Error::InvariantViolation(format!(
                        "retired range {} outside batch {}",
                        range,
                        self.batch.serial_range()
                    )));
                }
                if let Some(previous) = self.retired.range(..=range.end).next_back() {
                    if previous.1.overlaps(range) {
                        return Err(Error::InvariantViolation(format!(
                            "serials {} already retired",
                            previous.1
                        )));
                    }
                }
                let total = self.batch.total_retired + range.len();
                if total > self.batch.total_issued {
                    return Err(Error::InvariantViolation(format!(
                        "retired {} exceeds issued {}",
                        total, self.batch.total_issued
                    )));
                }
                self.batch.total_retired = total;
                self.retired.insert(range.start, *range);
                Ok(())
            }
            Mutation::TransferRecorded { record } => {
                self.transfers.push(record.clone());
                Ok(())
            }
            Mutation::RetirementRecorded { record } => {
                self.retirements.push(record.clone());
                Ok(())
            }
            Mutation::CounterAdvanced { .. } | Mutation::BatchOpened { .. } => Err(
                Error::InvariantViolation(format!("{:?} is not a batch mutation", mutation)),
            ),
        }
    }

    /// Undoes a mutation previously applied to this ledger.
    pub fn revert(&mut self, mutation: &Mutation) -> Result<()> {
        self.check_batch(mutation)?;
        match mutation {
            Mutation::IntervalCreated { interval, .. } => self.ranges.delete(interval.id).map(|_| ()),
            Mutation::IntervalUpdated { before, .. } => self.ranges.replace(before.clone()),
            Mutation::IntervalDeleted { interval, .. } => self.ranges.insert(interval.clone()),
            Mutation::HoldingChanged { org_id, before, .. } => {
                self.set_holding(org_id, *before);
                Ok(())
            }
            Mutation::SerialsRetired { range, .. } => {
                self.retired.remove(&range.start);
                self.batch.total_retired -= range.len();
                Ok(())
            }
            Mutation::TransferRecorded { .. } => {
                self.transfers.pop();
                Ok(())
            }
            Mutation::RetirementRecorded { .. } => {
                self.retirements.pop();
                Ok(())
            }
            Mutation::CounterAdvanced { .. } | Mutation::BatchOpened { .. } => Err(
                Error::InvariantViolation(format!("{:?} is not a batch mutation", mutation)),
            ),
        }
    }

    /// Checks every accounting invariant of the batch.
    ///
    /// - `total_retired <= total_issued`
    /// - intervals and retired ranges are pairwise disjoint and stay inside
    ///   the batch's serial block
    /// - held units plus retired units equal issued units
    /// - each owner's interval lengths sum to its scalar holding
    pub fn verify(&self) -> Result<()> {
        let batch = &self.batch;
        let violation = |msg: String| Err(Error::InvariantViolation(format!("batch {}: {}", batch.id, msg)));

        if batch.total_retired > batch.total_issued {
            return violation(format!(
                "total retired {} exceeds total issued {}",
                batch.total_retired, batch.total_issued
            ));
        }
        if batch.serial_range().len() != batch.total_issued {
            return violation(format!(
                "serial block {} does not match total issued {}",
                batch.serial_range(),
                batch.total_issued
            ));
        }

        let retired_units: u64 = self.retired.values().map(Subrange::len).sum();
        if retired_units != batch.total_retired {
            return violation(format!(
                "retired ranges hold {} units but total retired is {}",
                retired_units, batch.total_retired
            ));
        }

        let held_units = self.ranges.total_units();
        if held_units + batch.total_retired != batch.total_issued {
            return violation(format!(
                "held {} + retired {} != issued {}",
                held_units, batch.total_retired, batch.total_issued
            ));
        }

        // Walk intervals and retired ranges together in serial order
        let mut spans: Vec<(Subrange, bool)> = self
            .ranges
            .iter()
            .map(|interval| (interval.range(), false))
            .chain(self.retired.values().map(|range| (*range, true)))
            .collect();
        spans.sort_by_key(|(range, _)| range.start);

        let mut previous: Option<(Subrange, bool)> = None;
        for (range, retired) in &spans {
            if !batch.serial_range().covers(range) {
                return violation(format!("{} lies outside serial block {}", range, batch.serial_range()));
            }
            if let Some((prev, prev_retired)) = previous {
                if prev.end >= range.start {
                    let kind = if *retired || prev_retired {
                        "retired serials reappear in"
                    } else {
                        "overlapping intervals"
                    };
                    return violation(format!("{} {} and {}", kind, prev, range));
                }
            }
            previous = Some((*range, *retired));
        }

        let mut owners: Vec<&OrgId> = self.holdings.keys().collect();
        owners.extend(self.ranges.owners());
        owners.sort();
        owners.dedup();
        for owner in owners {
            let by_interval = self.ranges.units_held(owner);
            let by_scalar = self.holding(owner);
            if by_interval != by_scalar {
                return violation(format!(
                    "{} holds {} units in intervals but {} in holdings",
                    owner, by_interval, by_scalar
                ));
            }
        }

        Ok(())
    }

    /// Mutations that rebuild this ledger from an empty state.
    pub fn snapshot(&self) -> Vec<Mutation> {
        let batch_id = self.batch.id;
        let mut mutations = vec![Mutation::BatchOpened {
            batch: CreditBatch {
                total_retired: 0,
                ..self.batch.clone()
            },
        }];
        mutations.extend(self.ranges.iter().map(|interval| Mutation::IntervalCreated {
            batch_id,
            interval: interval.clone(),
        }));
        mutations.extend(self.holdings.iter().map(|(org, quantity)| Mutation::HoldingChanged {
            batch_id,
            org_id: org.clone(),
            before: 0,
            after: *quantity,
        }));
        mutations.extend(
            self.retired
                .values()
                .map(|range| Mutation::SerialsRetired { batch_id, range: *range }),
        );
        mutations.extend(
            self.transfers
                .iter()
                .map(|record| Mutation::TransferRecorded { record: record.clone() }),
        );
        mutations.extend(
            self.retirements
                .iter()
                .map(|record| Mutation::RetirementRecorded { record: record.clone() }),
        );
        mutations
    }

    fn check_batch(&self, mutation: &Mutation) -> Result<()> {
        match mutation.batch_id() {
            Some(id) if id != self.batch.id => Err(Error::InvariantViolation(format!(
                "mutation for batch {} applied to batch {}",
                id, self.batch.id
            ))),
            _ => Ok(()),
        }
    }
}
