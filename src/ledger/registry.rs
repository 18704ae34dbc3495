//! The serial ledger: issuance, transfer and retirement as atomic operations
//!
//! # Architecture
//!
//! ```text
//! SerialLedger
//!   ├─→ counter: Mutex<SerialCounter>                       (issuance critical section)
//!   ├─→ batches: DashMap<BatchId, Arc<Mutex<BatchLedger>>>  (one lock per batch)
//!   └─→ store:   Arc<dyn CommitStore>                       (durable commit log)
//! ```
//!
//! Every write runs as: lock → [`BatchTxn`] → operators → verify → append to
//! the store → commit. Any error before the commit drops the transaction,
//! which reverts the in-memory changes, so nothing partial is ever visible or
//! durable.
//!
//! Locks are taken in a fixed order: the counter first, then batch locks in
//! ascending [`BatchId`] order. Only compaction holds more than one batch lock.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::allocation::{select_contiguous, select_for_quantity, Allocation, AllocationOrder};
use super::batch::{BatchLedger, CreditBatch, CreditHolding};
use super::counter::SerialCounter;
use super::format::SerialFormatter;
use super::ids::{BatchId, OrgId};
use super::interval::{Serial, SerialInterval, Subrange};
use super::journal::{BatchTxn, Mutation};
use super::operators;
use super::records::{new_certificate_id, RetirementRecord, RetirementRequest, TransferRecord};
use crate::config::LedgerConfig;
use crate::error::{Error, Result};
use crate::metrics::{self, OperationTimer};
use crate::storage::{CommitStore, FileStore, MemoryStore};

/// Behavior knobs of a ledger
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerOptions {
    pub allocation_order: AllocationOrder,
    pub formatter: SerialFormatter,
    /// Compact the store once it holds this many batches (0 = never).
    pub compact_after_batches: u64,
}

impl From<&LedgerConfig> for LedgerOptions {
    fn from(config: &LedgerConfig) -> Self {
        Self {
            allocation_order: config.allocation_order,
            formatter: SerialFormatter::new(config.serial_prefix.clone(), config.serial_width),
            compact_after_batches: config.compact_after_batches,
        }
    }
}

/// Request to finalize an issuance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuanceRequest {
    pub project_code: String,
    pub vintage_start: i32,
    pub vintage_end: i32,
    pub issuer: OrgId,
    pub quantity: u64,
}

/// A finalized issuance and its identifiers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuanceReceipt {
    pub batch: CreditBatch,
    pub formatted_range: String,
    pub human_readable_id: String,
}

/// Request to move units between organizations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub batch_id: BatchId,
    pub from: OrgId,
    pub to: OrgId,
    pub quantity: u64,
}

/// Result of re-checking every batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    pub batches_checked: usize,
    pub total_issued: u64,
    pub total_retired: u64,
    pub total_held: u64,
    pub counter: Serial,
    pub violations: Vec<String>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Point-in-time size of the ledger
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStats {
    pub batches: usize,
    pub intervals: usize,
    pub counter: Serial,
    pub store_batches: u64,
}

/// The registry-wide serial ledger
pub struct SerialLedger {
    store: Arc<dyn CommitStore>,
    counter: Mutex<SerialCounter>,
    batches: DashMap<BatchId, Arc<Mutex<BatchLedger>>>,
    options: LedgerOptions,
}

impl SerialLedger {
    /// Rebuilds the ledger from `store` and verifies every batch.
    pub fn open(store: Arc<dyn CommitStore>, options: LedgerOptions) -> Result<Self> {
        let mut counter = SerialCounter::default();
        let mut ledgers: std::collections::HashMap<BatchId, BatchLedger> =
            std::collections::HashMap::new();

        let commits = store.load()?;
        let mut replayed = 0usize;
        for commit in &commits {
            for mutation in &commit.mutations {
                replay(&mut counter, &mut ledgers, mutation).map_err(|e| {
                    error!(sequence = commit.sequence, error = %e, "Commit log replay failed");
                    e
                })?;
                replayed += 1;
            }
        }

        for ledger in ledgers.values() {
            ledger.verify()?;
        }

        info!(
            commits = commits.len(),
            mutations = replayed,
            batches = ledgers.len(),
            counter = counter.value(),
            order = %options.allocation_order,
            "Serial ledger recovered"
        );
        metrics::set_batches(ledgers.len());

        Ok(Self {
            store,
            counter: Mutex::new(counter),
            batches: ledgers
                .into_iter()
                .map(|(id, ledger)| (id, Arc::new(Mutex::new(ledger))))
                .collect(),
            options,
        })
    }

    /// Ledger over a fresh in-memory store.
    pub fn in_memory(options: LedgerOptions) -> Result<Self> {
        Self::open(Arc::new(MemoryStore::new()), options)
    }

    /// Ledger over the file store described by `config`.
    pub fn from_config(config: &LedgerConfig) -> Result<Self> {
        let store = FileStore::open(&config.data_dir, config.compression, config.fsync)?;
        Self::open(Arc::new(store), LedgerOptions::from(config))
    }

    pub fn options(&self) -> &LedgerOptions {
        &self.options
    }

    /// Finalizes an issuance: reserves a serial block and hands it to the issuer.
    pub fn issue(&self, request: IssuanceRequest) -> Result<IssuanceReceipt> {
        let timer = OperationTimer::start("issue");
        let result = self.issue_inner(request);
        if let Ok(receipt) = &result {
            metrics::record_units("issue", receipt.batch.total_issued);
        }
        let result = timer.finish(result);
        self.maybe_compact();
        result
    }

    fn issue_inner(&self, request: IssuanceRequest) -> Result<IssuanceReceipt> {
        if request.quantity == 0 {
            return Err(Error::InvalidQuantity(0));
        }
        if request.project_code.trim().is_empty() {
            return Err(Error::InvalidArgument("project code must not be empty".to_string()));
        }
        if request.vintage_start > request.vintage_end {
            return Err(Error::InvalidArgument(format!(
                "vintage {} ends before it starts ({})",
                request.vintage_end, request.vintage_start
            )));
        }

        let mut counter = self.counter.lock();
        let from = counter.value();
        let block = counter.reserve(request.quantity)?;

        let batch = CreditBatch {
            id: BatchId::new(),
            project_code: request.project_code,
            vintage_start: request.vintage_start,
            vintage_end: request.vintage_end,
            issuer: request.issuer.clone(),
            serial_start: block.start,
            serial_end: block.end,
            total_issued: request.quantity,
            total_retired: 0,
            created_at: chrono::Utc::now(),
        };
        let mut ledger = BatchLedger::open(batch.clone());

        let committed = (|| -> Result<()> {
            let mut txn = BatchTxn::begin(&mut ledger);
            txn.create_interval(request.issuer.clone(), block)?;
            txn.credit(&request.issuer, request.quantity)?;
            self.check(&txn)?;

            let mut mutations = vec![
                Mutation::CounterAdvanced { from, to: block.end },
                Mutation::BatchOpened { batch: batch.clone() },
            ];
            mutations.extend_from_slice(txn.mutations());
            self.append(&mutations)?;
            txn.commit();
            Ok(())
        })();

        if let Err(e) = committed {
            if let Err(release) = counter.release(block) {
                error!(error = %release, "Failed to release serial reservation");
            }
            return Err(e);
        }

        let receipt = IssuanceReceipt {
            formatted_range: self.options.formatter.range(block.start, block.end)?,
            human_readable_id: self.options.formatter.human_readable_id(
                &batch.project_code,
                batch.vintage_start,
                batch.vintage_end,
                &batch.id,
                block.start,
                block.end,
            )?,
            batch,
        };
        self.batches
            .insert(receipt.batch.id, Arc::new(Mutex::new(ledger)));
        metrics::set_batches(self.batches.len());

        info!(
            batch = %receipt.batch.id,
            issuer = %receipt.batch.issuer,
            serials = %receipt.formatted_range,
            "Issued credit batch"
        );
        Ok(receipt)
    }

    /// Moves `quantity` units of a batch from one organization to another.
    pub fn transfer(&self, request: TransferRequest) -> Result<TransferRecord> {
        let timer = OperationTimer::start("transfer");
        let result = self.transfer_inner(request);
        if let Ok(record) = &result {
            metrics::record_units("transfer", record.quantity);
        }
        let result = timer.finish(result);
        self.maybe_compact();
        result
    }

    fn transfer_inner(&self, request: TransferRequest) -> Result<TransferRecord> {
        if request.quantity == 0 {
            return Err(Error::InvalidQuantity(0));
        }
        let handle = self.handle(&request.batch_id)?;
        let mut ledger = handle.lock();

        let available = ledger.holding(&request.from);
        if available < request.quantity {
            return Err(Error::InsufficientUnits {
                requested: request.quantity,
                available,
            });
        }

        let allocations = select_for_quantity(
            ledger.ranges(),
            &request.from,
            request.quantity,
            self.options.allocation_order,
        )
        .map_err(|e| diverged(&request.batch_id, &request.from, e))?;

        let record = self.commit(&mut ledger, |txn| {
            let moved = operators::transfer(txn, &request.from, &request.to, &allocations)?;
            let record = TransferRecord::new(
                request.batch_id,
                request.from.clone(),
                request.to.clone(),
                moved,
            );
            txn.record_transfer(record.clone())?;
            Ok(record)
        })?;

        info!(
            batch = %record.batch_id,
            from = %record.from,
            to = %record.to,
            quantity = record.quantity,
            ranges = record.ranges.len(),
            "Transferred credits"
        );
        Ok(record)
    }

    /// Moves an explicit serial range held by `from` in one interval.
    pub fn transfer_subrange(
        &self,
        batch_id: &BatchId,
        from: &OrgId,
        to: &OrgId,
        range: Subrange,
    ) -> Result<TransferRecord> {
        let timer = OperationTimer::start("transfer_subrange");
        let result = self.transfer_subrange_inner(batch_id, from, to, range);
        if let Ok(record) = &result {
            metrics::record_units("transfer", record.quantity);
        }
        let result = timer.finish(result);
        self.maybe_compact();
        result
    }

    fn transfer_subrange_inner(
        &self,
        batch_id: &BatchId,
        from: &OrgId,
        to: &OrgId,
        range: Subrange,
    ) -> Result<TransferRecord> {
        let handle = self.handle(batch_id)?;
        let mut ledger = handle.lock();

        let interval = ledger
            .ranges()
            .find_containing(from, range.start)
            .filter(|interval| interval.range().covers(&range))
            .cloned()
            .ok_or_else(|| {
                Error::InvalidArgument(format!("{} does not hold serials {}", from, range))
            })?;
        let allocation = Allocation {
            interval,
            consumed: range,
        };

        let record = self.commit(&mut ledger, |txn| {
            let moved = operators::transfer(txn, from, to, std::slice::from_ref(&allocation))?;
            let record = TransferRecord::new(*batch_id, from.clone(), to.clone(), moved);
            txn.record_transfer(record.clone())?;
            Ok(record)
        })?;

        info!(batch = %batch_id, %from, %to, serials = %range, "Transferred serial range");
        Ok(record)
    }

    /// Retires units from a single contiguous range and issues a certificate.
    pub fn retire(&self, request: RetirementRequest) -> Result<RetirementRecord> {
        let timer = OperationTimer::start("retire");
        let result = self.retire_inner(request);
        if let Ok(record) = &result {
            metrics::record_units("retire", record.quantity);
        }
        let result = timer.finish(result);
        self.maybe_compact();
        result
    }

    fn retire_inner(&self, request: RetirementRequest) -> Result<RetirementRecord> {
        if request.quantity == 0 {
            return Err(Error::InvalidQuantity(0));
        }
        if request.purpose.trim().is_empty() {
            return Err(Error::InvalidArgument("retirement purpose must not be empty".to_string()));
        }
        let handle = self.handle(&request.batch_id)?;
        let mut ledger = handle.lock();

        let outstanding = ledger.batch().outstanding();
        if request.quantity > outstanding {
            return Err(Error::InsufficientUnits {
                requested: request.quantity,
                available: outstanding,
            });
        }
        let available = ledger.holding(&request.org_id);
        if available < request.quantity {
            return Err(Error::InsufficientUnits {
                requested: request.quantity,
                available,
            });
        }

        let allocation = select_contiguous(
            ledger.ranges(),
            &request.org_id,
            request.quantity,
            self.options.allocation_order,
        )
        .map_err(|e| diverged(&request.batch_id, &request.org_id, e))?;

        let formatter = &self.options.formatter;
        let record = self.commit(&mut ledger, |txn| {
            let retired = operators::retire(txn, &request.org_id, &allocation)?;
            let batch = txn.ledger().batch();
            let created_at = chrono::Utc::now();
            let record = RetirementRecord {
                certificate_id: new_certificate_id(created_at),
                batch_id: request.batch_id,
                org_id: request.org_id.clone(),
                quantity: retired.len(),
                serial_start: retired.start,
                serial_end: retired.end,
                purpose: request.purpose.clone(),
                beneficiary: request.beneficiary.clone(),
                formatted_range: formatter.range(retired.start, retired.end)?,
                human_readable_id: formatter.human_readable_id(
                    &batch.project_code,
                    batch.vintage_start,
                    batch.vintage_end,
                    &batch.id,
                    retired.start,
                    retired.end,
                )?,
                created_at,
            };
            txn.record_retirement(record.clone())?;
            Ok(record)
        })?;

        info!(
            batch = %record.batch_id,
            org = %record.org_id,
            certificate = %record.certificate_id,
            serials = %record.formatted_range,
            "Retired credits"
        );
        Ok(record)
    }

    /// Intervals held by `owner` in a batch, ascending by start.
    pub fn ranges_for(&self, batch_id: &BatchId, owner: &OrgId) -> Result<Vec<SerialInterval>> {
        Ok(self.handle(batch_id)?.lock().ranges().ranges_for(owner))
    }

    pub fn batch(&self, batch_id: &BatchId) -> Result<CreditBatch> {
        Ok(self.handle(batch_id)?.lock().batch().clone())
    }

    /// All batches, in serial order.
    pub fn batches(&self) -> Vec<CreditBatch> {
        let mut batches: Vec<CreditBatch> = self
            .handles()
            .into_iter()
            .map(|(_, handle)| handle.lock().batch().clone())
            .collect();
        batches.sort_by_key(|batch| batch.serial_start);
        batches
    }

    pub fn holding(&self, batch_id: &BatchId, org: &OrgId) -> Result<u64> {
        Ok(self.handle(batch_id)?.lock().holding(org))
    }

    /// Non-zero holdings in one batch.
    pub fn holdings(&self, batch_id: &BatchId) -> Result<Vec<CreditHolding>> {
        Ok(self.handle(batch_id)?.lock().holdings())
    }

    /// Non-zero holdings of one organization across all batches.
    pub fn holdings_for_org(&self, org: &OrgId) -> Vec<CreditHolding> {
        let mut holdings: Vec<(Serial, CreditHolding)> = self
            .handles()
            .into_iter()
            .filter_map(|(_, handle)| {
                let ledger = handle.lock();
                let quantity = ledger.holding(org);
                (quantity > 0).then(|| {
                    (
                        ledger.batch().serial_start,
                        CreditHolding {
                            batch_id: ledger.batch().id,
                            org_id: org.clone(),
                            quantity,
                        },
                    )
                })
            })
            .collect();
        holdings.sort_by_key(|(start, _)| *start);
        holdings.into_iter().map(|(_, holding)| holding).collect()
    }

    pub fn transfers(&self, batch_id: &BatchId) -> Result<Vec<TransferRecord>> {
        Ok(self.handle(batch_id)?.lock().transfers().to_vec())
    }

    pub fn retirements(&self, batch_id: &BatchId) -> Result<Vec<RetirementRecord>> {
        Ok(self.handle(batch_id)?.lock().retirements().to_vec())
    }

    /// Looks up a retirement by certificate id.
    pub fn certificate(&self, certificate_id: &str) -> Result<RetirementRecord> {
        self.handles()
            .into_iter()
            .find_map(|(_, handle)| {
                handle
                    .lock()
                    .retirements()
                    .iter()
                    .find(|record| record.certificate_id == certificate_id)
                    .cloned()
            })
            .ok_or_else(|| Error::NotFound(format!("certificate {}", certificate_id)))
    }

    /// Re-checks the invariants of every batch.
    pub fn verify(&self) -> AuditReport {
        // Issuance inserts batches under the counter lock, so reading both
        // under it gives a matching pair
        let (counter, handles) = {
            let counter = self.counter.lock();
            (counter.value(), self.handles())
        };
        let mut report = AuditReport {
            counter,
            ..AuditReport::default()
        };
        let mut serial_blocks = Vec::new();

        for (_, handle) in handles {
            let ledger = handle.lock();
            let batch = ledger.batch();
            report.batches_checked += 1;
            report.total_issued += batch.total_issued;
            report.total_retired += batch.total_retired;
            report.total_held += ledger.ranges().total_units();
            serial_blocks.push((batch.serial_range(), batch.id));
            if let Err(e) = ledger.verify() {
                report.violations.push(e.to_string());
            }
        }

        // Batches must tile [1, counter] without gaps or overlaps
        serial_blocks.sort();
        let mut covered_end: Serial = 0;
        for (range, id) in &serial_blocks {
            if covered_end.checked_add(1) != Some(range.start) {
                report.violations.push(format!(
                    "batch {} starts at {} but the previous block ends at {}",
                    id, range.start, covered_end
                ));
            }
            covered_end = range.end;
        }
        if covered_end != report.counter {
            report.violations.push(format!(
                "serial counter at {} but issued blocks end at {}",
                report.counter, covered_end
            ));
        }

        if report.is_clean() {
            debug!(batches = report.batches_checked, "Ledger audit clean");
        } else {
            for violation in &report.violations {
                error!(%violation, "Ledger audit found an invariant violation");
            }
        }
        report
    }

    /// Rewrites the store as a single snapshot of the current state.
    pub fn compact(&self) -> Result<()> {
        let counter = self.counter.lock();
        let handles = self.handles();
        let ledgers: Vec<_> = handles.iter().map(|(_, handle)| handle.lock()).collect();

        let mut snapshot = vec![Mutation::CounterAdvanced {
            from: 0,
            to: counter.value(),
        }];
        for ledger in &ledgers {
            snapshot.extend(ledger.snapshot());
        }
        let mutations = snapshot.len();
        self.store.compact(snapshot)?;

        info!(batches = ledgers.len(), mutations, "Compacted commit log");
        Ok(())
    }

    pub fn stats(&self) -> LedgerStats {
        let handles = self.handles();
        LedgerStats {
            batches: handles.len(),
            intervals: handles
                .iter()
                .map(|(_, handle)| handle.lock().ranges().len())
                .sum(),
            counter: self.counter_value(),
            store_batches: self.store.len(),
        }
    }

    /// Last serial handed out.
    pub fn counter_value(&self) -> Serial {
        self.counter.lock().value()
    }

    /// Runs `body` in a transaction on `ledger` and makes it durable.
    fn commit<T>(
        &self,
        ledger: &mut BatchLedger,
        body: impl FnOnce(&mut BatchTxn<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut txn = BatchTxn::begin(ledger);
        let value = body(&mut txn)?;
        self.check(&txn)?;
        self.append(txn.mutations())?;
        txn.commit();
        Ok(value)
    }

    fn check(&self, txn: &BatchTxn<'_>) -> Result<()> {
        txn.verify().map_err(|e| {
            error!(batch = %txn.batch_id(), error = %e, "Invariant violation, rolling back");
            metrics::record_invariant_violation();
            e
        })
    }

    fn append(&self, mutations: &[Mutation]) -> Result<()> {
        let sequence = self.store.append(mutations).map_err(|e| {
            error!(error = %e, "Failed to append to commit log, rolling back");
            e
        })?;
        metrics::record_commit();
        debug!(sequence, mutations = mutations.len(), "Committed transaction");
        Ok(())
    }

    fn maybe_compact(&self) {
        let threshold = self.options.compact_after_batches;
        if threshold > 0 && self.store.len() >= threshold {
            if let Err(e) = self.compact() {
                warn!(error = %e, "Automatic compaction failed");
            }
        }
    }

    fn handle(&self, batch_id: &BatchId) -> Result<Arc<Mutex<BatchLedger>>> {
        self.batches
            .get(batch_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::NotFound(format!("batch {}", batch_id)))
    }

    /// Batch handles in lock order.
    fn handles(&self) -> Vec<(BatchId, Arc<Mutex<BatchLedger>>)> {
        let mut handles: Vec<_> = self
            .batches
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        handles.sort_by_key(|(id, _)| *id);
        handles
    }
}

/// Scalar holdings allowed a request the intervals cannot satisfy.
fn diverged(batch_id: &BatchId, org: &OrgId, error: Error) -> Error {
    match error {
        Error::InsufficientUnits {
            requested,
            available,
        } => {
            metrics::record_invariant_violation();
            error!(
                batch = %batch_id,
                %org,
                requested,
                available,
                "Holding and interval ledgers disagree"
            );
            Error::InvariantViolation(format!(
                "batch {}: {} holds enough units but its intervals cover only {}",
                batch_id, org, available
            ))
        }
        other => other,
    }
}

fn replay(
    counter: &mut SerialCounter,
    ledgers: &mut std::collections::HashMap<BatchId, BatchLedger>,
    mutation: &Mutation,
) -> Result<()> {
    match mutation {
        Mutation::CounterAdvanced { from, to } => {
            if *from != counter.value() || to < from {
                return Err(Error::InvariantViolation(format!(
                    "counter advance {} -> {} does not follow {}",
                    from,
                    to,
                    counter.value()
                )));
            }
            *counter = SerialCounter::at(*to);
            Ok(())
        }
        Mutation::BatchOpened { batch } => {
            if ledgers.contains_key(&batch.id) {
                return Err(Error::InvariantViolation(format!(
                    "batch {} opened twice",
                    batch.id
                )));
            }
            ledgers.insert(batch.id, BatchLedger::open(batch.clone()));
            Ok(())
        }
        other => {
            let batch_id = other.batch_id().ok_or_else(|| {
                Error::InvariantViolation(format!("{:?} has no batch", other))
            })?;
            ledgers
                .get_mut(&batch_id)
                .ok_or_else(|| {
                    Error::InvariantViolation(format!("mutation for unknown batch {}", batch_id))
                })?
                .apply(other)
        }
    }
}
