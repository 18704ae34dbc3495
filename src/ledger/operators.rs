//! Split / transfer / retire operators
//!
//! Both operators are built on [`split_interval`]: the selected interval is
//! cut into an optional prefix, the consumed slice and an optional suffix.
//! The prefix and suffix stay with the current owner; the consumed slice goes
//! to the recipient (transfer) or disappears (retire).
//!
//! Operators only mutate through a [`BatchTxn`], so a failure anywhere leaves
//! the ledger exactly as it was once the transaction is dropped.

use tracing::debug;

use super::allocation::Allocation;
use super::ids::OrgId;
use super::interval::{split_interval, Subrange};
use super::journal::BatchTxn;
use crate::error::{Error, Result};

/// Moves the allocated serials from `from` to `to`.
///
/// Returns the transferred subranges in allocation order. Scalar holdings are
/// debited and credited in the same transaction.
pub fn transfer(
    txn: &mut BatchTxn<'_>,
    from: &OrgId,
    to: &OrgId,
    allocations: &[Allocation],
) -> Result<Vec<Subrange>> {
    if from == to {
        return Err(Error::InvalidArgument(format!(
            "cannot transfer from {} to itself",
            from
        )));
    }

    let mut moved = Vec::with_capacity(allocations.len());
    for allocation in allocations {
        moved.push(carve(txn, from, allocation, Some(to))?);
    }

    let quantity: u64 = moved.iter().map(Subrange::len).sum();
    txn.debit(from, quantity)?;
    txn.credit(to, quantity)?;
    Ok(moved)
}

/// Permanently removes the allocated serials from `org`.
pub fn retire(txn: &mut BatchTxn<'_>, org: &OrgId, allocation: &Allocation) -> Result<Subrange> {
    let retired = carve(txn, org, allocation, None)?;
    txn.retire_serials(retired)?;
    txn.debit(org, retired.len())?;
    Ok(retired)
}

/// Cuts the consumed slice out of its interval.
///
/// The interval must still match what the allocation engine saw; anything else
/// means another writer got there first.
fn carve(
    txn: &mut BatchTxn<'_>,
    owner: &OrgId,
    allocation: &Allocation,
    recipient: Option<&OrgId>,
) -> Result<Subrange> {
    let id = allocation.interval.id;
    let current = txn.ledger().ranges().get(id)?.clone();
    if current != allocation.interval || &current.owner != owner {
        return Err(Error::IntervalNotFound(id));
    }

    let parts = split_interval(&current.range(), allocation.consumed.start, allocation.consumed.end)?;
    debug!(
        interval = id.0,
        consumed = %parts.consumed,
        before = ?parts.before,
        after = ?parts.after,
        "Splitting interval"
    );

    match (parts.before, parts.after, recipient) {
        // Whole interval changes hands in place
        (None, None, Some(to)) => {
            txn.reassign(id, to.clone())?;
            return Ok(parts.consumed);
        }
        (None, None, None) => {
            txn.delete_interval(id)?;
            return Ok(parts.consumed);
        }
        (Some(before), after, _) => {
            txn.shrink_end(id, before.end)?;
            if let Some(after) = after {
                txn.create_interval(owner.clone(), after)?;
            }
        }
        (None, Some(after), _) => {
            txn.shrink_start(id, after.start)?;
        }
    }

    if let Some(to) = recipient {
        txn.create_interval(to.clone(), parts.consumed)?;
    }
    Ok(parts.consumed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::allocation::{select_contiguous, select_for_quantity, AllocationOrder};
    use crate::ledger::batch::tests::issued_ledger;
    use crate::ledger::batch::BatchLedger;
    use crate::ledger::interval::SerialInterval;

    fn org(name: &str) -> OrgId {
        OrgId::new(name).unwrap()
    }

    fn spans(ledger: &BatchLedger, owner: &str) -> Vec<(u64, u64)> {
        ledger
            .ranges()
            .ranges_for(&org(owner))
            .iter()
            .map(|r| (r.start, r.end))
            .collect()
    }

    fn slice(interval: &SerialInterval, start: u64, end: u64) -> Allocation {
        Allocation {
            interval: interval.clone(),
            consumed: Subrange { start, end },
        }
    }

    #[test]
    fn test_interior_transfer_is_three_way_split() -> Result<()> {
        let mut ledger = issued_ledger("a", 10, 50)?;
        let interval = ledger.ranges().ranges_for(&org("a"))[0].clone();

        let mut txn = BatchTxn::begin(&mut ledger);
        let moved = transfer(&mut txn, &org("a"), &org("b"), &[slice(&interval, 20, 25)])?;
        txn.verify()?;
        txn.commit();

        assert_eq!(moved, vec![Subrange { start: 20, end: 25 }]);
        assert_eq!(spans(&ledger, "a"), vec![(10, 19), (26, 50)]);
        assert_eq!(spans(&ledger, "b"), vec![(20, 25)]);
        assert_eq!(ledger.ranges().len(), 3);
        assert_eq!(ledger.holding(&org("a")), 35);
        assert_eq!(ledger.holding(&org("b")), 6);
        assert_eq!(ledger.ranges().total_units(), 41);
        ledger.verify()
    }

    #[test]
    fn test_full_interval_transfer_reassigns_in_place() -> Result<()> {
        let mut ledger = issued_ledger("a", 10, 50)?;
        let interval = ledger.ranges().ranges_for(&org("a"))[0].clone();

        let mut txn = BatchTxn::begin(&mut ledger);
        transfer(&mut txn, &org("a"), &org("b"), &[slice(&interval, 10, 50)])?;
        txn.verify()?;
        assert_eq!(txn.mutations().len(), 3);
        txn.commit();

        assert_eq!(ledger.ranges().len(), 1);
        assert_eq!(ledger.ranges().ranges_for(&org("b"))[0].id, interval.id);
        assert!(spans(&ledger, "a").is_empty());
        ledger.verify()
    }

    #[test]
    fn test_prefix_transfer_keeps_source_ordered() -> Result<()> {
        let mut ledger = issued_ledger("a", 1, 100)?;
        let interval = ledger.ranges().ranges_for(&org("a"))[0].clone();

        let mut txn = BatchTxn::begin(&mut ledger);
        transfer(&mut txn, &org("a"), &org("b"), &[slice(&interval, 1, 30)])?;
        txn.verify()?;
        txn.commit();

        assert_eq!(spans(&ledger, "a"), vec![(31, 100)]);
        assert_eq!(spans(&ledger, "b"), vec![(1, 30)]);
        ledger.verify()
    }

    #[test]
    fn test_retirement_removes_not_reassigns() -> Result<()> {
        let mut ledger = issued_ledger("a", 10, 50)?;
        let interval = ledger.ranges().ranges_for(&org("a"))[0].clone();

        let mut txn = BatchTxn::begin(&mut ledger);
        let retired = retire(&mut txn, &org("a"), &slice(&interval, 20, 25))?;
        txn.verify()?;
        txn.commit();

        assert_eq!(retired.len(), 6);
        assert_eq!(spans(&ledger, "a"), vec![(10, 19), (26, 50)]);
        assert_eq!(ledger.ranges().len(), 2);
        assert_eq!(ledger.batch().total_retired, 6);
        assert_eq!(ledger.holding(&org("a")), 35);
        assert!(ledger.is_retired(22));
        ledger.verify()
    }

    #[test]
    fn test_multi_interval_transfer() -> Result<()> {
        let mut ledger = issued_ledger("a", 1, 60)?;
        let first = ledger.ranges().ranges_for(&org("a"))[0].clone();
        {
            let mut txn = BatchTxn::begin(&mut ledger);
            transfer(&mut txn, &org("a"), &org("c"), &[slice(&first, 11, 20)])?;
            txn.verify()?;
            txn.commit();
        }

        let allocations =
            select_for_quantity(ledger.ranges(), &org("a"), 15, AllocationOrder::LowestFirst)?;
        assert_eq!(allocations.len(), 2);

        let mut txn = BatchTxn::begin(&mut ledger);
        let moved = transfer(&mut txn, &org("a"), &org("b"), &allocations)?;
        txn.verify()?;
        txn.commit();

        assert_eq!(moved, vec![Subrange { start: 1, end: 10 }, Subrange { start: 21, end: 25 }]);
        assert_eq!(spans(&ledger, "a"), vec![(26, 60)]);
        assert_eq!(spans(&ledger, "b"), vec![(1, 10), (21, 25)]);
        ledger.verify()
    }

    #[test]
    fn test_stale_allocation_is_a_conflict() -> Result<()> {
        let mut ledger = issued_ledger("a", 1, 100)?;
        let allocation =
            select_contiguous(ledger.ranges(), &org("a"), 10, AllocationOrder::LowestFirst)?;

        // Another writer shrinks the interval first
        {
            let mut txn = BatchTxn::begin(&mut ledger);
            retire(&mut txn, &org("a"), &allocation)?;
            txn.verify()?;
            txn.commit();
        }

        let mut txn = BatchTxn::begin(&mut ledger);
        let err = retire(&mut txn, &org("a"), &allocation).unwrap_err();
        assert!(err.is_conflict());
        drop(txn);

        assert_eq!(ledger.batch().total_retired, 10);
        ledger.verify()
    }

    #[test]
    fn test_transfer_to_self_rejected() -> Result<()> {
        let mut ledger = issued_ledger("a", 1, 10)?;
        let interval = ledger.ranges().ranges_for(&org("a"))[0].clone();
        let mut txn = BatchTxn::begin(&mut ledger);
        let err = transfer(&mut txn, &org("a"), &org("a"), &[slice(&interval, 1, 5)]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        Ok(())
    }

    #[test]
    fn test_retired_serials_are_never_selected_again() -> Result<()> {
        let mut ledger = issued_ledger("a", 1, 100)?;
        for _ in 0..5 {
            let allocation =
                select_contiguous(ledger.ranges(), &org("a"), 20, AllocationOrder::LowestFirst)?;
            let mut txn = BatchTxn::begin(&mut ledger);
            let retired = retire(&mut txn, &org("a"), &allocation)?;
            txn.verify()?;
            txn.commit();
            assert!(ledger.ranges().iter().all(|r| !r.range().overlaps(&retired)));
        }

        assert!(ledger.ranges().is_empty());
        assert_eq!(ledger.batch().total_retired, 100);
        assert_eq!(
            select_contiguous(ledger.ranges(), &org("a"), 1, AllocationOrder::LowestFirst),
            Err(Error::InsufficientUnits {
                requested: 1,
                available: 0
            })
        );
        ledger.verify()
    }
}
