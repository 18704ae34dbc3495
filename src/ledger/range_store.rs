//! Range store: the owned serial intervals of one credit batch
//!
//! # Architecture
//!
//! ```text
//! RangeStore (batch B)
//!   ├─→ intervals: IntervalId → SerialInterval      (arena)
//!   ├─→ by_start:  start → IntervalId               (batch-wide order)
//!   └─→ by_owner:  OrgId → { start → IntervalId }   (per-owner order)
//! ```
//!
//! Every insertion goes through the batch-wide `by_start` index, which is
//! where non-overlap is enforced: the only interval that can overlap a new
//! `[s, e]` is the one with the greatest start `<= e`.

use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use super::ids::{IntervalId, OrgId};
use super::interval::{Serial, SerialInterval, Subrange};
use crate::error::{Error, Result};

/// Owned intervals of one batch, indexed by id, start and owner.
#[derive(Debug, Clone, Default)]
pub struct RangeStore {
    next_id: u64,
    intervals: HashMap<IntervalId, SerialInterval>,
    by_start: BTreeMap<Serial, IntervalId>,
    by_owner: HashMap<OrgId, BTreeMap<Serial, IntervalId>>,
}

impl RangeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intervals owned by `owner`, ascending by start.
    pub fn ranges_for(&self, owner: &OrgId) -> Vec<SerialInterval> {
        self.by_owner
            .get(owner)
            .map(|index| {
                index
                    .values()
                    .map(|id| self.intervals[id].clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Total serials held by `owner`.
    pub fn units_held(&self, owner: &OrgId) -> u64 {
        self.by_owner
            .get(owner)
            .map(|index| index.values().map(|id| self.intervals[id].len()).sum())
            .unwrap_or(0)
    }

    /// Organizations currently holding at least one interval.
    pub fn owners(&self) -> impl Iterator<Item = &OrgId> {
        self.by_owner.keys()
    }

    /// All intervals of the batch, ascending by start.
    pub fn iter(&self) -> impl Iterator<Item = &SerialInterval> {
        self.by_start.values().map(|id| &self.intervals[id])
    }

    pub fn get(&self, id: IntervalId) -> Result<&SerialInterval> {
        self.intervals.get(&id).ok_or(Error::IntervalNotFound(id))
    }

    /// Interval of `owner` covering `serial`, if any.
    pub fn find_containing(&self, owner: &OrgId, serial: Serial) -> Option<&SerialInterval> {
        let index = self.by_owner.get(owner)?;
        let (_, id) = index.range(..=serial).next_back()?;
        let interval = &self.intervals[id];
        (interval.end >= serial).then_some(interval)
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Serials held across all owners.
    pub fn total_units(&self) -> u64 {
        self.intervals.values().map(SerialInterval::len).sum()
    }

    /// Inserts a new interval for `owner` covering `[start, end]`.
    pub fn create(&mut self, owner: OrgId, start: Serial, end: Serial) -> Result<SerialInterval> {
        Subrange::new(start, end)?;
        let interval = SerialInterval {
            id: IntervalId(self.next_id),
            owner,
            start,
            end,
        };
        self.insert(interval.clone())?;
        Ok(interval)
    }

    /// Inserts an interval that already carries its id (log replay, rollback).
    pub fn insert(&mut self, interval: SerialInterval) -> Result<()> {
        Subrange::new(interval.start, interval.end)?;
        if self.intervals.contains_key(&interval.id) {
            return Err(Error::InvariantViolation(format!(
                "duplicate {}",
                interval.id
            )));
        }
        if let Some(existing) = self.overlapping(&interval.range()) {
            return Err(Error::InvariantViolation(format!(
                "{} [{}, {}] overlaps {} [{}, {}] owned by {}",
                interval.id,
                interval.start,
                interval.end,
                existing.id,
                existing.start,
                existing.end,
                existing.owner
            )));
        }

        debug!(
            id = interval.id.0,
            owner = %interval.owner,
            start = interval.start,
            end = interval.end,
            "Inserted interval"
        );
        self.next_id = self.next_id.max(interval.id.0 + 1);
        self.index(&interval);
        self.intervals.insert(interval.id, interval);
        Ok(())
    }

    /// Moves the end of an interval down to `new_end`.
    ///
    /// Returns the interval before and after the change.
    pub fn shrink_end(
        &mut self,
        id: IntervalId,
        new_end: Serial,
    ) -> Result<(SerialInterval, SerialInterval)> {
        let before = self.get(id)?.clone();
        if new_end < before.start || new_end > before.end {
            return Err(Error::InvalidRange {
                start: before.start,
                end: new_end,
            });
        }
        let mut after = before.clone();
        after.end = new_end;
        self.replace(after.clone())?;
        Ok((before, after))
    }

    /// Moves the start of an interval up to `new_start`.
    pub fn shrink_start(
        &mut self,
        id: IntervalId,
        new_start: Serial,
    ) -> Result<(SerialInterval, SerialInterval)> {
        let before = self.get(id)?.clone();
        if new_start > before.end || new_start < before.start {
            return Err(Error::InvalidRange {
                start: new_start,
                end: before.end,
            });
        }
        let mut after = before.clone();
        after.start = new_start;
        self.replace(after.clone())?;
        Ok((before, after))
    }

    /// Hands an interval to a new owner in place.
    pub fn reassign(
        &mut self,
        id: IntervalId,
        new_owner: OrgId,
    ) -> Result<(SerialInterval, SerialInterval)> {
        let before = self.get(id)?.clone();
        let mut after = before.clone();
        after.owner = new_owner;
        self.replace(after.clone())?;
        Ok((before, after))
    }

    /// Removes an interval entirely.
    pub fn delete(&mut self, id: IntervalId) -> Result<SerialInterval> {
        let interval = self.intervals.remove(&id).ok_or(Error::IntervalNotFound(id))?;
        self.unindex(&interval);
        debug!(id = id.0, owner = %interval.owner, "Deleted interval");
        Ok(interval)
    }

    /// Swaps the stored interval with the same id for `interval`.
    pub fn replace(&mut self, interval: SerialInterval) -> Result<()> {
        let previous = self.delete(interval.id)?;
        if let Err(e) = self.insert(interval) {
            self.index(&previous);
            self.intervals.insert(previous.id, previous);
            return Err(e);
        }
        Ok(())
    }

    fn overlapping(&self, range: &Subrange) -> Option<&SerialInterval> {
        let (_, id) = self.by_start.range(..=range.end).next_back()?;
        let candidate = &self.intervals[id];
        (candidate.end >= range.start).then_some(candidate)
    }

    fn index(&mut self, interval: &SerialInterval) {
        self.by_start.insert(interval.start, interval.id);
        self.by_owner
            .entry(interval.owner.clone())
            .or_default()
            .insert(interval.start, interval.id);
    }

    fn unindex(&mut self, interval: &SerialInterval) {
        self.by_start.remove(&interval.start);
        if let Some(index) = self.by_owner.get_mut(&interval.owner) {
            index.remove(&interval.start);
            if index.is_empty() {
                self.by_owner.remove(&interval.owner);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn org(name: &str) -> OrgId {
        OrgId::new(name).unwrap()
    }

    #[test]
    fn test_ranges_for_sorted_by_start() -> Result<()> {
        let mut store = RangeStore::new();
        store.create(org("a"), 200, 299)?;
        store.create(org("a"), 1, 99)?;
        store.create(org("b"), 100, 199)?;

        let starts: Vec<_> = store.ranges_for(&org("a")).iter().map(|r| r.start).collect();
        assert_eq!(starts, vec![1, 200]);
        assert_eq!(store.units_held(&org("a")), 199);
        assert_eq!(store.units_held(&org("b")), 100);
        assert!(store.ranges_for(&org("c")).is_empty());
        assert_eq!(store.total_units(), 299);
        Ok(())
    }

    #[test]
    fn test_create_rejects_overlap_across_owners() -> Result<()> {
        let mut store = RangeStore::new();
        store.create(org("a"), 10, 50)?;

        for (start, end) in [(50, 60), (1, 10), (20, 30), (1, 100)] {
            let result = store.create(org("b"), start, end);
            assert!(
                matches!(result, Err(Error::InvariantViolation(_))),
                "[{}, {}] should overlap",
                start,
                end
            );
        }
        store.create(org("b"), 51, 60)?;
        store.create(org("b"), 1, 9)?;
        assert_eq!(store.len(), 3);
        Ok(())
    }

    #[test]
    fn test_create_rejects_inverted_bounds() {
        let mut store = RangeStore::new();
        assert_eq!(
            store.create(org("a"), 9, 3),
            Err(Error::InvalidRange { start: 9, end: 3 })
        );
        assert!(store.is_empty());
    }

    #[test]
    fn test_shrink_end_and_start() -> Result<()> {
        let mut store = RangeStore::new();
        let interval = store.create(org("a"), 10, 50)?;

        let (before, after) = store.shrink_end(interval.id, 40)?;
        assert_eq!((before.start, before.end), (10, 50));
        assert_eq!((after.start, after.end), (10, 40));

        store.shrink_start(interval.id, 15)?;
        let current = store.get(interval.id)?;
        assert_eq!((current.start, current.end), (15, 40));
        assert_eq!(store.ranges_for(&org("a"))[0].start, 15);

        // The freed space is available again
        store.create(org("b"), 10, 14)?;
        Ok(())
    }

    #[test]
    fn test_shrink_cannot_invert_or_grow() -> Result<()> {
        let mut store = RangeStore::new();
        let interval = store.create(org("a"), 10, 50)?;

        assert!(store.shrink_end(interval.id, 9).is_err());
        assert!(store.shrink_end(interval.id, 51).is_err());
        assert!(store.shrink_start(interval.id, 51).is_err());
        assert!(store.shrink_start(interval.id, 5).is_err());
        assert_eq!(store.get(interval.id)?.len(), 41);

        // Single-serial interval is fine
        store.shrink_end(interval.id, 10)?;
        assert_eq!(store.get(interval.id)?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_reassign_moves_owner_index() -> Result<()> {
        let mut store = RangeStore::new();
        let interval = store.create(org("a"), 10, 50)?;
        store.reassign(interval.id, org("b"))?;

        assert!(store.ranges_for(&org("a")).is_empty());
        assert_eq!(store.ranges_for(&org("b"))[0].id, interval.id);
        assert_eq!(store.owners().count(), 1);
        Ok(())
    }

    #[test]
    fn test_delete_missing_interval() -> Result<()> {
        let mut store = RangeStore::new();
        let interval = store.create(org("a"), 1, 5)?;
        store.delete(interval.id)?;
        assert_eq!(
            store.delete(interval.id),
            Err(Error::IntervalNotFound(interval.id))
        );
        assert_eq!(
            store.shrink_end(interval.id, 3).map(|_| ()),
            Err(Error::IntervalNotFound(interval.id))
        );
        Ok(())
    }

    #[test]
    fn test_find_containing() -> Result<()> {
        let mut store = RangeStore::new();
        store.create(org("a"), 10, 20)?;
        store.create(org("b"), 21, 30)?;

        assert_eq!(store.find_containing(&org("a"), 15).map(|r| r.start), Some(10));
        assert!(store.find_containing(&org("a"), 25).is_none());
        assert!(store.find_containing(&org("a"), 5).is_none());
        Ok(())
    }

    #[test]
    fn test_ids_are_never_reused_after_insert() -> Result<()> {
        let mut store = RangeStore::new();
        store.insert(SerialInterval {
            id: IntervalId(41),
            owner: org("a"),
            start: 1,
            end: 5,
        })?;
        let next = store.create(org("a"), 6, 9)?;
        assert_eq!(next.id, IntervalId(42));
        Ok(())
    }
}
