//! Allocation engine
//!
//! Chooses which of an owner's serials satisfy a transfer or retirement.
//! Intervals are walked in a fixed order (lowest serial first by default),
//! so the same ledger state and request always select the same serials.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ids::OrgId;
use super::interval::{SerialInterval, Subrange};
use super::range_store::RangeStore;
use crate::error::{Error, Result};

/// Order in which an owner's intervals are consumed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationOrder {
    /// Oldest-numbered credits first; each interval is consumed from its start.
    #[default]
    LowestFirst,
    /// Newest-numbered credits first; each interval is consumed from its end.
    HighestFirst,
}

impl fmt::Display for AllocationOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocationOrder::LowestFirst => f.write_str("lowest_first"),
            AllocationOrder::HighestFirst => f.write_str("highest_first"),
        }
    }
}

impl FromStr for AllocationOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "lowest_first" | "lowest-first" => Ok(AllocationOrder::LowestFirst),
            "highest_first" | "highest-first" => Ok(AllocationOrder::HighestFirst),
            other => Err(Error::InvalidArgument(format!(
                "unknown allocation order '{}'",
                other
            ))),
        }
    }
}

/// One interval chosen by the engine and the part of it to consume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub interval: SerialInterval,
    pub consumed: Subrange,
}

impl Allocation {
    pub fn quantity(&self) -> u64 {
        self.consumed.len()
    }

    /// The whole interval is consumed.
    pub fn is_full(&self) -> bool {
        self.consumed == self.interval.range()
    }

    fn take(interval: &SerialInterval, quantity: u64, order: AllocationOrder) -> Result<Self> {
        let consumed = match order {
            AllocationOrder::LowestFirst => Subrange::from_start(interval.start, quantity)?,
            AllocationOrder::HighestFirst => Subrange::from_end(interval.end, quantity)?,
        };
        Ok(Self {
            interval: interval.clone(),
            consumed,
        })
    }
}

fn ordered(store: &RangeStore, owner: &OrgId, order: AllocationOrder) -> Vec<SerialInterval> {
    let mut ranges = store.ranges_for(owner);
    if order == AllocationOrder::HighestFirst {
        ranges.reverse();
    }
    ranges
}

/// Greedily selects `quantity` serials from `owner`'s intervals.
///
/// Every interval but the last one selected is consumed whole.
pub fn select_for_quantity(
    store: &RangeStore,
    owner: &OrgId,
    quantity: u64,
    order: AllocationOrder,
) -> Result<Vec<Allocation>> {
    if quantity == 0 {
        return Err(Error::InvalidQuantity(0));
    }

    let mut remaining = quantity;
    let mut allocations = Vec::new();
    for interval in ordered(store, owner, order) {
        if remaining == 0 {
            break;
        }
        let take = remaining.min(interval.len());
        allocations.push(Allocation::take(&interval, take, order)?);
        remaining -= take;
    }

    if remaining > 0 {
        return Err(Error::InsufficientUnits {
            requested: quantity,
            available: quantity - remaining,
        });
    }
    Ok(allocations)
}

/// Selects `quantity` serials from a single interval of `owner`.
///
/// Picks the first interval, in allocation order, long enough to hold the
/// whole request.
pub fn select_contiguous(
    store: &RangeStore,
    owner: &OrgId,
    quantity: u64,
    order: AllocationOrder,
) -> Result<Allocation> {
    if quantity == 0 {
        return Err(Error::InvalidQuantity(0));
    }

    let ranges = ordered(store, owner, order);
    let available: u64 = ranges.iter().map(SerialInterval::len).sum();
    if available < quantity {
        return Err(Error::InsufficientUnits {
            requested: quantity,
            available,
        });
    }

    ranges
        .iter()
        .find(|interval| interval.len() >= quantity)
        .map(|interval| Allocation::take(interval, quantity, order))
        .unwrap_or(Err(Error::NoContiguousRangeAvailable {
            requested: quantity,
        }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn org(name: &str) -> OrgId {
        OrgId::new(name).unwrap()
    }

    fn fragmented() -> Result<RangeStore> {
        // a: [1,10] [21,25] [31,60]   b: [11,20] [26,30]
        let mut store = RangeStore::new();
        store.create(org("a"), 31, 60)?;
        store.create(org("a"), 1, 10)?;
        store.create(org("b"), 11, 20)?;
        store.create(org("a"), 21, 25)?;
        store.create(org("b"), 26, 30)?;
        Ok(store)
    }

    #[test]
    fn test_exact_single_interval() -> Result<()> {
        let store = fragmented()?;
        let picked = select_for_quantity(&store, &org("a"), 10, AllocationOrder::LowestFirst)?;
        assert_eq!(picked.len(), 1);
        assert!(picked[0].is_full());
        assert_eq!(picked[0].consumed, Subrange::new(1, 10)?);
        Ok(())
    }

    #[test]
    fn test_spans_multiple_intervals_lowest_first() -> Result<()> {
        let store = fragmented()?;
        let picked = select_for_quantity(&store, &org("a"), 18, AllocationOrder::LowestFirst)?;
        let consumed: Vec<_> = picked.iter().map(|a| a.consumed).collect();
        assert_eq!(
            consumed,
            vec![
                Subrange::new(1, 10)?,
                Subrange::new(21, 25)?,
                Subrange::new(31, 33)?
            ]
        );
        assert!(picked[0].is_full() && picked[1].is_full() && !picked[2].is_full());
        assert_eq!(picked.iter().map(Allocation::quantity).sum::<u64>(), 18);
        Ok(())
    }

    #[test]
    fn test_spans_multiple_intervals_highest_first() -> Result<()> {
        let store = fragmented()?;
        let picked = select_for_quantity(&store, &org("a"), 33, AllocationOrder::HighestFirst)?;
        let consumed: Vec<_> = picked.iter().map(|a| a.consumed).collect();
        assert_eq!(
            consumed,
            vec![
                Subrange::new(31, 60)?,
                Subrange::new(23, 25)?
            ]
        );
        Ok(())
    }

    #[test]
    fn test_insufficient_units_reports_shortfall() -> Result<()> {
        let store = fragmented()?;
        let err = select_for_quantity(&store, &org("a"), 50, AllocationOrder::LowestFirst)
            .unwrap_err();
        assert_eq!(
            err,
            Error::InsufficientUnits {
                requested: 50,
                available: 45
            }
        );
        assert_eq!(err.shortfall(), Some(5));

        let err = select_for_quantity(&store, &org("nobody"), 1, AllocationOrder::LowestFirst)
            .unwrap_err();
        assert_eq!(err.shortfall(), Some(1));
        Ok(())
    }

    #[test]
    fn test_zero_quantity_rejected() -> Result<()> {
        let store = fragmented()?;
        assert_eq!(
            select_for_quantity(&store, &org("a"), 0, AllocationOrder::LowestFirst),
            Err(Error::InvalidQuantity(0))
        );
        assert_eq!(
            select_contiguous(&store, &org("a"), 0, AllocationOrder::LowestFirst),
            Err(Error::InvalidQuantity(0))
        );
        Ok(())
    }

    #[test]
    fn test_contiguous_picks_first_fitting_interval() -> Result<()> {
        let store = fragmented()?;
        let picked = select_contiguous(&store, &org("a"), 12, AllocationOrder::LowestFirst)?;
        assert_eq!(picked.consumed, Subrange::new(31, 42)?);

        let picked = select_contiguous(&store, &org("a"), 4, AllocationOrder::LowestFirst)?;
        assert_eq!(picked.consumed, Subrange::new(1, 4)?);

        let picked = select_contiguous(&store, &org("a"), 4, AllocationOrder::HighestFirst)?;
        assert_eq!(picked.consumed, Subrange::new(57, 60)?);
        Ok(())
    }

    #[test]
    fn test_contiguous_refuses_fragmented_holdings() -> Result<()> {
        let store = fragmented()?;
        // b holds 15 units split 10 + 5
        assert_eq!(
            select_contiguous(&store, &org("b"), 12, AllocationOrder::LowestFirst),
            Err(Error::NoContiguousRangeAvailable { requested: 12 })
        );
        assert_eq!(
            select_contiguous(&store, &org("b"), 16, AllocationOrder::LowestFirst),
            Err(Error::InsufficientUnits {
                requested: 16,
                available: 15
            })
        );
        Ok(())
    }

    #[test]
    fn test_allocation_order_parse() -> Result<()> {
        assert_eq!("highest_first".parse::<AllocationOrder>()?, AllocationOrder::HighestFirst);
        assert_eq!(AllocationOrder::default().to_string(), "lowest_first");
        assert!("random".parse::<AllocationOrder>().is_err());
        Ok(())
    }
}
