//! Serial intervals and the general split operation

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{IntervalId, OrgId};
use crate::error::{Error, Result};

/// A serial number. Serial 0 is never issued; the first block starts at 1.
pub type Serial = u64;

/// A contiguous inclusive span `[start, end]` of serial numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Subrange {
    pub start: Serial,
    pub end: Serial,
}

impl Subrange {
    /// Builds a subrange, rejecting inverted bounds.
    pub fn new(start: Serial, end: Serial) -> Result<Self> {
        if start > end {
            return Err(Error::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Subrange of `quantity` serials beginning at `start`.
    pub fn from_start(start: Serial, quantity: u64) -> Result<Self> {
        if quantity == 0 {
            return Err(Error::InvalidQuantity(0));
        }
        let end = start
            .checked_add(quantity - 1)
            .ok_or(Error::InvalidRange { start, end: u64::MAX })?;
        Ok(Self { start, end })
    }

    /// Subrange of `quantity` serials finishing at `end`.
    pub fn from_end(end: Serial, quantity: u64) -> Result<Self> {
        if quantity == 0 {
            return Err(Error::InvalidQuantity(0));
        }
        let start = end
            .checked_sub(quantity - 1)
            .ok_or(Error::InvalidRange { start: 0, end })?;
        Ok(Self { start, end })
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// A subrange always holds at least one serial.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, serial: Serial) -> bool {
        self.start <= serial && serial <= self.end
    }

    pub fn covers(&self, other: &Subrange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn overlaps(&self, other: &Subrange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

impl fmt::Display for Subrange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Serials owned by one organization within one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialInterval {
    pub id: IntervalId,
    pub owner: OrgId,
    pub start: Serial,
    pub end: Serial,
}

impl SerialInterval {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn range(&self) -> Subrange {
        Subrange {
            start: self.start,
            end: self.end,
        }
    }
}

/// Result of cutting a consumed subrange out of an interval.
///
/// ```text
/// interval:  [ before ][ consumed ][ after ]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitParts {
    pub before: Option<Subrange>,
    pub consumed: Subrange,
    pub after: Option<Subrange>,
}

impl SplitParts {
    /// The consumed subrange is the whole interval.
    pub fn is_full(&self) -> bool {
        self.before.is_none() && self.after.is_none()
    }

    /// Total serials across all parts.
    pub fn total(&self) -> u64 {
        self.before.map_or(0, |r| r.len()) + self.consumed.len() + self.after.map_or(0, |r| r.len())
    }
}

/// Splits `interval` around `[consumed_start, consumed_end]`.
///
/// The consumed subrange must lie inside the interval. Either remainder may be
/// absent; when both are present the split is three-way.
pub fn split_interval(
    interval: &Subrange,
    consumed_start: Serial,
    consumed_end: Serial,
) -> Result<SplitParts> {
    let consumed = Subrange::new(consumed_start, consumed_end)?;
    if !interval.covers(&consumed) {
        return Err(Error::InvalidRange {
            start: consumed_start,
            end: consumed_end,
        });
    }

    let before = (consumed.start > interval.start).then(|| Subrange {
        start: interval.start,
        end: consumed.start - 1,
    });
    let after = (consumed.end < interval.end).then(|| Subrange {
        start: consumed.end + 1,
        end: interval.end,
    });

    Ok(SplitParts {
        before,
        consumed,
        after,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: Serial, end: Serial) -> Subrange {
        Subrange::new(start, end).unwrap()
    }

    #[test]
    fn test_split_interior_is_three_way() -> Result<()> {
        let parts = split_interval(&range(10, 50), 20, 25)?;
        assert_eq!(parts.before, Some(range(10, 19)));
        assert_eq!(parts.consumed, range(20, 25));
        assert_eq!(parts.after, Some(range(26, 50)));
        assert_eq!(parts.total(), 41);
        assert!(!parts.is_full());
        Ok(())
    }

    #[test]
    fn test_split_prefix_and_suffix() -> Result<()> {
        let prefix = split_interval(&range(1, 100), 1, 30)?;
        assert_eq!(prefix.before, None);
        assert_eq!(prefix.after, Some(range(31, 100)));

        let suffix = split_interval(&range(1, 100), 71, 100)?;
        assert_eq!(suffix.before, Some(range(1, 70)));
        assert_eq!(suffix.after, None);
        Ok(())
    }

    #[test]
    fn test_split_full_interval() -> Result<()> {
        let parts = split_interval(&range(10, 50), 10, 50)?;
        assert!(parts.is_full());
        assert_eq!(parts.consumed.len(), 41);
        Ok(())
    }

    #[test]
    fn test_split_single_serial() -> Result<()> {
        let parts = split_interval(&range(7, 7), 7, 7)?;
        assert!(parts.is_full());
        Ok(())
    }

    #[test]
    fn test_split_outside_interval_fails() {
        assert_eq!(
            split_interval(&range(10, 50), 45, 55),
            Err(Error::InvalidRange { start: 45, end: 55 })
        );
        assert!(split_interval(&range(10, 50), 30, 20).is_err());
    }

    #[test]
    fn test_subrange_constructors() -> Result<()> {
        assert_eq!(Subrange::from_start(45001, 5000)?, range(45001, 50000));
        assert_eq!(Subrange::from_end(50000, 5000)?, range(45001, 50000));
        assert_eq!(Subrange::from_start(1, 0), Err(Error::InvalidQuantity(0)));
        assert!(Subrange::from_end(3, 5).is_err());
        assert!(range(1, 10).overlaps(&range(10, 20)));
        assert!(!range(1, 9).overlaps(&range(10, 20)));
        Ok(())
    }
}
