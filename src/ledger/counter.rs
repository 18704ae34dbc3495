//! Global serial sequence counter
//!
//! Hands out contiguous blocks of serial numbers for finalized issuances.
//! The counter stores the last serial handed out; a fresh ledger starts at 0
//! so the first block begins at serial 1.

use serde::{Deserialize, Serialize};

use super::interval::{Serial, Subrange};
use crate::error::{Error, Result};

/// Highest serial the counter hands out.
///
/// One below `u64::MAX`, so `end + 1` of any issued block is representable.
pub const MAX_SERIAL: Serial = u64::MAX - 1;

/// Registry-wide serial counter
///
/// Callers must hold the ledger's counter lock for the whole transaction that
/// uses a reservation, and call [`SerialCounter::release`] if that
/// transaction aborts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialCounter {
    value: Serial,
}

impl SerialCounter {
    /// Counter positioned after `value` serials have been handed out.
    pub fn at(value: Serial) -> Self {
        Self { value }
    }

    /// Last serial handed out (0 before the first reservation).
    pub fn value(&self) -> Serial {
        self.value
    }

    /// Serials left before [`MAX_SERIAL`].
    pub fn remaining(&self) -> u64 {
        MAX_SERIAL.saturating_sub(self.value)
    }

    /// Reserves `quantity` serials and returns the block.
    ///
    /// A block that would end past [`MAX_SERIAL`] is rejected and the counter
    /// is left untouched.
    pub fn reserve(&mut self, quantity: u64) -> Result<Subrange> {
        if quantity == 0 || quantity > self.remaining() {
            return Err(Error::InvalidQuantity(quantity));
        }
        let start = self.value.checked_add(1);
        let end = self.value.checked_add(quantity);
        let (start, end) = start.zip(end).ok_or_else(|| {
            Error::InvariantViolation(format!(
                "serial space exhausted: counter at {}, requested {}",
                self.value, quantity
            ))
        })?;
        self.value = end;
        Subrange::new(start, end)
    }

    /// Undoes the most recent reservation of `block`.
    pub fn release(&mut self, block: Subrange) -> Result<()> {
        if block.end != self.value {
            return Err(Error::InvariantViolation(format!(
                "cannot release {}: counter is at {}",
                block, self.value
            )));
        }
        self.value = block.start - 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_starts_at_one() -> Result<()> {
        let mut counter = SerialCounter::default();
        let block = counter.reserve(50_000)?;
        assert_eq!(block, Subrange::new(1, 50_000)?);
        assert_eq!(counter.value(), 50_000);
        Ok(())
    }

    #[test]
    fn test_counter_blocks_are_adjacent() -> Result<()> {
        let mut counter = SerialCounter::default();
        let first = counter.reserve(10)?;
        let second = counter.reserve(1)?;
        let third = counter.reserve(5)?;
        assert_eq!(first.end + 1, second.start);
        assert_eq!(second.end + 1, third.start);
        assert_eq!(counter.value(), 16);
        Ok(())
    }

    #[test]
    fn test_counter_rejects_zero() {
        let mut counter = SerialCounter::default();
        assert_eq!(counter.reserve(0), Err(Error::InvalidQuantity(0)));
        assert_eq!(counter.value(), 0);
    }

    #[test]
    fn test_counter_overflow_leaves_value_untouched() {
        let mut counter = SerialCounter::at(u64::MAX - 3);
        assert_eq!(counter.reserve(5), Err(Error::InvalidQuantity(5)));
        assert_eq!(counter.value(), u64::MAX - 3);
    }

    #[test]
    fn test_counter_rejects_whole_serial_space() -> Result<()> {
        let mut counter = SerialCounter::default();
        assert_eq!(counter.reserve(u64::MAX), Err(Error::InvalidQuantity(u64::MAX)));
        assert_eq!(counter.value(), 0);

        let block = counter.reserve(MAX_SERIAL)?;
        assert_eq!(block, Subrange::new(1, MAX_SERIAL)?);
        assert_eq!(counter.remaining(), 0);

        // Exhausted: later reservations fail instead of wrapping
        assert_eq!(counter.reserve(1), Err(Error::InvalidQuantity(1)));
        assert_eq!(counter.value(), MAX_SERIAL);
        Ok(())
    }

    #[test]
    fn test_counter_past_ceiling_fails_cleanly() {
        // Replayed from a log written before the ceiling existed
        let mut counter = SerialCounter::at(u64::MAX);
        assert_eq!(counter.remaining(), 0);
        assert_eq!(counter.reserve(1), Err(Error::InvalidQuantity(1)));
    }

    #[test]
    fn test_counter_release_rolls_back() -> Result<()> {
        let mut counter = SerialCounter::at(100);
        let block = counter.reserve(20)?;
        counter.release(block)?;
        assert_eq!(counter.value(), 100);
        assert_eq!(counter.reserve(1)?.start, 101);
        Ok(())
    }

    #[test]
    fn test_counter_release_out_of_order_fails() -> Result<()> {
        let mut counter = SerialCounter::default();
        let first = counter.reserve(10)?;
        counter.reserve(10)?;
        assert!(counter.release(first).is_err());
        Ok(())
    }
}
