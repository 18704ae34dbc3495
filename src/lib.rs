// CreditLedger - serial-number ledger for a carbon-credit registry
// Allocates, splits, transfers and retires serial ranges of issued credit.

#![warn(rust_2018_idioms)]

pub mod config;
pub mod ledger;
pub mod metrics;
pub mod server;
pub mod storage;

// Re-exports for convenience
pub use config::LedgerConfig;
pub use ledger::{BatchId, OrgId, SerialLedger};
pub use storage::{CommitStore, FileStore, MemoryStore};

/// Ledger error types
pub mod error {
    use crate::ledger::IntervalId;
    use thiserror::Error;

    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum Error {
        #[error("Insufficient units: requested {requested}, available {available}")]
        InsufficientUnits { requested: u64, available: u64 },

        #[error("No contiguous range available for retirement of {requested} units")]
        NoContiguousRangeAvailable { requested: u64 },

        #[error("Interval not found: {0}")]
        IntervalNotFound(IntervalId),

        #[error("Invariant violation: {0}")]
        InvariantViolation(String),

        #[error("Invalid range: {start}-{end}")]
        InvalidRange { start: u64, end: u64 },

        #[error("Invalid quantity: {0}")]
        InvalidQuantity(u64),

        #[error("Not found: {0}")]
        NotFound(String),

        #[error("Invalid argument: {0}")]
        InvalidArgument(String),

        #[error("Storage error: {0}")]
        Storage(String),

        #[error("Serialization error: {0}")]
        SerializationError(String),

        #[error("Configuration error: {0}")]
        Config(String),
    }

    impl Error {
        /// Errors caused by the request rather than by the ledger.
        pub fn is_user_error(&self) -> bool {
            matches!(
                self,
                Error::InsufficientUnits { .. }
                    | Error::NoContiguousRangeAvailable { .. }
                    | Error::InvalidRange { .. }
                    | Error::InvalidQuantity(_)
                    | Error::InvalidArgument(_)
                    | Error::NotFound(_)
            )
        }

        /// A concurrent writer changed the ledger first; retry from a fresh read.
        pub fn is_conflict(&self) -> bool {
            matches!(self, Error::IntervalNotFound(_))
        }

        /// Units missing to satisfy an allocation, if this is an allocation failure.
        pub fn shortfall(&self) -> Option<u64> {
            match self {
                Error::InsufficientUnits {
                    requested,
                    available,
                } => Some(requested.saturating_sub(*available)),
                _ => None,
            }
        }
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
