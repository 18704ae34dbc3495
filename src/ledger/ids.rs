//! Identifiers used by the ledger.
//!
//! Batches are identified by a 128-bit UUID generated when an issuance is
//! finalized. Organizations are owned by the surrounding registry, so the
//! ledger accepts their identifiers as opaque strings. Intervals are keyed by
//! an arena index local to the batch that owns them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// A unique identifier for a credit batch.
///
/// # Examples
///
/// ```rust
/// use creditledger::ledger::BatchId;
///
/// let id = BatchId::new();
/// let parsed: BatchId = id.to_string().parse().unwrap();
/// assert_eq!(id, parsed);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BatchId(Uuid);

impl BatchId {
    /// Creates a new random batch ID using UUIDv4.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a BatchId from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Short display tag: the last four characters of the ID, upper-cased.
    pub fn suffix(&self) -> String {
        let simple = self.0.simple().to_string();
        simple[simple.len() - 4..].to_uppercase()
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BatchId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::InvalidArgument(format!("invalid batch id '{}': {}", s, e)))
    }
}

/// Identifier of an organization holding credits.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrgId(String);

impl OrgId {
    /// Wraps an organization identifier. Blank identifiers are rejected.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "organization id cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for OrgId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for OrgId {
    type Error = Error;

    fn try_from(id: String) -> Result<Self> {
        Self::new(id)
    }
}

impl From<OrgId> for String {
    fn from(id: OrgId) -> Self {
        id.0
    }
}

/// Arena key of a serial interval within its batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntervalId(pub u64);

impl fmt::Display for IntervalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "interval#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_id_suffix() -> Result<()> {
        let id: BatchId = "550e8400-e29b-41d4-a716-44665544abcd".parse()?;
        assert_eq!(id.suffix(), "ABCD");
        Ok(())
    }

    #[test]
    fn test_batch_id_rejects_garbage() {
        assert!("not-a-uuid".parse::<BatchId>().is_err());
    }

    #[test]
    fn test_org_id_rejects_blank() {
        assert!(OrgId::new("   ").is_err());
        assert_eq!(OrgId::new("org-a").unwrap().as_str(), "org-a");
    }

    #[test]
    fn test_org_id_serde_validates() {
        let org: OrgId = serde_json::from_str("\"org-b\"").unwrap();
        assert_eq!(org.as_str(), "org-b");
        assert_eq!(serde_json::to_string(&org).unwrap(), "\"org-b\"");
        assert!(serde_json::from_str::<OrgId>("\"\"").is_err());
    }
}
