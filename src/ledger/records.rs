//! Transfer and retirement history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ids::{BatchId, OrgId};
use super::interval::{Serial, Subrange};

/// A committed movement of serials between two organizations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: Uuid,
    pub batch_id: BatchId,
    pub from: OrgId,
    pub to: OrgId,
    pub quantity: u64,
    /// Serials that changed hands, ascending.
    pub ranges: Vec<Subrange>,
    pub created_at: DateTime<Utc>,
}

impl TransferRecord {
    pub fn new(batch_id: BatchId, from: OrgId, to: OrgId, mut ranges: Vec<Subrange>) -> Self {
        ranges.sort();
        Self {
            id: Uuid::new_v4(),
            batch_id,
            quantity: ranges.iter().map(Subrange::len).sum(),
            from,
            to,
            ranges,
            created_at: Utc::now(),
        }
    }
}

/// Caller-supplied details of a retirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetirementRequest {
    pub batch_id: BatchId,
    pub org_id: OrgId,
    pub quantity: u64,
    pub purpose: String,
    #[serde(default)]
    pub beneficiary: Option<String>,
}

/// A committed retirement and the certificate identifiers issued for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetirementRecord {
    pub certificate_id: String,
    pub batch_id: BatchId,
    pub org_id: OrgId,
    pub quantity: u64,
    pub serial_start: Serial,
    pub serial_end: Serial,
    pub purpose: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beneficiary: Option<String>,
    pub formatted_range: String,
    pub human_readable_id: String,
    pub created_at: DateTime<Utc>,
}

impl RetirementRecord {
    pub fn range(&self) -> Subrange {
        Subrange {
            start: self.serial_start,
            end: self.serial_end,
        }
    }
}

/// Certificate id of the form `cert_{unix_millis}_{9 alphanumerics}`.
pub fn new_certificate_id(now: DateTime<Utc>) -> String {
    let entropy = Uuid::new_v4().simple().to_string();
    format!("cert_{}_{}", now.timestamp_millis(), &entropy[..9])
}
