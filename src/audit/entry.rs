//! Audit Entry
//!
//! Defines the immutable, hash-chained record stored in the ledger and
//! the result of a chain verification pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::audit::chain::{self, LinkFields};

/// Producer-defined structured payload, opaque to the ledger.
pub type Payload = Map<String, Value>;

pub const DEFAULT_STATUS: &str = "OK";

/// One audited action, linked to its predecessor by `prev_hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub event_type: String,
    pub action: String,
    pub payload: Payload,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub prev_hash: String,
    pub hash: String,
}

impl AuditEntry {
    pub fn link_fields(&self) -> LinkFields<'_> {
        LinkFields {
            id: self.id,
            event_type: &self.event_type,
            action: &self.action,
            payload: &self.payload,
            status: &self.status,
            created_at: &self.created_at,
        }
    }

    /// Recalculate the hash from the stored fields.
    pub fn calculate_hash(&self) -> String {
        chain::link(&self.prev_hash, &self.link_fields())
    }

    pub fn verify_hash(&self) -> bool {
        self.hash == self.calculate_hash()
    }

    pub fn is_genesis(&self) -> bool {
        chain::is_genesis(&self.prev_hash)
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "#{} {}/{} [{}] {}",
            self.id,
            self.event_type,
            self.action,
            self.status,
            chain::format_timestamp(&self.created_at)
        )
    }
}

/// Outcome of walking the chain. A broken chain is a result, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    pub valid: bool,
    pub checked_rows: u64,
    pub first_break_id: Option<i64>,
    pub message: String,
}

impl VerifyReport {
    pub fn verified(checked_rows: u64) -> Self {
        Self {
            valid: true,
            checked_rows,
            first_break_id: None,
            message: "hash chain verified".to_string(),
        }
    }

    pub fn broken(checked_rows: u64, id: i64) -> Self {
        Self {
            valid: false,
            checked_rows,
            first_break_id: Some(id),
            message: format!("hash chain broken at id {}", id),
        }
    }
}
