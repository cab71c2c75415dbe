//! Audit Service
//!
//! The contract every producer writes through and every compliance
//! consumer reads from. Holds nothing but a ledger handle.

use serde::Serialize;
use tracing::error;

use crate::audit::chain;
use crate::audit::entry::{AuditEntry, Payload, VerifyReport};
use crate::audit::ledger::AuditLedger;
use crate::error::{AuditError, Result};

pub const DEFAULT_EXPORT_LIMIT: i64 = 1000;

#[derive(Clone)]
pub struct AuditService {
    ledger: AuditLedger,
}

#[derive(Serialize)]
struct ExportRecord<'a> {
    id: i64,
    created_at: String,
    event_type: &'a str,
    action: &'a str,
    status: &'a str,
    payload: &'a Payload,
}

impl<'a> From<&'a AuditEntry> for ExportRecord<'a> {
    fn from(entry: &'a AuditEntry) -> Self {
        Self {
            id: entry.id,
            created_at: chain::format_timestamp(&entry.created_at),
            event_type: &entry.event_type,
            action: &entry.action,
            status: &entry.status,
            payload: &entry.payload,
        }
    }
}

impl AuditService {
    pub fn new(ledger: AuditLedger) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &AuditLedger {
        &self.ledger
    }

    /// Record an audited action. Failures are returned, never swallowed.
    pub async fn log(
        &self,
        event_type: &str,
        action: &str,
        payload: Payload,
        status: &str,
    ) -> Result<i64> {
        self.ledger
            .append(event_type, action, payload, status)
            .await
            .map_err(|e| {
                error!("Failed to write audit event {}/{}: {}", event_type, action, e);
                e
            })
    }

    pub async fn query(&self, event_type: Option<&str>, limit: i64) -> Result<Vec<AuditEntry>> {
        self.ledger.list(event_type, limit).await
    }

    pub async fn verify_chain(&self, limit: i64) -> Result<VerifyReport> {
        self.ledger.verify_chain(limit).await
    }

    /// Render entries as CSV with a header row; payload is a JSON column.
    pub async fn export_csv(&self, event_type: Option<&str>, limit: i64) -> Result<String> {
        let entries = self.query(event_type, limit).await?;

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(["id", "created_at", "event_type", "action", "status", "payload"])?;
        for entry in &entries {
            writer.write_record([
                entry.id.to_string(),
                chain::format_timestamp(&entry.created_at),
                entry.event_type.clone(),
                entry.action.clone(),
                entry.status.clone(),
                chain::canonical_payload(&entry.payload),
            ])?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| AuditError::SerializationError(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| AuditError::SerializationError(e.to_string()))
    }

    /// Render entries as newline-delimited JSON objects.
    pub async fn export_jsonl(&self, event_type: Option<&str>, limit: i64) -> Result<String> {
        let entries = self.query(event_type, limit).await?;

        let lines = entries
            .iter()
            .map(|entry| serde_json::to_string(&ExportRecord::from(entry)))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(lines.join("\n"))
    }
}
