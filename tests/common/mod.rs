#![allow(dead_code)]

use serde_json::Value;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Connection, SqliteConnection};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use trading_audit::audit::{AuditLedger, AuditService, LedgerOpener, Payload};
use trading_audit::{AuditError, LedgerConfig};

/// Build a payload from a `json!` object literal
pub fn payload(value: Value) -> Payload {
    value
        .as_object()
        .cloned()
        .expect("test payload must be a JSON object")
}

pub fn ledger_path(dir: &TempDir) -> PathBuf {
    dir.path().join("audit.db")
}

/// Open a fresh ledger-backed service at `path`
pub async fn open_service(path: &Path) -> AuditService {
    let ledger = AuditLedger::open(path, &LedgerConfig::with_path(path))
        .await
        .expect("Failed to open test ledger");
    AuditService::new(ledger)
}

/// Run raw SQL against a ledger file, bypassing the ledger API
pub async fn tamper(path: &Path, sql: &str) {
    let options = SqliteConnectOptions::new().filename(path);
    let mut conn = SqliteConnection::connect_with(&options)
        .await
        .expect("Failed to open ledger for tampering");
    sqlx::query(sql)
        .execute(&mut conn)
        .await
        .expect("Tamper statement failed");
    conn.close().await.expect("Failed to close tamper connection");
}

/// Opener that reports `StorageUnavailable` for one path and counts opens
pub struct FlakyOpener {
    pub broken: PathBuf,
    pub opens: Arc<AtomicUsize>,
}

impl FlakyOpener {
    pub fn failing(broken: &Path) -> Self {
        Self {
            broken: broken.to_path_buf(),
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn healthy() -> Self {
        Self::failing(Path::new(""))
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl LedgerOpener for FlakyOpener {
    async fn open(&self, path: &Path, config: &LedgerConfig) -> Result<AuditLedger, AuditError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if path == self.broken {
            return Err(AuditError::StorageUnavailable(format!(
                "{}: disk I/O error",
                path.display()
            )));
        }
        AuditLedger::open(path, config).await
    }
}
