//! Audit Ledger System
//!
//! Tamper-evident, append-only record of every audited action in the
//! trading assistant, hash-chained and stored in SQLite.

pub mod acquisition;
pub mod chain;
pub mod entry;
pub mod ledger;
pub mod service;

pub use acquisition::{recovery_path, LedgerAcquisition, LedgerOpener, SqliteOpener};
pub use chain::{genesis_prev_hash, LinkFields};
pub use entry::{AuditEntry, Payload, VerifyReport, DEFAULT_STATUS};
pub use ledger::{AuditLedger, DEFAULT_LIST_LIMIT, DEFAULT_VERIFY_LIMIT};
pub use service::{AuditService, DEFAULT_EXPORT_LIMIT};
