pub mod audit;
pub mod config;
pub mod error;

pub use audit::{AuditEntry, AuditService, LedgerAcquisition, Payload, VerifyReport};
pub use config::LedgerConfig;
pub use error::AuditError;
