use thiserror::Error;

impl From<serde_json::Error> for AuditError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(format!("JSON serialization error: {}", err))
    }
}

impl From<csv::Error> for AuditError {
    fn from(err: csv::Error) -> Self {
        Self::SerializationError(format!("CSV serialization error: {}", err))
    }
}

impl From<config::ConfigError> for AuditError {
    fn from(err: config::ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

impl From<sqlx::Error> for AuditError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            // Malformed connection strings are a setup bug, not a storage fault.
            sqlx::Error::Configuration(e) => {
                Self::ConfigError(format!("Invalid storage configuration: {}", e))
            }
            sqlx::Error::Database(e) if is_constraint_violation(e.kind()) => {
                Self::Conflict(format!("Constraint violation: {}", e))
            }
            other => Self::StorageUnavailable(format!("Database error: {}", other)),
        }
    }
}

fn is_constraint_violation(kind: sqlx::error::ErrorKind) -> bool {
    use sqlx::error::ErrorKind;
    matches!(
        kind,
        ErrorKind::UniqueViolation
            | ErrorKind::ForeignKeyViolation
            | ErrorKind::NotNullViolation
            | ErrorKind::CheckViolation
    )
}

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The store is reachable but rejected the write, e.g. a duplicate id
    /// from a second writer on the same file.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl AuditError {
    pub fn invalid_limit(limit: i64) -> Self {
        Self::InvalidArgument(format!("limit must be positive, got {}", limit))
    }

    pub fn storage_io(path: &std::path::Path, err: std::io::Error) -> Self {
        Self::StorageUnavailable(format!("{}: {}", path.display(), err))
    }

    /// True for the one error kind that ledger acquisition recovers from.
    pub fn is_storage_unavailable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, AuditError>;
