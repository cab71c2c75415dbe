//! Ledger Acquisition
//!
//! Opens the process ledger once and hands out the shared service. When
//! the primary file is unavailable, the ledger moves to a recovery copy
//! next to it so earlier entries survive the fault.

use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::audit::ledger::AuditLedger;
use crate::audit::service::AuditService;
use crate::config::LedgerConfig;
use crate::error::{AuditError, Result};

const RECOVERY_MARKER: &str = "_recovered";
const JOURNAL_SUFFIX: &str = "-journal";
const PARTIAL_SUFFIX: &str = ".partial";

/// Opens a ledger at a given path.
pub trait LedgerOpener: Send + Sync + 'static {
    fn open(
        &self,
        path: &Path,
        config: &LedgerConfig,
    ) -> impl Future<Output = Result<AuditLedger>> + Send;
}

/// Opens ledgers as SQLite files.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteOpener;

impl LedgerOpener for SqliteOpener {
    async fn open(&self, path: &Path, config: &LedgerConfig) -> Result<AuditLedger> {
        AuditLedger::open(path, config).await
    }
}

struct AcquisitionState {
    config: LedgerConfig,
    service: Option<AuditService>,
}

/// Single-flight, invalidatable owner of the process audit service.
pub struct LedgerAcquisition<O: LedgerOpener = SqliteOpener> {
    opener: O,
    state: Mutex<AcquisitionState>,
}

impl LedgerAcquisition<SqliteOpener> {
    pub fn new(config: LedgerConfig) -> Self {
        Self::with_opener(config, SqliteOpener)
    }
}

impl<O: LedgerOpener> LedgerAcquisition<O> {
    pub fn with_opener(config: LedgerConfig, opener: O) -> Self {
        Self {
            opener,
            state: Mutex::new(AcquisitionState {
                config,
                service: None,
            }),
        }
    }

    /// Return the cached service, opening (or recovering) it on first use.
    ///
    /// Concurrent first callers wait on the same lock, so exactly one of
    /// them runs the open protocol.
    pub async fn acquire(&self) -> Result<AuditService> {
        let mut state = self.state.lock().await;
        if let Some(service) = &state.service {
            return Ok(service.clone());
        }

        let service = self.open_with_recovery(&state.config).await?;
        state.service = Some(service.clone());
        Ok(service)
    }

    /// Drop the cached service; the next `acquire` reruns the protocol.
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        if state.service.take().is_some() {
            info!("Audit ledger handle invalidated");
        }
    }

    /// Point acquisition at a new primary path, invalidating on change.
    pub async fn set_primary_path(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        let mut state = self.state.lock().await;
        if state.config.db_path != path {
            info!(
                "Audit ledger path changed from {} to {}",
                state.config.db_path.display(),
                path.display()
            );
            state.config.db_path = path;
            state.service = None;
        }
    }

    /// Path of the ledger currently serving, if one has been acquired.
    pub async fn active_path(&self) -> Option<PathBuf> {
        let state = self.state.lock().await;
        state
            .service
            .as_ref()
            .map(|service| service.ledger().path().to_path_buf())
    }

    async fn open_with_recovery(&self, config: &LedgerConfig) -> Result<AuditService> {
        let primary = config.db_path.as_path();

        let primary_err = match self.opener.open(primary, config).await {
            Ok(ledger) => return Ok(AuditService::new(ledger)),
            Err(e) if e.is_storage_unavailable() => e,
            Err(e) => return Err(e),
        };

        let recovery = recovery_path(primary);
        warn!(
            "Audit ledger at {} unavailable ({}); falling back to {}",
            primary.display(),
            primary_err,
            recovery.display()
        );

        seed_recovery_copy(primary, &recovery).await?;

        match self.opener.open(&recovery, config).await {
            Ok(ledger) => {
                info!("Audit ledger recovered at {}", recovery.display());
                Ok(AuditService::new(ledger))
            }
            Err(e) => {
                error!(
                    "Audit ledger recovery at {} failed: {}",
                    recovery.display(),
                    e
                );
                Err(AuditError::StorageUnavailable(format!(
                    "primary {} unavailable ({}); recovery {} unavailable ({})",
                    primary.display(),
                    primary_err,
                    recovery.display(),
                    e
                )))
            }
        }
    }
}

/// `data/audit.db` becomes `data/audit_recovered.db`.
pub fn recovery_path(primary: &Path) -> PathBuf {
    let stem = primary
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = match primary.extension() {
        Some(ext) => format!("{}{}.{}", stem, RECOVERY_MARKER, ext.to_string_lossy()),
        None => format!("{}{}", stem, RECOVERY_MARKER),
    };
    primary.with_file_name(file_name)
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

async fn path_exists(path: &Path) -> Result<bool> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| AuditError::storage_io(path, e))
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(AuditError::storage_io(path, e)),
    }
}

/// Copy the primary file to the recovery path unless a recovery file
/// already exists or there is nothing to copy.
///
/// Both the main file and any hot journal are staged under `.partial`
/// names first. The journal is renamed into place before the main file, so
/// the recovery file never appears without the journal it depends on.
async fn seed_recovery_copy(primary: &Path, recovery: &Path) -> Result<()> {
    if path_exists(recovery).await? {
        info!("Reusing existing recovery ledger {}", recovery.display());
        return Ok(());
    }

    // With no recovery file, any journal at the recovery path is left over
    // from an interrupted copy and must not be replayed into a new ledger.
    let recovery_journal = sidecar(recovery, JOURNAL_SUFFIX);
    if path_exists(&recovery_journal).await? {
        warn!("Removing stale recovery journal {}", recovery_journal.display());
        remove_if_exists(&recovery_journal).await?;
    }

    if !path_exists(primary).await? {
        info!(
            "No ledger at {}; starting a fresh ledger at {}",
            primary.display(),
            recovery.display()
        );
        return Ok(());
    }

    let partial = sidecar(recovery, PARTIAL_SUFFIX);
    let journal_partial = sidecar(&recovery_journal, PARTIAL_SUFFIX);

    let (bytes, journal_bytes) = match stage_copies(primary, &partial, &journal_partial).await {
        Ok(copied) => copied,
        Err(e) => {
            let _ = remove_if_exists(&partial).await;
            let _ = remove_if_exists(&journal_partial).await;
            return Err(e);
        }
    };

    if let Some(journal_bytes) = journal_bytes {
        tokio::fs::rename(&journal_partial, &recovery_journal)
            .await
            .map_err(|e| AuditError::storage_io(&recovery_journal, e))?;
        info!(
            "Carried {} byte hot journal to {}",
            journal_bytes,
            recovery_journal.display()
        );
    }

    // A failure here leaves at most a journal with no recovery file, which
    // the next attempt removes above.
    tokio::fs::rename(&partial, recovery)
        .await
        .map_err(|e| AuditError::storage_io(recovery, e))?;

    info!(
        "Copied {} bytes from {} to {}",
        bytes,
        primary.display(),
        recovery.display()
    );
    Ok(())
}

/// Copy the main file and, when present, its journal to staging paths.
///
/// The main file goes first: SQLite journals a page before changing it, so
/// every page altered in the copied file already has its original in the
/// journal copied after it.
async fn stage_copies(
    primary: &Path,
    partial: &Path,
    journal_partial: &Path,
) -> Result<(u64, Option<u64>)> {
    let bytes = tokio::fs::copy(primary, partial)
        .await
        .map_err(|e| AuditError::storage_io(primary, e))?;

    let primary_journal = sidecar(primary, JOURNAL_SUFFIX);
    let journal_bytes = if path_exists(&primary_journal).await? {
        let copied = tokio::fs::copy(&primary_journal, journal_partial)
            .await
            .map_err(|e| AuditError::storage_io(&primary_journal, e))?;
        Some(copied)
    } else {
        None
    };

    Ok((bytes, journal_bytes))
}
