//! Audit Ledger
//!
//! Owns the SQLite file backing one hash-chained audit log. Appends are
//! serialized through a single async mutex and a single transaction;
//! reads go straight to the pool and never wait on the write lock.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::audit::chain::{self, LinkFields};
use crate::audit::entry::{AuditEntry, Payload, VerifyReport};
use crate::config::LedgerConfig;
use crate::error::{AuditError, Result};

pub const AUDIT_EVENTS_SCHEMA: &str = include_str!("../../migrations/001_audit_events.sql");

pub const DEFAULT_LIST_LIMIT: i64 = 100;
pub const MAX_LIST_LIMIT: i64 = 1000;
pub const DEFAULT_VERIFY_LIMIT: i64 = 5000;
pub const MAX_VERIFY_LIMIT: i64 = 50000;

const SELECT_COLUMNS: &str =
    "SELECT id, created_at, event_type, action, status, payload, prev_hash, hash FROM audit_events";

#[derive(Debug, sqlx::FromRow)]
struct AuditRow {
    id: i64,
    created_at: String,
    event_type: String,
    action: String,
    status: String,
    payload: String,
    prev_hash: String,
    hash: String,
}

impl AuditRow {
    fn into_entry(self) -> Result<AuditEntry> {
        let payload: Payload = serde_json::from_str(&self.payload)?;
        let created_at = parse_timestamp(&self.created_at).ok_or_else(|| {
            AuditError::SerializationError(format!(
                "invalid created_at {:?} on entry {}",
                self.created_at, self.id
            ))
        })?;

        Ok(AuditEntry {
            id: self.id,
            event_type: self.event_type,
            action: self.action,
            payload,
            status: self.status,
            created_at,
            prev_hash: self.prev_hash,
            hash: self.hash,
        })
    }
}

/// Append-only audit log stored in a single SQLite file.
#[derive(Clone)]
pub struct AuditLedger {
    path: PathBuf,
    pool: SqlitePool,
    read_only: bool,
    write_lock: Arc<Mutex<()>>,
}

impl AuditLedger {
    /// Open or create the ledger at `path`.
    pub async fn open(path: &Path, config: &LedgerConfig) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| AuditError::storage_io(parent, e))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Delete)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(config.busy_timeout());

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect_with(options)
            .await?;

        sqlx::raw_sql(AUDIT_EVENTS_SCHEMA).execute(&pool).await?;

        info!("Audit ledger opened at {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            pool,
            read_only: false,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Open an existing ledger for inspection only. Appends fail.
    pub async fn open_read_only(path: &Path, config: &LedgerConfig) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true)
            .busy_timeout(config.busy_timeout());

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect_with(options)
            .await?;

        info!("Audit ledger opened read-only at {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            pool,
            read_only: true,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Append a new entry and return its id.
    ///
    /// The write runs on its own task: once started it commits or rolls back
    /// even if the caller stops waiting.
    pub async fn append(
        &self,
        event_type: &str,
        action: &str,
        payload: Payload,
        status: &str,
    ) -> Result<i64> {
        if self.read_only {
            return Err(AuditError::StorageUnavailable(format!(
                "ledger at {} is open read-only",
                self.path.display()
            )));
        }

        let ledger = self.clone();
        let event_type = event_type.to_string();
        let action = action.to_string();
        let status = status.to_string();

        tokio::spawn(async move { ledger.append_locked(&event_type, &action, &payload, &status).await })
            .await
            .map_err(|e| AuditError::StorageUnavailable(format!("append task failed: {}", e)))?
    }

    async fn append_locked(
        &self,
        event_type: &str,
        action: &str,
        payload: &Payload,
        status: &str,
    ) -> Result<i64> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let tail: Option<(i64, String, String)> =
            sqlx::query_as("SELECT id, hash, created_at FROM audit_events ORDER BY id DESC LIMIT 1")
                .fetch_optional(&mut *tx)
                .await?;

        let (id, prev_hash, floor) = match tail {
            Some((tail_id, tail_hash, tail_created_at)) => {
                let floor = parse_timestamp(&tail_created_at);
                if floor.is_none() {
                    warn!(
                        "Unreadable created_at {:?} on tail entry {}",
                        tail_created_at, tail_id
                    );
                }
                (tail_id + 1, tail_hash, floor)
            }
            None => (1, chain::genesis_prev_hash(), None),
        };

        let created_at = next_timestamp(floor);
        let hash = chain::link(
            &prev_hash,
            &LinkFields {
                id,
                event_type,
                action,
                payload,
                status,
                created_at: &created_at,
            },
        );

        sqlx::query(
            "INSERT INTO audit_events (id, created_at, event_type, action, status, payload, prev_hash, hash) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(chain::format_timestamp(&created_at))
        .bind(event_type)
        .bind(action)
        .bind(status)
        .bind(chain::canonical_payload(payload))
        .bind(&prev_hash)
        .bind(&hash)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!("Appended audit entry #{} {}/{}", id, event_type, action);
        Ok(id)
    }

    /// Newest `limit` entries (optionally of one type) in ascending id order.
    ///
    /// Rows whose payload or timestamp cannot be decoded are left out.
    pub async fn list(&self, event_type: Option<&str>, limit: i64) -> Result<Vec<AuditEntry>> {
        let limit = clamp_limit(limit, MAX_LIST_LIMIT)?;

        let mut rows: Vec<AuditRow> = match event_type.filter(|t| !t.is_empty()) {
            Some(event_type) => {
                sqlx::query_as(&format!(
                    "{} WHERE event_type = ? ORDER BY id DESC LIMIT ?",
                    SELECT_COLUMNS
                ))
                .bind(event_type)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(&format!("{} ORDER BY id DESC LIMIT ?", SELECT_COLUMNS))
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.reverse();

        // A damaged row is skipped rather than hiding every other entry in
        // the window; `verify_chain` reports it as a break.
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id;
            match row.into_entry() {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("Skipping undecodable audit entry #{}: {}", id, e),
            }
        }
        Ok(entries)
    }

    /// Walk the first `limit` entries and recompute every link.
    pub async fn verify_chain(&self, limit: i64) -> Result<VerifyReport> {
        let limit = clamp_limit(limit, MAX_VERIFY_LIMIT)?;

        let rows: Vec<AuditRow> = sqlx::query_as(&format!("{} ORDER BY id ASC LIMIT ?", SELECT_COLUMNS))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        let mut expected_prev_hash = chain::genesis_prev_hash();
        let mut checked_rows = 0u64;

        for row in rows {
            checked_rows += 1;
            let id = row.id;

            let entry = match row.into_entry() {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Audit entry #{} cannot be decoded: {}", id, e);
                    return Ok(VerifyReport::broken(checked_rows, id));
                }
            };

            if entry.prev_hash != expected_prev_hash {
                warn!(
                    "Hash chain broken at entry #{}: expected prev_hash {}, got {}",
                    id, expected_prev_hash, entry.prev_hash
                );
                return Ok(VerifyReport::broken(checked_rows, id));
            }

            if !entry.verify_hash() {
                warn!("Hash mismatch at entry #{}", id);
                return Ok(VerifyReport::broken(checked_rows, id));
            }

            expected_prev_hash = entry.hash;
        }

        info!("Audit chain verified: {} entries", checked_rows);
        Ok(VerifyReport::verified(checked_rows))
    }

    /// Current chain tail as `(id, hash)`.
    pub async fn head(&self) -> Result<Option<(i64, String)>> {
        let head: Option<(i64, String)> = sqlx::query_as("SELECT id, hash FROM audit_events ORDER BY id DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(head)
    }

    pub async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM audit_events")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Close all connections in the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn clamp_limit(limit: i64, max: i64) -> Result<i64> {
    if limit <= 0 {
        return Err(AuditError::invalid_limit(limit));
    }
    Ok(limit.min(max))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Wall-clock time, forced strictly past the previous entry's timestamp.
fn next_timestamp(floor: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now().trunc_subsecs(6);
    match floor {
        Some(last) if now <= last => last + Duration::microseconds(1),
        _ => now,
    }
}
