use std::sync::Arc;

use chrono::{Duration, Utc};
use parking_lot::Mutex;
use rusqlite::ffi::ErrorCode;
use rusqlite::{Connection, Error as SqliteError, OptionalExtension};
use tracing::{debug, warn};

use crate::db;
use crate::errors::{AppError, AppResult};
use crate::location::ResolvedLocation;

pub const CACHE_PREFIX: &str = "locres_cache_";
pub const DEFAULT_RETENTION_DAYS: i64 = 30;

pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> AppResult<Option<String>>;
    /// Fails with [`AppError::StorageQuotaExceeded`] when the store is full.
    fn set(&self, key: &str, value: &str) -> AppResult<()>;
    fn remove(&self, key: &str) -> AppResult<()>;
    fn keys_with_prefix(&self, prefix: &str) -> AppResult<Vec<String>>;
}

#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
    max_entries: Option<usize>,
}

impl SqliteStore {
    pub fn new(db: Arc<Mutex<Connection>>, max_entries: Option<usize>) -> Self {
        Self { db, max_entries }
    }

    pub fn open_in_memory(max_entries: Option<usize>) -> AppResult<Self> {
        let connection = db::open_in_memory()?;
        Ok(Self::new(Arc::new(Mutex::new(connection)), max_entries))
    }

    fn check_quota(&self, conn: &Connection, key: &str) -> AppResult<()> {
        let Some(limit) = self.max_entries else {
            return Ok(());
        };
        let exists = conn
            .query_row("SELECT 1 FROM kv_store WHERE key = ?1", [key], |_| Ok(()))
            .optional()?
            .is_some();
        if exists {
            return Ok(());
        }
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM kv_store", [], |row| row.get(0))?;
        if count as usize >= limit {
            return Err(AppError::StorageQuotaExceeded);
        }
        Ok(())
    }
}

impl CacheStore for SqliteStore {
    fn get(&self, key: &str) -> AppResult<Option<String>> {
        let conn = self.db.lock();
        conn.query_row("SELECT value FROM kv_store WHERE key = ?1", [key], |row| {
            row.get(0)
        })
        .optional()
        .map_err(AppError::from)
    }

    fn set(&self, key: &str, value: &str) -> AppResult<()> {
        let conn = self.db.lock();
        self.check_quota(&conn, key)?;
        conn.execute(
            "INSERT INTO kv_store (key, value, updated_at)
            VALUES (?1, ?2, DATETIME('now'))
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = DATETIME('now')",
            (key, value),
        )
        .map_err(map_write_error)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> AppResult<()> {
        let conn = self.db.lock();
        conn.execute("DELETE FROM kv_store WHERE key = ?1", [key])?;
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> AppResult<Vec<String>> {
        let conn = self.db.lock();
        let mut stmt =
            conn.prepare("SELECT key FROM kv_store WHERE substr(key, 1, ?2) = ?1 ORDER BY key")?;
        let keys = stmt
            .query_map((prefix, prefix.chars().count() as i64), |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }
}

fn map_write_error(err: SqliteError) -> AppError {
    match &err {
        SqliteError::SqliteFailure(code, _) if code.code == ErrorCode::DiskFull => {
            AppError::StorageQuotaExceeded
        }
        _ => AppError::from(err),
    }
}

#[derive(Clone)]
pub struct ResultCache {
    store: Arc<dyn CacheStore>,
    retention: Duration,
}

impl ResultCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self::with_retention(store, Duration::days(DEFAULT_RETENTION_DAYS))
    }

    pub fn with_retention(store: Arc<dyn CacheStore>, retention: Duration) -> Self {
        Self { store, retention }
    }

    pub fn normalize_key(raw: &str) -> String {
        raw.trim()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_")
    }

    fn storage_key(raw: &str) -> String {
        format!("{CACHE_PREFIX}{}", Self::normalize_key(raw))
    }

    pub fn get(&self, raw: &str) -> Option<ResolvedLocation> {
        let key = Self::storage_key(raw);
        let payload = match self.store.get(&key) {
            Ok(Some(payload)) => payload,
            Ok(None) => return None,
            Err(err) => {
                warn!(target: "result_cache", key, error = %err, "cache read failed");
                return None;
            }
        };

        match decode(&key, &payload) {
            Ok(entry) if !self.is_expired(&entry) => Some(entry),
            Ok(_) => {
                debug!(target: "result_cache", key, "evicting expired entry");
                self.evict(&key);
                None
            }
            Err(err) => {
                warn!(target: "result_cache", error = %err, "evicting unreadable entry");
                self.evict(&key);
                None
            }
        }
    }

    pub fn set(&self, raw: &str, value: &ResolvedLocation) {
        let key = Self::storage_key(raw);
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(target: "result_cache", key, error = %err, "failed to encode cache entry");
                return;
            }
        };

        match self.store.set(&key, &payload) {
            Ok(()) => {}
            Err(AppError::StorageQuotaExceeded) => {
                let removed = self.cleanup();
                debug!(target: "result_cache", key, removed, "quota exceeded; retrying after cleanup");
                if let Err(err) = self.store.set(&key, &payload) {
                    warn!(target: "result_cache", key, error = %err, "dropping cache write");
                }
            }
            Err(err) => {
                warn!(target: "result_cache", key, error = %err, "dropping cache write");
            }
        }
    }

    pub fn cleanup(&self) -> usize {
        let keys = self.owned_keys();
        let mut removed = 0;
        for key in keys {
            let stale = match self.store.get(&key) {
                Ok(Some(payload)) => decode(&key, &payload)
                    .map(|entry| self.is_expired(&entry))
                    .unwrap_or(true),
                Ok(None) => false,
                Err(_) => false,
            };
            if stale && self.evict(&key) {
                removed += 1;
            }
        }
        removed
    }

    pub fn clear(&self) -> usize {
        self.owned_keys()
            .into_iter()
            .filter(|key| self.evict(key))
            .count()
    }

    pub fn size(&self) -> usize {
        self.owned_keys().len()
    }

    fn owned_keys(&self) -> Vec<String> {
        self.store
            .keys_with_prefix(CACHE_PREFIX)
            .unwrap_or_else(|err| {
                warn!(target: "result_cache", error = %err, "failed to enumerate cache keys");
                Vec::new()
            })
    }

    fn is_expired(&self, entry: &ResolvedLocation) -> bool {
        Utc::now() - entry.resolved_at > self.retention
    }

    fn evict(&self, key: &str) -> bool {
        match self.store.remove(key) {
            Ok(()) => true,
            Err(err) => {
                warn!(target: "result_cache", key, error = %err, "failed to evict cache entry");
                false
            }
        }
    }
}

fn decode(key: &str, payload: &str) -> AppResult<ResolvedLocation> {
    serde_json::from_str(payload).map_err(|_| AppError::MalformedCacheEntry(key.to_string()))
}
