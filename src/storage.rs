// Persistent key/value storage for pyscout - SQLite-backed store plus the
// expiring scoped view used by the interpreter resolution cache

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Result, ScoutError, StorageError};

/// Current database schema version
const SCHEMA_VERSION: u32 = 1;

/// Default cache directory name
const CACHE_DIR_NAME: &str = "pyscout";

/// Database file inside the cache directory
const DATABASE_FILE: &str = "kv.db";

/// Persistent key/value store shared by every component that caches data.
///
/// Writes replace the whole entry. Concurrent writers to the same key race
/// and the last one wins.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;
    async fn update(&self, key: &str, value: serde_json::Value) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// SQLite-based key/value store
#[derive(Clone)]
pub struct SqliteStore {
    cache_dir: Option<PathBuf>,
    connection: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Create a store in the default cache directory
    pub fn new() -> Result<Self> {
        let cache_dir = Self::default_cache_directory()?;
        Self::with_cache_directory(cache_dir)
    }

    /// Create a store in a custom cache directory
    pub fn with_cache_directory(cache_dir: PathBuf) -> Result<Self> {
        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir).map_err(|e| {
                ScoutError::Storage(Box::new(StorageError::CacheDirectoryFailed {
                    path: cache_dir.clone(),
                    error: e.to_string(),
                }))
            })?;

            let readme_content = format!(
                "This directory is maintained by pyscout.\n\
                 \n\
                 - {DATABASE_FILE}: cached interpreter information\n\
                 \n\
                 It is safe to delete; entries are recomputed on demand.\n"
            );
            if let Err(e) = fs::write(cache_dir.join("README"), readme_content) {
                warn!("Failed to create README in cache directory: {}", e);
            }
        }

        let db_path = cache_dir.join(DATABASE_FILE);
        let connection = Self::initialize_database(&db_path)?;

        Ok(Self {
            cache_dir: Some(cache_dir),
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Create a store backed by an in-memory database (for tests only)
    pub fn with_memory_database() -> Result<Self> {
        let connection = Connection::open_in_memory().map_err(|e| {
            ScoutError::Storage(Box::new(StorageError::ConnectionFailed {
                message: e.to_string(),
                database_path: None,
            }))
        })?;
        connection.pragma_update(None, "synchronous", "OFF")?;
        Self::create_schema(&connection)?;

        Ok(Self {
            cache_dir: None,
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Default cache directory: `PYSCOUT_HOME`, then `XDG_CACHE_HOME/pyscout`,
    /// then the platform cache directory.
    pub fn default_cache_directory() -> Result<PathBuf> {
        if let Ok(home) = std::env::var("PYSCOUT_HOME") {
            if !home.is_empty() {
                return Ok(PathBuf::from(home));
            }
        }

        if let Ok(xdg_cache) = std::env::var("XDG_CACHE_HOME") {
            if !xdg_cache.is_empty() {
                return Ok(PathBuf::from(xdg_cache).join(CACHE_DIR_NAME));
            }
        }

        dirs::cache_dir()
            .map(|dir| dir.join(CACHE_DIR_NAME))
            .ok_or_else(|| {
                ScoutError::Storage(Box::new(StorageError::CacheDirectoryFailed {
                    path: PathBuf::from("$HOME"),
                    error: "no cache directory could be determined".to_string(),
                }))
            })
    }

    fn initialize_database(db_path: &Path) -> Result<Connection> {
        let connection = Connection::open(db_path).map_err(|e| {
            ScoutError::Storage(Box::new(StorageError::ConnectionFailed {
                message: e.to_string(),
                database_path: Some(db_path.to_path_buf()),
            }))
        })?;

        connection.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        connection.pragma_update(None, "synchronous", "NORMAL")?;
        connection.busy_timeout(Duration::from_secs(30))?;

        Self::create_schema(&connection)?;
        Ok(connection)
    }

    fn create_schema(connection: &Connection) -> Result<()> {
        connection.execute(
            "CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;

        connection.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER NOT NULL,
                applied_at INTEGER NOT NULL DEFAULT (cast(strftime('%s', 'now') as integer))
            )",
            [],
        )?;

        let existing: Option<u32> = connection
            .query_row(
                "SELECT version FROM schema_version WHERE version = ?1",
                params![SCHEMA_VERSION],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_none() {
            connection.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                params![SCHEMA_VERSION],
            )?;
        }

        Ok(())
    }

    /// Cache directory of a file-backed store
    pub fn cache_directory(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }

    /// Get current database schema version
    pub fn schema_version(&self) -> Result<u32> {
        let connection = self.connection.lock();
        let version: u32 = connection
            .query_row(
                "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(0);
        Ok(version)
    }

    /// Number of stored entries
    pub fn len(&self) -> Result<usize> {
        let connection = self.connection.lock();
        let count: i64 =
            connection.query_row("SELECT COUNT(*) FROM kv_store", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Remove every entry, returning how many were deleted
    pub fn clear(&self) -> Result<usize> {
        let connection = self.connection.lock();
        let removed = connection.execute("DELETE FROM kv_store", [])?;
        debug!("Cleared {} cache entries", removed);
        Ok(removed)
    }

    async fn run_blocking<T, F>(&self, operation: &str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let connection = Arc::clone(&self.connection);
        tokio::task::spawn_blocking(move || {
            let connection = connection.lock();
            f(&connection)
        })
        .await
        .map_err(|e| {
            ScoutError::Storage(Box::new(StorageError::TaskFailed {
                operation: operation.to_string(),
                error: e.to_string(),
            }))
        })?
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let key = key.to_string();
        self.run_blocking("get", move |connection| {
            let raw: Option<String> = connection
                .query_row(
                    "SELECT value FROM kv_store WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;

            match raw {
                Some(raw) => serde_json::from_str(&raw).map(Some).map_err(|e| {
                    ScoutError::Storage(Box::new(StorageError::CorruptEntry {
                        key,
                        error: e.to_string(),
                    }))
                }),
                None => Ok(None),
            }
        })
        .await
    }

    async fn update(&self, key: &str, value: serde_json::Value) -> Result<()> {
        let key = key.to_string();
        let raw = serde_json::to_string(&value)?;
        self.run_blocking("update", move |connection| {
            connection.execute(
                "INSERT OR REPLACE INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)",
                params![key, raw, Utc::now().timestamp()],
            )?;
            Ok(())
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.run_blocking("remove", move |connection| {
            connection.execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
            Ok(())
        })
        .await
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEnvelope<T> {
    value: T,
    created_at: DateTime<Utc>,
}

/// A single key of a [`KeyValueStore`] with a default and a creation-time expiry.
///
/// Reads past the expiry window, reads of undecodable entries and store failures
/// all return the default. Reading never refreshes the entry.
pub struct ScopedStore<T> {
    store: Arc<dyn KeyValueStore>,
    key: String,
    default: T,
    expiry: Option<Duration>,
}

impl<T> ScopedStore<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        key: impl Into<String>,
        default: T,
        expiry: Option<Duration>,
    ) -> Self {
        Self {
            store,
            key: key.into(),
            default,
            expiry,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current value, or the default when missing or expired
    pub async fn value(&self) -> T {
        self.value_at(Utc::now()).await
    }

    async fn value_at(&self, now: DateTime<Utc>) -> T {
        let raw = match self.store.get(&self.key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return self.default.clone(),
            Err(e) => {
                debug!(key = %self.key, "Treating unreadable cache entry as missing: {}", e);
                return self.default.clone();
            }
        };

        let envelope: StoredEnvelope<T> = match serde_json::from_value(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(key = %self.key, "Treating malformed cache entry as missing: {}", e);
                return self.default.clone();
            }
        };

        if let Some(expiry) = self.expiry {
            let max_age = ChronoDuration::from_std(expiry)
                .unwrap_or_else(|_| ChronoDuration::days(365 * 100));
            if now - envelope.created_at >= max_age {
                debug!(key = %self.key, created_at = %envelope.created_at, "Cache entry expired");
                return self.default.clone();
            }
        }

        envelope.value
    }

    /// Replace the stored value, stamping it with the current time
    pub async fn update_value(&self, value: T) -> Result<()> {
        self.update_value_at(value, Utc::now()).await
    }

    /// Replace the stored value with an explicit creation time
    pub async fn update_value_at(&self, value: T, created_at: DateTime<Utc>) -> Result<()> {
        let envelope = StoredEnvelope { value, created_at };
        self.store
            .update(&self.key, serde_json::to_value(&envelope)?)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn create_temp_store() -> (SqliteStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let cache_dir = temp_dir.path().join("cache");
        let store = SqliteStore::with_cache_directory(cache_dir).expect("Failed to create store");
        (store, temp_dir)
    }

    #[test]
    fn test_cache_directory_creation() {
        let (store, _temp_dir) = create_temp_store();
        let cache_dir = store.cache_directory().unwrap();

        assert!(cache_dir.join("README").exists());
        assert!(cache_dir.join(DATABASE_FILE).exists());
        assert_eq!(store.schema_version().unwrap(), SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_update_get_remove() {
        let store = SqliteStore::with_memory_database().unwrap();

        assert!(store.get("missing").await.unwrap().is_none());

        store
            .update("key", serde_json::json!({"a": 1}))
            .await
            .unwrap();
        store
            .update("key", serde_json::json!({"a": 2}))
            .await
            .unwrap();
        assert_eq!(
            store.get("key").await.unwrap(),
            Some(serde_json::json!({"a": 2}))
        );
        assert_eq!(store.len().unwrap(), 1);

        store.remove("key").await.unwrap();
        assert!(store.get("key").await.unwrap().is_none());
        assert!(store.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_reopen_keeps_entries() {
        let temp_dir = TempDir::new().unwrap();
        let cache_dir = temp_dir.path().join("cache");
        {
            let store = SqliteStore::with_cache_directory(cache_dir.clone()).unwrap();
            store.update("k", serde_json::json!("v")).await.unwrap();
        }
        let store = SqliteStore::with_cache_directory(cache_dir).unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(serde_json::json!("v")));
        assert_eq!(store.clear().unwrap(), 1);
    }

    #[test]
    #[serial]
    fn test_default_cache_directory_honours_pyscout_home() {
        std::env::set_var("PYSCOUT_HOME", "/tmp/pyscout-home-test");
        let dir = SqliteStore::default_cache_directory().unwrap();
        std::env::remove_var("PYSCOUT_HOME");

        assert_eq!(dir, PathBuf::from("/tmp/pyscout-home-test"));
    }

    #[tokio::test]
    async fn test_scoped_store_expiry_is_creation_based() {
        let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::with_memory_database().unwrap());
        let scoped = ScopedStore::new(
            store,
            "scoped",
            None::<String>,
            Some(Duration::from_secs(24 * 60 * 60)),
        );

        assert_eq!(scoped.value().await, None);

        scoped
            .update_value_at(Some("fresh".into()), Utc::now() - ChronoDuration::hours(1))
            .await
            .unwrap();
        assert_eq!(scoped.value().await, Some("fresh".to_string()));

        scoped
            .update_value_at(Some("stale".into()), Utc::now() - ChronoDuration::hours(25))
            .await
            .unwrap();
        assert_eq!(scoped.value().await, None);
    }

    #[tokio::test]
    async fn test_scoped_store_malformed_entry_reads_default() {
        let sqlite = Arc::new(SqliteStore::with_memory_database().unwrap());
        sqlite
            .update("scoped", serde_json::json!({"unexpected": true}))
            .await
            .unwrap();

        let scoped = ScopedStore::new(sqlite, "scoped", 7u32, None);
        assert_eq!(scoped.value().await, 7);
    }
}
