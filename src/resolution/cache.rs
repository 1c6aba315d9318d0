// Persistent cache of interpreter query results, keyed by executable path and
// invalidated by file identity or age
use blake3::Hasher;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, trace};

use crate::environment::InterpreterInformation;
use crate::error::Result;
use crate::filesystem::{normalize_path_key, FileSystem};
use crate::storage::{KeyValueStore, ScopedStore};

/// Bumping this orphans every entry written by an older layout
pub const CACHE_SCHEMA_VERSION: u32 = 1;

/// Entries older than this are ignored
pub const DEFAULT_CACHE_EXPIRY: Duration = Duration::from_secs(24 * 60 * 60);

/// Stored value: the interpreter data plus the identity of the file it came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedResolution {
    pub file_hash: String,
    pub info: InterpreterInformation,
}

fn hash_time(hasher: &mut Hasher, time: Option<SystemTime>) {
    match time.and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok()) {
        Some(duration) => {
            hasher.update(&duration.as_secs().to_be_bytes());
            hasher.update(&duration.subsec_nanos().to_be_bytes());
        }
        None => {
            hasher.update(&[0u8]);
        }
    }
}

pub struct ResolutionCache {
    store: Arc<dyn KeyValueStore>,
    fs: Arc<dyn FileSystem>,
    expiry: Duration,
}

impl ResolutionCache {
    pub fn new(store: Arc<dyn KeyValueStore>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            store,
            fs,
            expiry: DEFAULT_CACHE_EXPIRY,
        }
    }

    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry = expiry;
        self
    }

    /// Store key for an executable.
    ///
    /// Only the path goes into the key. The file identity from [`file_hash`]
    /// is kept in the value and checked on every read, so rewriting an
    /// interpreter replaces its entry instead of leaving the old one behind.
    ///
    /// [`file_hash`]: ResolutionCache::file_hash
    pub fn cache_key(executable: &Path) -> String {
        let digest = blake3::hash(normalize_path_key(executable).as_bytes());
        format!("interpreter-info-v{}:{}", CACHE_SCHEMA_VERSION, digest.to_hex())
    }

    /// Identity of the file behind `executable`: its real path, size, mtime
    /// and ctime. `None` when the file cannot be inspected.
    pub async fn file_hash(&self, executable: &Path) -> Option<String> {
        let real_path = self.fs.real_path(executable).await?;
        let stat = self.fs.stat(&real_path).await?;

        let mut hasher = Hasher::new();
        hasher.update(normalize_path_key(&real_path).as_bytes());
        hasher.update(&stat.size.to_be_bytes());
        hash_time(&mut hasher, stat.mtime);
        hash_time(&mut hasher, stat.ctime);
        Some(hasher.finalize().to_hex().to_string())
    }

    fn scoped(&self, executable: &Path) -> ScopedStore<Option<CachedResolution>> {
        ScopedStore::new(
            Arc::clone(&self.store),
            Self::cache_key(executable),
            None,
            Some(self.expiry),
        )
    }

    /// Cached data, only when the entry is fresh and the file is unchanged
    pub async fn get(&self, executable: &Path) -> Option<InterpreterInformation> {
        let cached = self.scoped(executable).value().await?;
        let Some(current) = self.file_hash(executable).await else {
            trace!(executable = %executable.display(), "Cannot hash executable; cache miss");
            return None;
        };
        if cached.file_hash != current {
            debug!(executable = %executable.display(), "Executable changed since it was cached");
            return None;
        }
        Some(cached.info)
    }

    /// Overwrite the entry for `executable`
    pub async fn insert(&self, executable: &Path, info: &InterpreterInformation) -> Result<()> {
        self.insert_at(executable, info, Utc::now()).await
    }

    /// Overwrite the entry with an explicit creation time. Does nothing when the
    /// file cannot be hashed, since such an entry could never validate.
    pub async fn insert_at(
        &self,
        executable: &Path,
        info: &InterpreterInformation,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        let Some(file_hash) = self.file_hash(executable).await else {
            return Ok(());
        };
        let entry = CachedResolution {
            file_hash,
            info: info.clone(),
        };
        self.scoped(executable)
            .update_value_at(Some(entry), created_at)
            .await
    }

    pub async fn invalidate(&self, executable: &Path) -> Result<()> {
        self.store.remove(&Self::cache_key(executable)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{Architecture, PythonVersion};
    use crate::filesystem::LocalFileSystem;
    use crate::storage::SqliteStore;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn cache() -> ResolutionCache {
        ResolutionCache::new(
            Arc::new(SqliteStore::with_memory_database().unwrap()),
            Arc::new(LocalFileSystem),
        )
    }

    fn info(executable: &Path) -> InterpreterInformation {
        InterpreterInformation {
            executable: executable.to_path_buf(),
            sys_prefix: PathBuf::from("/prefix"),
            version: PythonVersion::new(3, 11, 4),
            arch: Architecture::X64,
        }
    }

    #[test]
    fn test_cache_key_carries_schema_version() {
        let key = ResolutionCache::cache_key(Path::new("/usr/bin/python3"));
        assert!(key.starts_with(&format!("interpreter-info-v{CACHE_SCHEMA_VERSION}:")));
        assert_eq!(key, ResolutionCache::cache_key(Path::new("/usr/bin/./python3")));
    }

    #[tokio::test]
    async fn test_hit_then_file_change_misses() {
        let temp = TempDir::new().unwrap();
        let exe = temp.path().join("python");
        fs::write(&exe, "#!/bin/sh\n").unwrap();
        let cache = cache();

        cache.insert(&exe, &info(&exe)).await.unwrap();
        assert_eq!(cache.get(&exe).await, Some(info(&exe)));

        fs::write(&exe, "#!/bin/sh\necho changed\n").unwrap();
        assert_eq!(cache.get(&exe).await, None);
    }

    #[tokio::test]
    async fn test_changed_file_reuses_its_entry() {
        let temp = TempDir::new().unwrap();
        let exe = temp.path().join("python");
        fs::write(&exe, "").unwrap();
        let store = Arc::new(SqliteStore::with_memory_database().unwrap());
        let cache = ResolutionCache::new(
            Arc::clone(&store) as Arc<dyn KeyValueStore>,
            Arc::new(LocalFileSystem),
        );

        cache.insert(&exe, &info(&exe)).await.unwrap();
        fs::write(&exe, "#!/bin/sh
echo rebuilt
").unwrap();
        assert_eq!(cache.get(&exe).await, None);

        let mut rebuilt = info(&exe);
        rebuilt.version = PythonVersion::new(3, 12, 1);
        cache.insert(&exe, &rebuilt).await.unwrap();

        assert_eq!(cache.get(&exe).await, Some(rebuilt));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_misses() {
        let temp = TempDir::new().unwrap();
        let exe = temp.path().join("python");
        fs::write(&exe, "").unwrap();
        let cache = cache();

        let old = Utc::now() - chrono::Duration::hours(25);
        cache.insert_at(&exe, &info(&exe), old).await.unwrap();
        assert_eq!(cache.get(&exe).await, None);

        let recent = Utc::now() - chrono::Duration::hours(1);
        cache.insert_at(&exe, &info(&exe), recent).await.unwrap();
        assert!(cache.get(&exe).await.is_some());

        cache.invalidate(&exe).await.unwrap();
        assert_eq!(cache.get(&exe).await, None);
    }

    #[tokio::test]
    async fn test_missing_file_is_never_cached() {
        let cache = cache();
        let exe = Path::new("/definitely/not/here/python");
        cache.insert(exe, &info(exe)).await.unwrap();
        assert_eq!(cache.get(exe).await, None);
    }
}
