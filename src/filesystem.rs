// Filesystem primitives used by discovery.
// Every operation treats a missing path or a permission error as absence, so a
// locator never has to special-case ENOENT.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs::Metadata;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tracing::trace;

/// Subset of file metadata discovery cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub ctime: Option<SystemTime>,
    pub mtime: Option<SystemTime>,
    pub size: u64,
    pub is_dir: bool,
    pub is_symlink: bool,
}

impl FileStat {
    fn from_metadata(metadata: &Metadata) -> Self {
        Self {
            ctime: change_time(metadata),
            mtime: metadata.modified().ok(),
            size: metadata.len(),
            is_dir: metadata.is_dir(),
            is_symlink: metadata.file_type().is_symlink(),
        }
    }
}

#[cfg(unix)]
fn change_time(metadata: &Metadata) -> Option<SystemTime> {
    use std::os::unix::fs::MetadataExt;
    use std::time::{Duration, UNIX_EPOCH};

    let secs = u64::try_from(metadata.ctime()).ok()?;
    let nanos = u32::try_from(metadata.ctime_nsec()).unwrap_or(0);
    Some(UNIX_EPOCH + Duration::new(secs, nanos))
}

#[cfg(not(unix))]
fn change_time(metadata: &Metadata) -> Option<SystemTime> {
    metadata.created().ok()
}

/// Async filesystem access injected into locators, the resolver and the cache
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// True when the path exists, following symlinks
    async fn exists(&self, path: &Path) -> bool;

    /// Metadata of the path itself, without following a final symlink
    async fn lstat(&self, path: &Path) -> Option<FileStat>;

    /// Metadata of the path, following symlinks
    async fn stat(&self, path: &Path) -> Option<FileStat>;

    /// Entries of a directory in listing order; empty when unreadable
    async fn list_dir(&self, path: &Path) -> Vec<PathBuf>;

    async fn read_link(&self, path: &Path) -> Option<PathBuf>;

    /// Fully resolved path with every symlink followed
    async fn real_path(&self, path: &Path) -> Option<PathBuf>;

    async fn read_to_string(&self, path: &Path) -> Option<String>;

    async fn is_dir(&self, path: &Path) -> bool {
        self.stat(path).await.map(|s| s.is_dir).unwrap_or(false)
    }

    async fn is_file(&self, path: &Path) -> bool {
        self.stat(path).await.map(|s| !s.is_dir).unwrap_or(false)
    }
}

/// Filesystem backed by `tokio::fs`
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn lstat(&self, path: &Path) -> Option<FileStat> {
        tokio::fs::symlink_metadata(path)
            .await
            .ok()
            .map(|m| FileStat::from_metadata(&m))
    }

    async fn stat(&self, path: &Path) -> Option<FileStat> {
        tokio::fs::metadata(path)
            .await
            .ok()
            .map(|m| FileStat::from_metadata(&m))
    }

    async fn list_dir(&self, path: &Path) -> Vec<PathBuf> {
        let mut entries = Vec::new();
        let mut reader = match tokio::fs::read_dir(path).await {
            Ok(reader) => reader,
            Err(e) => {
                trace!(path = %path.display(), "Cannot list directory: {}", e);
                return entries;
            }
        };

        loop {
            match reader.next_entry().await {
                Ok(Some(entry)) => entries.push(entry.path()),
                Ok(None) => break,
                Err(e) => {
                    trace!(path = %path.display(), "Directory listing stopped early: {}", e);
                    break;
                }
            }
        }
        entries
    }

    async fn read_link(&self, path: &Path) -> Option<PathBuf> {
        tokio::fs::read_link(path).await.ok()
    }

    async fn real_path(&self, path: &Path) -> Option<PathBuf> {
        tokio::fs::canonicalize(path).await.ok()
    }

    async fn read_to_string(&self, path: &Path) -> Option<String> {
        tokio::fs::read_to_string(path).await.ok()
    }
}

#[cfg(windows)]
static PYTHON_EXE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^python(\d(\.\d+)?)?\.exe$").expect("python executable regex is valid")
});

#[cfg(not(windows))]
static PYTHON_EXE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^python(\d(\.\d+)?)?$").expect("python executable regex is valid")
});

/// Matches `python`, `python3`, `python3.11` (with `.exe` on Windows)
pub fn is_python_executable_name(file_name: &str) -> bool {
    PYTHON_EXE_NAME.is_match(file_name)
}

/// True when the final path component looks like a Python executable
pub fn is_python_executable_path(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(is_python_executable_name)
        .unwrap_or(false)
}

/// Directory holding scripts inside an environment prefix
pub fn scripts_dir_name() -> &'static str {
    if cfg!(windows) {
        "Scripts"
    } else {
        "bin"
    }
}

/// Interpreter path for a virtual environment prefix
pub fn interpreter_path_in(prefix: &Path) -> PathBuf {
    if cfg!(windows) {
        prefix.join("Scripts").join("python.exe")
    } else {
        prefix.join("bin").join("python")
    }
}

/// Interpreter candidates inside a prefix, most conventional first.
/// Conda installs on Windows keep `python.exe` at the prefix root.
pub fn interpreter_candidates_in(prefix: &Path) -> Vec<PathBuf> {
    if cfg!(windows) {
        vec![
            prefix.join("Scripts").join("python.exe"),
            prefix.join("python.exe"),
        ]
    } else {
        vec![prefix.join("bin").join("python"), prefix.join("bin").join("python3")]
    }
}

/// Environment prefix owning an executable: the parent of `bin`/`Scripts`, or
/// the executable's own directory otherwise
pub fn env_prefix_from_executable(executable: &Path) -> Option<PathBuf> {
    let parent = executable.parent()?;
    let dir_name = parent.file_name()?.to_string_lossy();
    if dir_name == "bin" || dir_name.eq_ignore_ascii_case("scripts") {
        parent.parent().map(Path::to_path_buf)
    } else {
        Some(parent.to_path_buf())
    }
}

/// Lexically normalize a path: drop `.` components and fold `..`
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component.as_os_str());
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Comparison key for executable paths. Case-insensitive with unified
/// separators on Windows, plain lexical normalization elsewhere.
pub fn normalize_path_key(path: &Path) -> String {
    let normalized = normalize_path(path).to_string_lossy().to_string();
    if cfg!(windows) {
        normalized.replace('/', "\\").to_lowercase()
    } else {
        normalized
    }
}

/// Path equality under [`normalize_path_key`]
pub fn paths_equal(a: &Path, b: &Path) -> bool {
    normalize_path_key(a) == normalize_path_key(b)
}

/// True when `path` is `parent` or lies beneath it, using normalized keys
pub fn is_parent_path(path: &Path, parent: &Path) -> bool {
    let path = normalize_path(path);
    let parent = normalize_path(parent);
    if cfg!(windows) {
        let path = normalize_path_key(&path);
        let parent = normalize_path_key(&parent);
        path == parent || path.starts_with(&format!("{}\\", parent.trim_end_matches('\\')))
    } else {
        path.starts_with(&parent)
    }
}
