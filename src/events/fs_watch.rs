// Filesystem watching: native notifications inside workspace roots, polling elsewhere
use globset::{GlobBuilder, GlobMatcher};
use notify::{EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace};

use crate::error::{Result, ScoutError, WatchError};
use crate::events::event::{FileChangeEvent, FileChangeType};
use crate::filesystem::is_parent_path;

/// Callback receiving filtered file changes
pub type FileChangeCallback = Arc<dyn Fn(&FileChangeEvent) + Send + Sync>;

/// Keeps a watch alive; dropping it stops delivery
pub struct WatchHandle {
    _guard: Box<dyn Send>,
}

impl WatchHandle {
    pub fn new<T: Send + 'static>(guard: T) -> Self {
        Self {
            _guard: Box::new(guard),
        }
    }

    /// Handle for a watch that owns no resources
    pub fn noop() -> Self {
        Self::new(())
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WatchHandle")
    }
}

/// Subscribe to created/changed/deleted files under a directory.
///
/// `pattern` is a glob relative to `dir`; `*` does not cross path separators.
pub trait FileWatcher: Send + Sync {
    fn watch(&self, dir: &Path, pattern: &str, callback: FileChangeCallback)
        -> Result<WatchHandle>;
}

/// Relative glob filter applied to raw watcher paths
#[derive(Debug, Clone)]
pub struct WatchPattern {
    base: PathBuf,
    matcher: GlobMatcher,
    recursive: bool,
}

impl WatchPattern {
    pub fn new(base: &Path, pattern: &str) -> Result<Self> {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| {
                ScoutError::Watch(Box::new(WatchError::InvalidPattern {
                    pattern: pattern.to_string(),
                    error: e.to_string(),
                }))
            })?;

        Ok(Self {
            base: base.to_path_buf(),
            matcher: glob.compile_matcher(),
            recursive: pattern.contains('/') || pattern.contains("**"),
        })
    }

    pub fn matches(&self, path: &Path) -> bool {
        path.strip_prefix(&self.base)
            .map(|relative| self.matcher.is_match(relative))
            .unwrap_or(false)
    }

    pub fn recursive_mode(&self) -> RecursiveMode {
        if self.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        }
    }
}

fn change_type_of(kind: &EventKind) -> Option<FileChangeType> {
    match kind {
        EventKind::Create(_) => Some(FileChangeType::Created),
        EventKind::Modify(_) => Some(FileChangeType::Changed),
        EventKind::Remove(_) => Some(FileChangeType::Deleted),
        _ => None,
    }
}

fn event_handler(
    pattern: WatchPattern,
    callback: FileChangeCallback,
) -> impl Fn(std::result::Result<notify::Event, notify::Error>) + Send + 'static {
    move |res| match res {
        Ok(event) => {
            let Some(change_type) = change_type_of(&event.kind) else {
                return;
            };
            for path in event.paths {
                if pattern.matches(&path) {
                    trace!(path = %path.display(), %change_type, "Watched file changed");
                    callback(&FileChangeEvent { path, change_type });
                }
            }
        }
        Err(e) => error!("Filesystem watcher error: {}", e),
    }
}

/// [`FileWatcher`] backed by `notify`.
///
/// Directories inside a registered workspace root use the platform's native
/// watcher; everything else is polled at `poll_interval`.
#[derive(Clone)]
pub struct NotifyFileWatcher {
    native_roots: Arc<RwLock<Vec<PathBuf>>>,
    poll_interval: Duration,
}

impl NotifyFileWatcher {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            native_roots: Arc::new(RwLock::new(Vec::new())),
            poll_interval,
        }
    }

    pub fn add_native_root(&self, root: PathBuf) {
        let mut roots = self.native_roots.write();
        if !roots.iter().any(|r| r == &root) {
            roots.push(root);
        }
    }

    pub fn remove_native_root(&self, root: &Path) {
        self.native_roots.write().retain(|r| r != root);
    }

    /// True when `dir` is watched with native notifications
    pub fn uses_native_backend(&self, dir: &Path) -> bool {
        self.native_roots
            .read()
            .iter()
            .any(|root| is_parent_path(dir, root))
    }
}

impl FileWatcher for NotifyFileWatcher {
    fn watch(
        &self,
        dir: &Path,
        pattern: &str,
        callback: FileChangeCallback,
    ) -> Result<WatchHandle> {
        // The polling backend accepts missing paths silently
        if !dir.is_dir() {
            return Err(ScoutError::Watch(Box::new(WatchError::WatchFailed {
                path: dir.to_path_buf(),
                error: "directory does not exist".to_string(),
            })));
        }

        let filter = WatchPattern::new(dir, pattern)?;
        let mode = filter.recursive_mode();
        let handler = event_handler(filter, callback);

        if self.uses_native_backend(dir) {
            let mut watcher: RecommendedWatcher =
                notify::recommended_watcher(handler).map_err(|e| {
                    ScoutError::Watch(Box::new(WatchError::WatcherCreationFailed {
                        backend: "native".to_string(),
                        error: e.to_string(),
                    }))
                })?;
            watcher.watch(dir, mode)?;
            debug!(dir = %dir.display(), pattern, "Started native watch");
            Ok(WatchHandle::new(watcher))
        } else {
            let config = notify::Config::default().with_poll_interval(self.poll_interval);
            let mut watcher = PollWatcher::new(handler, config).map_err(|e| {
                ScoutError::Watch(Box::new(WatchError::WatcherCreationFailed {
                    backend: "polling".to_string(),
                    error: e.to_string(),
                }))
            })?;
            watcher.watch(dir, mode)?;
            debug!(dir = %dir.display(), pattern, "Started polling watch");
            Ok(WatchHandle::new(watcher))
        }
    }
}
