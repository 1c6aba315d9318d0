// Environment locators: one per discovery source, plus the workspace and
// composite layers that combine them

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::environment::{EnvKind, HostEnvironment, PythonEnvInfo};
use crate::events::{EnvChangeEvent, EnvWatcher, FileWatcher, Subscription, WatchHandle};
use crate::filesystem::{paths_equal, FileSystem};
use crate::process::{ProcessExecutor, DEFAULT_PROCESS_TIMEOUT};

pub mod composite;
pub mod conda;
pub mod current_path;
pub mod folder_scan;
pub mod global_venv;
pub mod known_paths;
pub mod pyenv;
pub mod windows_registry;
pub mod workspace;
pub mod workspace_venv;

pub use composite::{merge_env_infos, CompositeLocator, EnvRef};
pub use conda::CondaLocator;
pub use current_path::CurrentPathLocator;
pub use global_venv::GlobalVirtualEnvLocator;
pub use known_paths::KnownPathsLocator;
pub use pyenv::PyenvLocator;
pub use windows_registry::{RegExeRegistryReader, RegistryReader, WindowsRegistryLocator};
pub use workspace::{
    RootLocatorFactory, StaticWorkspaceFolders, WorkspaceFolderEvent, WorkspaceFolders,
    WorkspaceLocators,
};
pub use workspace_venv::WorkspaceVirtualEnvLocator;

/// Lazy, single-pass sequence of environment records
pub type EnvStream = BoxStream<'static, PythonEnvInfo>;

/// Listener for environment change events
pub type ChangeListener = Arc<dyn Fn(&EnvChangeEvent) + Send + Sync>;

/// Roots a query is scoped to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchLocations {
    pub roots: Vec<PathBuf>,
    /// Also report environments that belong to no root
    pub include_non_rooted: bool,
}

/// Filter applied to an enumeration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PythonLocatorQuery {
    pub kinds: Option<Vec<EnvKind>>,
    pub search_locations: Option<SearchLocations>,
}

impl PythonLocatorQuery {
    /// Every environment from every source
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_roots(roots: Vec<PathBuf>, include_non_rooted: bool) -> Self {
        Self {
            kinds: None,
            search_locations: Some(SearchLocations {
                roots,
                include_non_rooted,
            }),
        }
    }

    pub fn with_kinds(mut self, kinds: Vec<EnvKind>) -> Self {
        self.kinds = Some(kinds);
        self
    }

    pub fn matches_kind(&self, kind: EnvKind) -> bool {
        self.kinds
            .as_ref()
            .map(|kinds| kinds.contains(&kind))
            .unwrap_or(true)
    }

    /// Roots named by the query; empty when not root-scoped
    pub fn roots(&self) -> &[PathBuf] {
        self.search_locations
            .as_ref()
            .map(|s| s.roots.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_root_scoped(&self) -> bool {
        !self.roots().is_empty()
    }

    /// Global (non-rooted) sources should be consulted
    pub fn includes_non_rooted(&self) -> bool {
        match &self.search_locations {
            Some(locations) if !locations.roots.is_empty() => locations.include_non_rooted,
            _ => true,
        }
    }

    /// True when `root` is selected by the query
    pub fn includes_root(&self, root: &Path) -> bool {
        let roots = self.roots();
        roots.is_empty() || roots.iter().any(|r| paths_equal(r, root))
    }
}

/// Shared collaborators handed to every low-level locator
#[derive(Clone)]
pub struct LocatorContext {
    pub fs: Arc<dyn FileSystem>,
    pub process: Arc<dyn ProcessExecutor>,
    pub host: Arc<HostEnvironment>,
    pub file_watcher: Option<Arc<dyn FileWatcher>>,
    pub process_timeout: Duration,
}

impl LocatorContext {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        process: Arc<dyn ProcessExecutor>,
        host: Arc<HostEnvironment>,
    ) -> Self {
        Self {
            fs,
            process,
            host,
            file_watcher: None,
            process_timeout: DEFAULT_PROCESS_TIMEOUT,
        }
    }

    pub fn with_file_watcher(mut self, file_watcher: Arc<dyn FileWatcher>) -> Self {
        self.file_watcher = Some(file_watcher);
        self
    }

    pub fn with_process_timeout(mut self, timeout: Duration) -> Self {
        self.process_timeout = timeout;
        self
    }

    /// Watch `dir` for files matching `pattern`, firing `event` on every change.
    /// Failures are logged and produce no handle.
    pub fn watch_for_changes(
        &self,
        dir: &Path,
        pattern: &str,
        watcher: &EnvWatcher,
        event: EnvChangeEvent,
    ) -> Option<WatchHandle> {
        let file_watcher = self.file_watcher.as_ref()?;
        let watcher = watcher.clone();
        let callback = Arc::new(move |change: &crate::events::FileChangeEvent| {
            watcher.fire(&event.clone().with_change_type(change.change_type));
        });

        match file_watcher.watch(dir, pattern, callback) {
            Ok(handle) => Some(handle),
            Err(e) => {
                debug!(dir = %dir.display(), "Not watching for environment changes: {}", e);
                None
            }
        }
    }
}

/// A source of Python environments
#[async_trait]
pub trait Locator: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Start a fresh enumeration. Nothing runs until the stream is polled and
    /// failures end the stream early instead of surfacing as errors.
    fn iter_envs(&self, query: &PythonLocatorQuery) -> EnvStream;

    /// Build a record for one executable this locator recognizes
    async fn resolve_env(&self, _executable: &Path) -> Option<PythonEnvInfo> {
        None
    }

    /// Subscribe to change notifications. The first subscription starts any
    /// filesystem watches; `None` means the locator never reports changes.
    fn on_changed(&self, _listener: ChangeListener) -> Option<Subscription> {
        None
    }

    /// Stop filesystem watches
    fn dispose(&self) {}
}

/// Turn a one-shot async enumeration into an [`EnvStream`]
pub fn lazy_env_stream<F, Fut>(enumerate: F) -> EnvStream
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Vec<PythonEnvInfo>> + Send + 'static,
{
    stream::once(async move { enumerate().await })
        .flat_map(stream::iter)
        .boxed()
}

/// Change notification state shared by locators that watch the filesystem.
/// Watches start with the first subscriber and stop on dispose.
#[derive(Default)]
pub struct ChangeNotifier {
    watcher: EnvWatcher,
    handles: Mutex<Option<Vec<WatchHandle>>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watcher(&self) -> &EnvWatcher {
        &self.watcher
    }

    pub fn subscribe<F>(&self, listener: ChangeListener, start_watches: F) -> Subscription
    where
        F: FnOnce(&EnvWatcher) -> Vec<WatchHandle>,
    {
        let subscription = self.watcher.on_changed(move |event| listener(event));
        let mut handles = self.handles.lock();
        if handles.is_none() {
            *handles = Some(start_watches(&self.watcher));
        }
        subscription
    }

    /// Add watches to an already running set. Before the first subscriber
    /// this does nothing; `subscribe` starts everything then.
    pub fn extend_watches<F>(&self, start_watches: F)
    where
        F: FnOnce(&EnvWatcher) -> Vec<WatchHandle>,
    {
        if let Some(handles) = self.handles.lock().as_mut() {
            handles.extend(start_watches(&self.watcher));
        }
    }

    pub fn is_watching(&self) -> bool {
        self.handles.lock().is_some()
    }

    pub fn dispose(&self) {
        if let Some(handles) = self.handles.lock().take() {
            debug!("Stopping {} filesystem watches", handles.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_scoping() {
        let all = PythonLocatorQuery::all();
        assert!(!all.is_root_scoped());
        assert!(all.includes_non_rooted());
        assert!(all.includes_root(Path::new("/anything")));

        let scoped = PythonLocatorQuery::for_roots(vec![PathBuf::from("/proj")], false);
        assert!(scoped.is_root_scoped());
        assert!(!scoped.includes_non_rooted());
        assert!(scoped.includes_root(Path::new("/proj")));
        assert!(!scoped.includes_root(Path::new("/proj2")));

        let kinds = PythonLocatorQuery::all().with_kinds(vec![EnvKind::Venv]);
        assert!(kinds.matches_kind(EnvKind::Venv));
        assert!(!kinds.matches_kind(EnvKind::Conda));
    }

    #[test]
    fn test_change_notifier_starts_watches_once() {
        let notifier = ChangeNotifier::new();
        let mut starts = 0;

        let _a = notifier.subscribe(Arc::new(|_| {}), |_| {
            starts += 1;
            vec![WatchHandle::noop()]
        });
        let _b = notifier.subscribe(Arc::new(|_| {}), |_| {
            starts += 1;
            Vec::new()
        });

        assert_eq!(starts, 1);
        assert!(notifier.is_watching());
        notifier.dispose();
        assert!(!notifier.is_watching());
    }

    #[test]
    fn test_extend_watches_only_while_watching() {
        let notifier = ChangeNotifier::new();
        let mut extended = 0;

        notifier.extend_watches(|_| {
            extended += 1;
            vec![WatchHandle::noop()]
        });
        assert_eq!(extended, 0);
        assert!(!notifier.is_watching());

        let _sub = notifier.subscribe(Arc::new(|_| {}), |_| Vec::new());
        notifier.extend_watches(|_| {
            extended += 1;
            vec![WatchHandle::noop()]
        });
        assert_eq!(extended, 1);
    }

    #[tokio::test]
    async fn test_lazy_stream_runs_on_poll() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let stream = lazy_env_stream(move || async move {
            flag.store(true, Ordering::SeqCst);
            vec![PythonEnvInfo::new("/usr/bin/python3", EnvKind::System)]
        });

        assert!(!ran.load(Ordering::SeqCst));
        let envs: Vec<_> = stream.collect().await;
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(envs.len(), 1);
    }
}
