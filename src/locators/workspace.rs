// Per-root locators for the open workspace folders
use async_trait::async_trait;
use futures::future;
use futures::stream::{self, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use crate::environment::PythonEnvInfo;
use crate::events::{EnvChangeEvent, EnvWatcher, Emitter, Subscription};
use crate::filesystem::{is_parent_path, paths_equal};
use crate::locators::{ChangeListener, EnvStream, Locator, PythonLocatorQuery};

/// A workspace folder was opened or closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceFolderEvent {
    Added(PathBuf),
    Removed(PathBuf),
}

pub type FolderListener = Arc<dyn Fn(&WorkspaceFolderEvent) + Send + Sync>;

/// The host's set of workspace folders
pub trait WorkspaceFolders: Send + Sync {
    fn roots(&self) -> Vec<PathBuf>;

    fn on_did_change(&self, listener: FolderListener) -> Subscription;
}

/// In-process folder set, changed explicitly by the embedder
#[derive(Default)]
pub struct StaticWorkspaceFolders {
    roots: RwLock<Vec<PathBuf>>,
    emitter: Emitter<WorkspaceFolderEvent>,
}

impl StaticWorkspaceFolders {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots: RwLock::new(roots),
            emitter: Emitter::new(),
        }
    }

    /// Returns false when the root was already open
    pub fn add_root(&self, root: impl Into<PathBuf>) -> bool {
        let root = root.into();
        {
            let mut roots = self.roots.write();
            if roots.iter().any(|r| paths_equal(r, &root)) {
                return false;
            }
            roots.push(root.clone());
        }
        self.emitter.fire(&WorkspaceFolderEvent::Added(root));
        true
    }

    /// Returns false when the root was not open
    pub fn remove_root(&self, root: &Path) -> bool {
        let removed = {
            let mut roots = self.roots.write();
            let before = roots.len();
            roots.retain(|r| !paths_equal(r, root));
            roots.len() != before
        };
        if removed {
            self.emitter
                .fire(&WorkspaceFolderEvent::Removed(root.to_path_buf()));
        }
        removed
    }
}

impl WorkspaceFolders for StaticWorkspaceFolders {
    fn roots(&self) -> Vec<PathBuf> {
        self.roots.read().clone()
    }

    fn on_did_change(&self, listener: FolderListener) -> Subscription {
        self.emitter.on_changed(move |event| listener(event))
    }
}

/// Builds the locators that serve one workspace root
pub type RootLocatorFactory = Arc<dyn Fn(&Path) -> Vec<Arc<dyn Locator>> + Send + Sync>;

struct RootEntry {
    root: PathBuf,
    locators: Vec<Arc<dyn Locator>>,
    active: Arc<AtomicBool>,
    forwards: Mutex<Vec<Subscription>>,
}

impl RootEntry {
    fn forward_changes(&self, watcher: &EnvWatcher) {
        let mut forwards = self.forwards.lock();
        for locator in &self.locators {
            let active = Arc::clone(&self.active);
            let watcher = watcher.clone();
            let root = self.root.clone();
            let listener: ChangeListener = Arc::new(move |event: &EnvChangeEvent| {
                // Events racing with the root's removal are dropped
                if !active.load(Ordering::SeqCst) {
                    return;
                }
                let mut event = event.clone();
                if event.search_location.is_none() {
                    event.search_location = Some(root.clone());
                }
                watcher.fire(&event);
            });
            if let Some(subscription) = locator.on_changed(listener) {
                forwards.push(subscription);
            }
        }
    }

    fn dispose(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.forwards.lock().clear();
        for locator in &self.locators {
            locator.dispose();
        }
    }
}

struct Inner {
    factories: Vec<RootLocatorFactory>,
    roots: RwLock<Vec<Arc<RootEntry>>>,
    watcher: EnvWatcher,
    forwarding: AtomicBool,
}

impl Inner {
    fn add_root(&self, root: &Path) -> bool {
        let entry = {
            let mut roots = self.roots.write();
            if roots.iter().any(|e| paths_equal(&e.root, root)) {
                return false;
            }
            let locators = self
                .factories
                .iter()
                .flat_map(|factory| factory(root))
                .collect();
            let entry = Arc::new(RootEntry {
                root: root.to_path_buf(),
                locators,
                active: Arc::new(AtomicBool::new(true)),
                forwards: Mutex::new(Vec::new()),
            });
            roots.push(Arc::clone(&entry));
            entry
        };

        if self.forwarding.load(Ordering::SeqCst) {
            entry.forward_changes(&self.watcher);
        }
        debug!(root = %root.display(), "Registered workspace root");
        true
    }

    fn remove_root(&self, root: &Path) -> bool {
        let removed: Vec<Arc<RootEntry>> = {
            let mut roots = self.roots.write();
            let (removed, kept): (Vec<_>, Vec<_>) =
                roots.drain(..).partition(|e| paths_equal(&e.root, root));
            *roots = kept;
            removed
        };
        for entry in &removed {
            entry.dispose();
        }
        !removed.is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<RootEntry>> {
        self.roots.read().clone()
    }

    fn handle_folder_event(&self, event: &WorkspaceFolderEvent) {
        let changed_root = match event {
            WorkspaceFolderEvent::Added(root) => self.add_root(root).then_some(root),
            WorkspaceFolderEvent::Removed(root) => self.remove_root(root).then_some(root),
        };
        if let Some(root) = changed_root {
            info!(event = ?event, "Workspace folders changed");
            self.watcher.fire(&EnvChangeEvent::for_location(root));
        }
    }
}

/// Multiplexes a fresh set of locators per workspace root.
///
/// Roots present at construction are registered silently. Later additions
/// and removals each fire one event scoped to the affected root.
pub struct WorkspaceLocators {
    inner: Arc<Inner>,
    folder_subscription: Mutex<Option<Subscription>>,
}

impl WorkspaceLocators {
    pub fn new(folders: Arc<dyn WorkspaceFolders>, factories: Vec<RootLocatorFactory>) -> Self {
        let inner = Arc::new(Inner {
            factories,
            roots: RwLock::new(Vec::new()),
            watcher: EnvWatcher::new(),
            forwarding: AtomicBool::new(false),
        });
        for root in folders.roots() {
            inner.add_root(&root);
        }

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let subscription = folders.on_did_change(Arc::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_folder_event(event);
            }
        }));

        Self {
            inner,
            folder_subscription: Mutex::new(Some(subscription)),
        }
    }

    /// Currently registered roots
    pub fn roots(&self) -> Vec<PathBuf> {
        self.inner
            .snapshot()
            .iter()
            .map(|entry| entry.root.clone())
            .collect()
    }

    /// The innermost registered root containing `path`
    pub fn root_containing(&self, path: &Path) -> Option<PathBuf> {
        self.roots()
            .into_iter()
            .filter(|root| is_parent_path(path, root))
            .max_by_key(|root| root.components().count())
    }
}

#[async_trait]
impl Locator for WorkspaceLocators {
    fn name(&self) -> &'static str {
        "workspace"
    }

    fn iter_envs(&self, query: &PythonLocatorQuery) -> EnvStream {
        let streams: Vec<EnvStream> = self
            .inner
            .snapshot()
            .into_iter()
            .filter(|entry| query.includes_root(&entry.root))
            .flat_map(|entry| {
                entry
                    .locators
                    .iter()
                    .map(|locator| {
                        let active = Arc::clone(&entry.active);
                        locator
                            .iter_envs(query)
                            .take_while(move |_| future::ready(active.load(Ordering::SeqCst)))
                            .boxed()
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        if streams.is_empty() {
            stream::empty().boxed()
        } else {
            stream::select_all(streams).boxed()
        }
    }

    async fn resolve_env(&self, executable: &Path) -> Option<PythonEnvInfo> {
        for entry in self.inner.snapshot() {
            for locator in &entry.locators {
                if let Some(env) = locator.resolve_env(executable).await {
                    return Some(env);
                }
            }
        }
        None
    }

    fn on_changed(&self, listener: ChangeListener) -> Option<Subscription> {
        let subscription = self.inner.watcher.on_changed(move |event| listener(event));
        if !self.inner.forwarding.swap(true, Ordering::SeqCst) {
            for entry in self.inner.snapshot() {
                entry.forward_changes(&self.inner.watcher);
            }
        }
        Some(subscription)
    }

    fn dispose(&self) {
        self.folder_subscription.lock().take();
        for root in self.roots() {
            self.inner.remove_root(&root);
        }
    }
}
