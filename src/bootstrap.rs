// Composition root: wires production collaborators into the discovery pipeline
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::DiscoveryConfig;
use crate::environment::HostEnvironment;
use crate::error::Result;
use crate::events::{FileWatcher, NotifyFileWatcher, Subscription};
use crate::filesystem::{FileSystem, LocalFileSystem};
use crate::legacy::DiscoveryAdapter;
use crate::locators::workspace::FolderListener;
use crate::locators::{
    CompositeLocator, CondaLocator, CurrentPathLocator, GlobalVirtualEnvLocator,
    KnownPathsLocator, Locator, LocatorContext, PyenvLocator, RegExeRegistryReader,
    RegistryReader, RootLocatorFactory, StaticWorkspaceFolders, WindowsRegistryLocator,
    WorkspaceFolderEvent, WorkspaceFolders, WorkspaceLocators, WorkspaceVirtualEnvLocator,
};
use crate::process::{ProcessExecutor, SystemProcessExecutor};
use crate::resolution::{EnvironmentResolver, ResolutionCache};
use crate::storage::{KeyValueStore, SqliteStore};

/// Collaborators the pipeline is built from. Tests substitute fakes.
#[derive(Clone)]
pub struct DiscoveryParts {
    pub fs: Arc<dyn FileSystem>,
    pub process: Arc<dyn ProcessExecutor>,
    pub host: Arc<HostEnvironment>,
    pub store: Arc<dyn KeyValueStore>,
    /// `None` selects `reg query` when the registry locator is enabled
    pub registry: Option<Arc<dyn RegistryReader>>,
    pub file_watcher: Option<Arc<NotifyFileWatcher>>,
}

impl DiscoveryParts {
    /// Real filesystem, processes, process environment and on-disk store
    pub fn production(config: &DiscoveryConfig) -> Result<Self> {
        let store = open_store(config)?;
        let file_watcher = config
            .watch
            .enabled
            .then(|| Arc::new(NotifyFileWatcher::new(config.poll_interval())));

        Ok(Self {
            fs: Arc::new(LocalFileSystem),
            process: Arc::new(SystemProcessExecutor::new(config.resolve_timeout())),
            host: Arc::new(HostEnvironment::from_process()),
            store: Arc::new(store),
            registry: None,
            file_watcher,
        })
    }
}

/// Persistent store in the configured cache directory, falling back to an
/// in-memory database when the directory cannot be used
pub fn open_store(config: &DiscoveryConfig) -> Result<SqliteStore> {
    let opened = match &config.cache_dir {
        Some(dir) => SqliteStore::with_cache_directory(dir.clone()),
        None => SqliteStore::new(),
    };
    match opened {
        Ok(store) => Ok(store),
        Err(e) => {
            warn!("Interpreter cache unavailable, using an in-memory store: {}", e);
            SqliteStore::with_memory_database()
        }
    }
}

/// A fully wired discovery pipeline
pub struct Discovery {
    config: DiscoveryConfig,
    folders: Arc<StaticWorkspaceFolders>,
    workspace: Arc<WorkspaceLocators>,
    composite: Arc<CompositeLocator>,
    adapter: DiscoveryAdapter,
    _native_root_sync: Option<Subscription>,
}

impl Discovery {
    pub fn new(config: DiscoveryConfig, roots: Vec<PathBuf>) -> Result<Self> {
        let parts = DiscoveryParts::production(&config)?;
        Ok(Self::with_parts(config, roots, parts))
    }

    pub fn with_parts(config: DiscoveryConfig, roots: Vec<PathBuf>, parts: DiscoveryParts) -> Self {
        let mut ctx = LocatorContext::new(
            Arc::clone(&parts.fs),
            Arc::clone(&parts.process),
            Arc::clone(&parts.host),
        )
        .with_process_timeout(config.resolve_timeout());
        if let Some(watcher) = &parts.file_watcher {
            ctx = ctx.with_file_watcher(Arc::clone(watcher) as Arc<dyn FileWatcher>);
        }

        let folders = Arc::new(StaticWorkspaceFolders::new(roots));

        // Registered before the workspace locators so native roots are known
        // by the time their watches start
        let native_root_sync = parts.file_watcher.as_ref().map(|watcher| {
            for root in folders.roots() {
                watcher.add_native_root(root);
            }
            let watcher = Arc::clone(watcher);
            let listener: FolderListener = Arc::new(move |event| match event {
                WorkspaceFolderEvent::Added(root) => watcher.add_native_root(root.clone()),
                WorkspaceFolderEvent::Removed(root) => watcher.remove_native_root(root),
            });
            folders.on_did_change(listener)
        });

        let root_ctx = ctx.clone();
        let factory: RootLocatorFactory = Arc::new(move |root: &Path| {
            vec![Arc::new(WorkspaceVirtualEnvLocator::new(root, root_ctx.clone())) as Arc<dyn Locator>]
        });
        let workspace = Arc::new(WorkspaceLocators::new(
            Arc::clone(&folders) as Arc<dyn WorkspaceFolders>,
            vec![factory],
        ));

        let globals = global_locators(&config, &ctx, parts.registry.clone());
        debug!(
            locators = ?globals.iter().map(|l| l.name()).collect::<Vec<_>>(),
            "Configured global locators"
        );

        let cache = ResolutionCache::new(Arc::clone(&parts.store), Arc::clone(&parts.fs))
            .with_expiry(config.cache_expiry());
        let resolver = EnvironmentResolver::new(Arc::clone(&parts.process), Arc::clone(&parts.fs))
            .with_cache(cache)
            .with_timeout(config.resolve_timeout());

        let composite = Arc::new(
            CompositeLocator::new(
                globals,
                Some(Arc::clone(&workspace) as Arc<dyn Locator>),
                Arc::new(resolver),
                Arc::clone(&parts.fs),
            )
            .with_host(Arc::clone(&parts.host)),
        );
        let adapter = DiscoveryAdapter::new(Arc::clone(&composite), Some(Arc::clone(&workspace)));

        Self {
            config,
            folders,
            workspace,
            composite,
            adapter,
            _native_root_sync: native_root_sync,
        }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn folders(&self) -> &StaticWorkspaceFolders {
        &self.folders
    }

    pub fn workspace(&self) -> &Arc<WorkspaceLocators> {
        &self.workspace
    }

    pub fn composite(&self) -> &Arc<CompositeLocator> {
        &self.composite
    }

    pub fn adapter(&self) -> &DiscoveryAdapter {
        &self.adapter
    }

    /// Stop every filesystem watch
    pub fn dispose(&self) {
        self.composite.dispose();
    }
}

fn global_locators(
    config: &DiscoveryConfig,
    ctx: &LocatorContext,
    registry: Option<Arc<dyn RegistryReader>>,
) -> Vec<Arc<dyn Locator>> {
    let mut locators: Vec<Arc<dyn Locator>> = vec![
        Arc::new(CondaLocator::new(ctx.clone(), config.conda_path.clone())),
        Arc::new(GlobalVirtualEnvLocator::new(
            ctx.clone(),
            config.virtual_env_folders(ctx.host.home.as_deref()),
        )),
        Arc::new(PyenvLocator::new(ctx.clone())),
        Arc::new(KnownPathsLocator::new(ctx.clone(), config.search_paths.clone())),
    ];
    if config.include_path {
        locators.push(Arc::new(CurrentPathLocator::new(ctx.clone())));
    }
    if config.include_registry {
        let reader = registry.unwrap_or_else(|| {
            Arc::new(RegExeRegistryReader::new(
                Arc::clone(&ctx.process),
                ctx.process_timeout,
            ))
        });
        locators.push(Arc::new(WindowsRegistryLocator::new(ctx.clone(), reader)));
    }
    locators
}
