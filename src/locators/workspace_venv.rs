// Virtual environments inside a workspace root
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::Instrument;

use crate::environment::{EnvKind, EnvSource, PythonEnvInfo};
use crate::events::{EnvChangeEvent, Subscription};
use crate::filesystem::{env_prefix_from_executable, paths_equal};
use crate::locators::folder_scan::{env_from_prefix, envs_in_directory};
use crate::locators::{
    lazy_env_stream, ChangeListener, ChangeNotifier, EnvStream, Locator, LocatorContext,
    PythonLocatorQuery,
};
use crate::logging::utils::locator_span;

/// Finds environments in the children of a root and of `<root>/.direnv`
pub struct WorkspaceVirtualEnvLocator {
    root: PathBuf,
    ctx: LocatorContext,
    notifier: ChangeNotifier,
}

impl WorkspaceVirtualEnvLocator {
    pub fn new(root: impl Into<PathBuf>, ctx: LocatorContext) -> Self {
        Self {
            root: root.into(),
            ctx,
            notifier: ChangeNotifier::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn search_dirs(root: &Path) -> [PathBuf; 2] {
        [root.to_path_buf(), root.join(".direnv")]
    }

    fn watch_pattern() -> &'static str {
        if cfg!(windows) {
            "*/Scripts/python*.exe"
        } else {
            "*/bin/python*"
        }
    }
}

#[async_trait]
impl Locator for WorkspaceVirtualEnvLocator {
    fn name(&self) -> &'static str {
        "workspace-virtual-env"
    }

    fn iter_envs(&self, _query: &PythonLocatorQuery) -> EnvStream {
        let ctx = self.ctx.clone();
        let root = self.root.clone();
        lazy_env_stream(move || {
            async move {
                let mut envs = Vec::new();
                for dir in Self::search_dirs(&root) {
                    envs.extend(
                        envs_in_directory(
                            &ctx,
                            &dir,
                            EnvKind::VirtualEnv,
                            EnvSource::WorkspaceVirtualEnv,
                            Some(&root),
                        )
                        .await,
                    );
                }
                tracing::debug!(root = %root.display(), "Found {} workspace environments", envs.len());
                envs
            }
            .instrument(locator_span("workspace-virtual-env"))
        })
    }

    async fn resolve_env(&self, executable: &Path) -> Option<PythonEnvInfo> {
        let prefix = env_prefix_from_executable(executable)?;
        let parent = prefix.parent()?;
        let in_root = Self::search_dirs(&self.root)
            .iter()
            .any(|dir| paths_equal(dir, parent));
        if !in_root || !self.ctx.fs.is_file(executable).await {
            return None;
        }

        let env = env_from_prefix(
            &self.ctx,
            &prefix,
            executable.to_path_buf(),
            EnvKind::VirtualEnv,
            EnvSource::WorkspaceVirtualEnv,
        )
        .await;
        Some(env.with_search_location(self.root.clone()))
    }

    fn on_changed(&self, listener: ChangeListener) -> Option<Subscription> {
        Some(self.notifier.subscribe(listener, |watcher| {
            Self::search_dirs(&self.root)
                .iter()
                .filter_map(|dir| {
                    self.ctx.watch_for_changes(
                        dir,
                        Self::watch_pattern(),
                        watcher,
                        EnvChangeEvent::for_location(self.root.clone()),
                    )
                })
                .collect()
        }))
    }

    fn dispose(&self) {
        self.notifier.dispose();
    }
}
