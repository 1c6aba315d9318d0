// Virtual environments in the well-known per-user folders
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, Instrument};

use crate::environment::{EnvKind, EnvSource, PythonEnvInfo};
use crate::events::{EnvChangeEvent, Subscription};
use crate::filesystem::{env_prefix_from_executable, paths_equal};
use crate::locators::folder_scan::{env_from_prefix, envs_in_directory};
use crate::locators::{
    lazy_env_stream, ChangeListener, ChangeNotifier, EnvStream, Locator, LocatorContext,
    PythonLocatorQuery,
};
use crate::logging::utils::locator_span;

/// Scans `WORKON_HOME`, `~/.virtualenvs`, `~/Envs`, `~/.venvs`, `~/.direnv`,
/// the pipenv home and any configured folders
pub struct GlobalVirtualEnvLocator {
    ctx: LocatorContext,
    extra_folders: Vec<PathBuf>,
    notifier: ChangeNotifier,
}

impl GlobalVirtualEnvLocator {
    pub fn new(ctx: LocatorContext, extra_folders: Vec<PathBuf>) -> Self {
        Self {
            ctx,
            extra_folders,
            notifier: ChangeNotifier::new(),
        }
    }

    /// Folders scanned, without duplicates, in priority order
    pub fn folders(&self) -> Vec<PathBuf> {
        let host = &self.ctx.host;
        let mut folders: Vec<PathBuf> = Vec::new();

        if let Some(workon) = host.var("WORKON_HOME") {
            folders.push(PathBuf::from(workon));
        }
        if let Some(home) = &host.home {
            folders.push(home.join(".virtualenvs"));
            folders.push(home.join("Envs"));
            folders.push(home.join(".venvs"));
            folders.push(home.join(".direnv"));
            folders.push(home.join(".local").join("share").join("virtualenvs"));
        }
        folders.extend(self.extra_folders.iter().cloned());

        let mut unique: Vec<PathBuf> = Vec::new();
        for folder in folders {
            if !unique.iter().any(|f| paths_equal(f, &folder)) {
                unique.push(folder);
            }
        }
        unique
    }
}

#[async_trait]
impl Locator for GlobalVirtualEnvLocator {
    fn name(&self) -> &'static str {
        "global-virtual-env"
    }

    fn iter_envs(&self, _query: &PythonLocatorQuery) -> EnvStream {
        let ctx = self.ctx.clone();
        let folders = self.folders();
        lazy_env_stream(move || {
            async move {
                let mut envs = Vec::new();
                for folder in &folders {
                    envs.extend(
                        envs_in_directory(
                            &ctx,
                            folder,
                            EnvKind::VirtualEnv,
                            EnvSource::GlobalVirtualEnv,
                            None,
                        )
                        .await,
                    );
                }
                debug!("Found {} global virtual environments", envs.len());
                envs
            }
            .instrument(locator_span("global-virtual-env"))
        })
    }

    async fn resolve_env(&self, executable: &Path) -> Option<PythonEnvInfo> {
        let prefix = env_prefix_from_executable(executable)?;
        let parent = prefix.parent()?;
        if !self.folders().iter().any(|f| paths_equal(f, parent)) {
            return None;
        }
        if !self.ctx.fs.is_file(executable).await {
            return None;
        }

        Some(
            env_from_prefix(
                &self.ctx,
                &prefix,
                executable.to_path_buf(),
                EnvKind::VirtualEnv,
                EnvSource::GlobalVirtualEnv,
            )
            .await,
        )
    }

    fn on_changed(&self, listener: ChangeListener) -> Option<Subscription> {
        let pattern = if cfg!(windows) {
            "*/Scripts/python*.exe"
        } else {
            "*/bin/python*"
        };
        Some(self.notifier.subscribe(listener, |watcher| {
            self.folders()
                .iter()
                .filter_map(|folder| {
                    self.ctx
                        .watch_for_changes(folder, pattern, watcher, EnvChangeEvent::default())
                })
                .collect()
        }))
    }

    fn dispose(&self) {
        self.notifier.dispose();
    }
}
