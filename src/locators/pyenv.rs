// Interpreters installed by pyenv
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, Instrument};

use crate::environment::classify::is_conda_environment;
use crate::environment::{EnvCandidate, EnvKind, EnvSource, PythonEnvInfo, PythonVersion};
use crate::events::{EnvChangeEvent, Subscription};
use crate::filesystem::{env_prefix_from_executable, paths_equal};
use crate::locators::folder_scan::{find_interpreter_in, version_from_prefix};
use crate::locators::{
    lazy_env_stream, ChangeListener, ChangeNotifier, EnvStream, Locator, LocatorContext,
    PythonLocatorQuery,
};
use crate::logging::utils::locator_span;

pub struct PyenvLocator {
    ctx: LocatorContext,
    notifier: ChangeNotifier,
}

impl PyenvLocator {
    pub fn new(ctx: LocatorContext) -> Self {
        Self {
            ctx,
            notifier: ChangeNotifier::new(),
        }
    }

    fn versions_dir(&self) -> Option<PathBuf> {
        self.ctx.host.pyenv_root().map(|root| root.join("versions"))
    }

    async fn env_for_version_dir(ctx: &LocatorContext, prefix: &Path) -> Option<PythonEnvInfo> {
        let executable = find_interpreter_in(ctx.fs.as_ref(), prefix).await?;
        let dir_name = prefix.file_name()?.to_string_lossy().to_string();

        let candidate = EnvCandidate {
            executable: executable.clone(),
            prefix: Some(prefix.to_path_buf()),
        };
        // Conda distributions installed through pyenv keep their conda identity
        let kind = is_conda_environment(ctx.fs.as_ref(), &candidate)
            .await
            .unwrap_or(EnvKind::Pyenv);

        let version = match PythonVersion::parse(&dir_name) {
            Some(version) if dir_name.starts_with(|c: char| c.is_ascii_digit()) => version,
            _ => version_from_prefix(ctx.fs.as_ref(), prefix, &executable).await,
        };

        Some(
            PythonEnvInfo::new(executable, kind)
                .with_name(dir_name)
                .with_location(prefix)
                .with_version(version)
                .with_source(EnvSource::Pyenv),
        )
    }
}

#[async_trait]
impl Locator for PyenvLocator {
    fn name(&self) -> &'static str {
        "pyenv"
    }

    fn iter_envs(&self, _query: &PythonLocatorQuery) -> EnvStream {
        let ctx = self.ctx.clone();
        let versions_dir = self.versions_dir();
        lazy_env_stream(move || {
            async move {
                let Some(versions_dir) = versions_dir else {
                    return Vec::new();
                };
                let mut envs = Vec::new();
                for prefix in ctx.fs.list_dir(&versions_dir).await {
                    if let Some(env) = Self::env_for_version_dir(&ctx, &prefix).await {
                        envs.push(env);
                    }
                }
                debug!("Found {} pyenv installs", envs.len());
                envs
            }
            .instrument(locator_span("pyenv"))
        })
    }

    async fn resolve_env(&self, executable: &Path) -> Option<PythonEnvInfo> {
        let versions_dir = self.versions_dir()?;
        let prefix = env_prefix_from_executable(executable)?;
        if !paths_equal(prefix.parent()?, &versions_dir) {
            return None;
        }
        let mut env = Self::env_for_version_dir(&self.ctx, &prefix).await?;
        env.executable.filename = executable.to_path_buf();
        Some(env)
    }

    fn on_changed(&self, listener: ChangeListener) -> Option<Subscription> {
        let versions_dir = self.versions_dir();
        Some(self.notifier.subscribe(listener, |watcher| {
            versions_dir
                .and_then(|dir| {
                    self.ctx.watch_for_changes(
                        &dir,
                        "*",
                        watcher,
                        EnvChangeEvent::for_kind(Some(EnvKind::Pyenv)),
                    )
                })
                .into_iter()
                .collect()
        }))
    }

    fn dispose(&self) {
        self.notifier.dispose();
    }
}
