// Conda environments reported by `conda info --json`
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn, Instrument};

use crate::environment::classify::{env_name_from_prefix, is_conda_environment};
use crate::environment::{EnvCandidate, EnvKind, EnvSource, PythonEnvInfo};
use crate::events::{EnvChangeEvent, EnvWatcher, Subscription, WatchHandle};
use crate::filesystem::{env_prefix_from_executable, paths_equal};
use crate::locators::folder_scan::version_from_prefix;
use crate::locators::{
    lazy_env_stream, ChangeListener, ChangeNotifier, EnvStream, Locator, LocatorContext,
    PythonLocatorQuery,
};
use crate::logging::utils::locator_span;
use crate::process::ProcessConfig;

/// Organization recorded for conda-provided interpreters
pub const CONDA_ORG: &str = "ContinuumAnalytics";

/// Name given to the base environment
pub const BASE_ENV_NAME: &str = "base";

/// The parts of `conda info --json` discovery reads
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct CondaInfo {
    #[serde(default)]
    pub envs: Vec<PathBuf>,
    #[serde(default)]
    pub default_prefix: Option<PathBuf>,
    #[serde(default)]
    pub root_prefix: Option<PathBuf>,
    #[serde(default)]
    pub envs_dirs: Vec<PathBuf>,
    #[serde(default)]
    pub conda_version: Option<String>,
}

impl CondaInfo {
    pub fn parse(stdout: &str) -> Option<Self> {
        match serde_json::from_str(stdout.trim()) {
            Ok(info) => Some(info),
            Err(e) => {
                warn!("Unexpected output from conda info: {}", e);
                None
            }
        }
    }

    /// Base install prefix
    pub fn base_prefix(&self) -> Option<&Path> {
        self.root_prefix
            .as_deref()
            .or(self.default_prefix.as_deref())
    }

    /// Every environment prefix, base first, without duplicates
    pub fn env_prefixes(&self) -> Vec<PathBuf> {
        let mut prefixes: Vec<PathBuf> = Vec::new();
        let base = self.base_prefix().map(Path::to_path_buf);
        for prefix in base.into_iter().chain(self.envs.iter().cloned()) {
            if !prefixes.iter().any(|p| paths_equal(p, &prefix)) {
                prefixes.push(prefix);
            }
        }
        prefixes
    }
}

/// Interpreter location inside a conda prefix
pub fn conda_interpreter_path(prefix: &Path) -> PathBuf {
    if cfg!(windows) {
        prefix.join("python.exe")
    } else {
        prefix.join("bin").join("python")
    }
}

/// Watches shared between subscribers and enumeration. `envs_dirs` are only
/// known after `conda info` ran, so each enumeration adds the new ones.
#[derive(Default)]
struct CondaWatches {
    notifier: ChangeNotifier,
    watched_envs_dirs: Mutex<Vec<PathBuf>>,
}

impl CondaWatches {
    fn envs_dir_handles(
        &self,
        ctx: &LocatorContext,
        envs_dirs: &[PathBuf],
        watcher: &EnvWatcher,
    ) -> Vec<WatchHandle> {
        let mut watched = self.watched_envs_dirs.lock();
        let mut handles = Vec::new();
        for dir in envs_dirs {
            if watched.iter().any(|w| paths_equal(w, dir)) {
                continue;
            }
            watched.push(dir.clone());
            handles.extend(ctx.watch_for_changes(dir, "*", watcher, conda_change()));
        }
        handles
    }

    fn watch_envs_dirs(&self, ctx: &LocatorContext, envs_dirs: &[PathBuf]) {
        self.notifier
            .extend_watches(|watcher| self.envs_dir_handles(ctx, envs_dirs, watcher));
    }

    fn dispose(&self) {
        self.notifier.dispose();
        self.watched_envs_dirs.lock().clear();
    }
}

fn conda_change() -> EnvChangeEvent {
    EnvChangeEvent::for_kind(Some(EnvKind::Conda))
}

pub struct CondaLocator {
    ctx: LocatorContext,
    configured_path: Option<PathBuf>,
    last_info: Arc<Mutex<Option<CondaInfo>>>,
    watches: Arc<CondaWatches>,
}

impl CondaLocator {
    pub fn new(ctx: LocatorContext, configured_path: Option<PathBuf>) -> Self {
        Self {
            ctx,
            configured_path,
            last_info: Arc::new(Mutex::new(None)),
            watches: Arc::new(CondaWatches::default()),
        }
    }

    fn conventional_installs(ctx: &LocatorContext) -> Vec<PathBuf> {
        let binary = if cfg!(windows) {
            PathBuf::from("Scripts").join("conda.exe")
        } else {
            PathBuf::from("bin").join("conda")
        };

        let mut prefixes = Vec::new();
        if let Some(home) = &ctx.host.home {
            for name in ["anaconda3", "miniconda3", "miniforge3", "mambaforge", "anaconda", "miniconda"] {
                prefixes.push(home.join(name));
            }
        }
        if cfg!(windows) {
            if let Some(program_data) = ctx.host.var("PROGRAMDATA") {
                prefixes.push(PathBuf::from(program_data).join("Anaconda3"));
                prefixes.push(PathBuf::from(program_data).join("Miniconda3"));
            }
        } else {
            prefixes.push(PathBuf::from("/opt/conda"));
            prefixes.push(PathBuf::from("/opt/anaconda3"));
            prefixes.push(PathBuf::from("/opt/miniconda3"));
            prefixes.push(PathBuf::from("/usr/local/anaconda3"));
            prefixes.push(PathBuf::from("/usr/local/miniconda3"));
        }
        prefixes.into_iter().map(|p| p.join(&binary)).collect()
    }

    /// Conda binary: configured path, `CONDA_EXE`, `PATH`, then conventional installs
    pub async fn find_conda(ctx: &LocatorContext, configured: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = configured {
            if ctx.fs.is_file(path).await {
                return Some(path.to_path_buf());
            }
            debug!(path = %path.display(), "Configured conda path does not exist");
        }

        if let Some(conda_exe) = ctx.host.var("CONDA_EXE") {
            let path = PathBuf::from(conda_exe);
            if ctx.fs.is_file(&path).await {
                return Some(path);
            }
        }

        if let Some(path_var) = ctx.host.var("PATH") {
            let cwd = ctx.host.home.clone().unwrap_or_else(|| PathBuf::from("."));
            if let Ok(path) = which::which_in("conda", Some(path_var), cwd) {
                return Some(path);
            }
        }

        for candidate in Self::conventional_installs(ctx) {
            if ctx.fs.is_file(&candidate).await {
                return Some(candidate);
            }
        }
        None
    }

    /// Run `conda info --json`; any failure means "no conda"
    pub async fn conda_info(ctx: &LocatorContext, configured: Option<&Path>) -> Option<CondaInfo> {
        let conda = Self::find_conda(ctx, configured).await?;
        let config = ProcessConfig::new(&conda)
            .with_args(["info", "--json"])
            .with_timeout(ctx.process_timeout);

        match ctx.process.execute(config).await {
            Ok(result) => CondaInfo::parse(&result.stdout()),
            Err(e) => {
                debug!(conda = %conda.display(), "conda info failed: {}", e);
                None
            }
        }
    }

    async fn env_for_prefix(
        ctx: &LocatorContext,
        prefix: &Path,
        base: Option<&Path>,
    ) -> PythonEnvInfo {
        let is_base = base.map(|b| paths_equal(b, prefix)).unwrap_or(false);
        let executable = conda_interpreter_path(prefix);
        let (kind, name) = if is_base {
            (EnvKind::CondaBase, BASE_ENV_NAME.to_string())
        } else {
            (EnvKind::Conda, env_name_from_prefix(prefix))
        };
        let version = version_from_prefix(ctx.fs.as_ref(), prefix, &executable).await;

        PythonEnvInfo::new(executable, kind)
            .with_name(name)
            .with_location(prefix)
            .with_version(version)
            .with_org(CONDA_ORG)
            .with_source(EnvSource::Conda)
    }
}

#[async_trait]
impl Locator for CondaLocator {
    fn name(&self) -> &'static str {
        "conda"
    }

    fn iter_envs(&self, _query: &PythonLocatorQuery) -> EnvStream {
        let ctx = self.ctx.clone();
        let configured = self.configured_path.clone();
        let last_info = Arc::clone(&self.last_info);
        let watches = Arc::clone(&self.watches);
        lazy_env_stream(move || {
            async move {
                let Some(info) = Self::conda_info(&ctx, configured.as_deref()).await else {
                    return Vec::new();
                };

                let base = info.base_prefix().map(Path::to_path_buf);
                let mut envs = Vec::new();
                for prefix in info.env_prefixes() {
                    envs.push(Self::env_for_prefix(&ctx, &prefix, base.as_deref()).await);
                }
                debug!("Found {} conda environments", envs.len());
                let envs_dirs = info.envs_dirs.clone();
                *last_info.lock() = Some(info);
                watches.watch_envs_dirs(&ctx, &envs_dirs);
                envs
            }
            .instrument(locator_span("conda"))
        })
    }

    async fn resolve_env(&self, executable: &Path) -> Option<PythonEnvInfo> {
        let candidate = EnvCandidate::from_executable(executable);
        let kind = is_conda_environment(self.ctx.fs.as_ref(), &candidate).await?;
        let prefix = candidate.prefix.or_else(|| env_prefix_from_executable(executable))?;

        let base = match kind {
            EnvKind::CondaBase => Some(prefix.clone()),
            _ => None,
        };
        let mut env = Self::env_for_prefix(&self.ctx, &prefix, base.as_deref()).await;
        env.executable.filename = executable.to_path_buf();
        Some(env)
    }

    fn on_changed(&self, listener: ChangeListener) -> Option<Subscription> {
        let envs_dirs = self
            .last_info
            .lock()
            .as_ref()
            .map(|info| info.envs_dirs.clone())
            .unwrap_or_default();

        Some(self.watches.notifier.subscribe(listener, |watcher| {
            let mut handles = Vec::new();
            if let Some(home) = &self.ctx.host.home {
                handles.extend(self.ctx.watch_for_changes(
                    &home.join(".conda"),
                    "environments.txt",
                    watcher,
                    conda_change(),
                ));
            }
            handles.extend(self.watches.envs_dir_handles(&self.ctx, &envs_dirs, watcher));
            handles
        }))
    }

    fn dispose(&self) {
        self.watches.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_conda_info() {
        let stdout = r#"{
            "conda_version": "23.7.4",
            "default_prefix": "/home/u/miniconda3",
            "root_prefix": "/home/u/miniconda3",
            "envs": ["/home/u/miniconda3", "/home/u/miniconda3/envs/foo"],
            "envs_dirs": ["/home/u/miniconda3/envs"]
        }"#;
        let info = CondaInfo::parse(stdout).unwrap();

        assert_eq!(info.conda_version.as_deref(), Some("23.7.4"));
        assert_eq!(info.base_prefix(), Some(Path::new("/home/u/miniconda3")));
        assert_eq!(
            info.env_prefixes(),
            vec![
                PathBuf::from("/home/u/miniconda3"),
                PathBuf::from("/home/u/miniconda3/envs/foo")
            ]
        );
    }

    #[test]
    fn test_unexpected_shape_is_rejected() {
        assert!(CondaInfo::parse("not json").is_none());
        assert!(CondaInfo::parse(r#"{"envs": "not-a-list"}"#).is_none());
    }

    #[test]
    fn test_base_only_from_default_prefix() {
        let info = CondaInfo {
            default_prefix: Some(PathBuf::from("/opt/conda")),
            ..CondaInfo::default()
        };
        assert_eq!(info.env_prefixes(), vec![PathBuf::from("/opt/conda")]);
    }
}
