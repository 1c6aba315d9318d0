// Interpreters in conventional system binary directories
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, Instrument};

use crate::environment::{
    identify_environment, EnvCandidate, EnvKind, EnvSource, HostEnvironment, PythonEnvInfo,
    PythonVersion,
};
use crate::filesystem::{is_parent_path, is_python_executable_path, paths_equal, FileSystem};
use crate::locators::folder_scan::python_executables_in;
use crate::locators::{lazy_env_stream, EnvStream, Locator, LocatorContext, PythonLocatorQuery};
use crate::logging::utils::locator_span;

/// Conventional directories holding system interpreters
pub fn default_known_dirs() -> Vec<PathBuf> {
    if cfg!(windows) {
        Vec::new()
    } else {
        ["/usr/local/bin", "/usr/bin", "/bin", "/opt/homebrew/bin", "/opt/local/bin"]
            .iter()
            .map(PathBuf::from)
            .collect()
    }
}

/// Kind for an interpreter that no environment layout claimed
pub fn global_kind_for(executable: &Path, known_dirs: &[PathBuf]) -> EnvKind {
    let in_known_dir = executable
        .parent()
        .map(|dir| known_dirs.iter().any(|known| paths_equal(known, dir)))
        .unwrap_or(false);

    if cfg!(target_os = "macos") && is_parent_path(executable, Path::new("/usr/bin")) {
        EnvKind::MacDefault
    } else if in_known_dir {
        EnvKind::System
    } else {
        EnvKind::OtherGlobal
    }
}

/// Build a record for a bare interpreter found in a binary directory
pub(crate) async fn global_env_for_executable(
    fs: &dyn FileSystem,
    host: &HostEnvironment,
    executable: PathBuf,
    known_dirs: &[PathBuf],
    source: EnvSource,
) -> PythonEnvInfo {
    let candidate = EnvCandidate::from_executable(executable.clone());
    let kind = match identify_environment(fs, host, &candidate).await {
        Some(kind) => kind,
        None => global_kind_for(&executable, known_dirs),
    };
    let version = executable
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(PythonVersion::from_executable_name)
        .unwrap_or_else(PythonVersion::unknown);

    let mut env = PythonEnvInfo::new(executable, kind)
        .with_version(version)
        .with_source(source);
    if kind.is_virtual() {
        if let Some(prefix) = candidate.prefix {
            env.name = prefix
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            env.location = Some(prefix);
        }
    }
    env
}

pub struct KnownPathsLocator {
    ctx: LocatorContext,
    dirs: Vec<PathBuf>,
}

impl KnownPathsLocator {
    pub fn new(ctx: LocatorContext, extra_dirs: Vec<PathBuf>) -> Self {
        let mut dirs = default_known_dirs();
        for dir in extra_dirs {
            if !dirs.iter().any(|d| paths_equal(d, &dir)) {
                dirs.push(dir);
            }
        }
        Self { ctx, dirs }
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }
}

#[async_trait]
impl Locator for KnownPathsLocator {
    fn name(&self) -> &'static str {
        "known-paths"
    }

    fn iter_envs(&self, _query: &PythonLocatorQuery) -> EnvStream {
        let ctx = self.ctx.clone();
        let dirs = self.dirs.clone();
        lazy_env_stream(move || {
            async move {
                let mut envs = Vec::new();
                for dir in &dirs {
                    for executable in python_executables_in(ctx.fs.as_ref(), dir).await {
                        envs.push(
                            global_env_for_executable(
                                ctx.fs.as_ref(),
                                &ctx.host,
                                executable,
                                &dirs,
                                EnvSource::KnownPath,
                            )
                            .await,
                        );
                    }
                }
                debug!("Found {} interpreters in known paths", envs.len());
                envs
            }
            .instrument(locator_span("known-paths"))
        })
    }

    async fn resolve_env(&self, executable: &Path) -> Option<PythonEnvInfo> {
        let parent = executable.parent()?;
        if !is_python_executable_path(executable)
            || !self.dirs.iter().any(|d| paths_equal(d, parent))
            || !self.ctx.fs.is_file(executable).await
        {
            return None;
        }
        Some(
            global_env_for_executable(
                self.ctx.fs.as_ref(),
                &self.ctx.host,
                executable.to_path_buf(),
                &self.dirs,
                EnvSource::KnownPath,
            )
            .await,
        )
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::filesystem::LocalFileSystem;
    use crate::process::SystemProcessExecutor;
    use futures::StreamExt;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_global_kind_for() {
        let known = vec![PathBuf::from("/opt/bin")];
        assert_eq!(global_kind_for(Path::new("/opt/bin/python3"), &known), EnvKind::System);
        assert_eq!(
            global_kind_for(Path::new("/srv/tools/python3"), &known),
            EnvKind::OtherGlobal
        );
    }

    #[tokio::test]
    async fn test_extra_dir_is_scanned() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("python3.12"), "").unwrap();
        fs::write(temp.path().join("pydoc3"), "").unwrap();

        let ctx = LocatorContext::new(
            Arc::new(LocalFileSystem),
            Arc::new(SystemProcessExecutor::default()),
            Arc::new(HostEnvironment::default()),
        );
        let locator = KnownPathsLocator::new(ctx, vec![temp.path().to_path_buf()]);

        let envs: Vec<_> = locator
            .iter_envs(&PythonLocatorQuery::all())
            .filter(|e| futures::future::ready(e.executable.filename.starts_with(temp.path())))
            .collect()
            .await;

        assert_eq!(envs.len(), 1);
        assert_eq!(envs[0].kind, EnvKind::System);
        assert_eq!(envs[0].version.minor, Some(12));
        assert!(envs[0].source.contains(&EnvSource::KnownPath));
    }
}
