// Interpreters reachable through the PATH environment variable
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, Instrument};

use crate::environment::{EnvSource, PythonEnvInfo};
use crate::filesystem::{is_python_executable_path, paths_equal};
use crate::locators::folder_scan::python_executables_in;
use crate::locators::known_paths::{default_known_dirs, global_env_for_executable};
use crate::locators::{lazy_env_stream, EnvStream, Locator, LocatorContext, PythonLocatorQuery};
use crate::logging::utils::locator_span;

pub struct CurrentPathLocator {
    ctx: LocatorContext,
}

impl CurrentPathLocator {
    pub fn new(ctx: LocatorContext) -> Self {
        Self { ctx }
    }

    /// `PATH` entries in order, without duplicates
    pub fn path_dirs(&self) -> Vec<PathBuf> {
        let Some(path_var) = self.ctx.host.var("PATH") else {
            return Vec::new();
        };
        let mut dirs: Vec<PathBuf> = Vec::new();
        for dir in std::env::split_paths(path_var) {
            if dir.as_os_str().is_empty() || dirs.iter().any(|d| paths_equal(d, &dir)) {
                continue;
            }
            dirs.push(dir);
        }
        dirs
    }
}

#[async_trait]
impl Locator for CurrentPathLocator {
    fn name(&self) -> &'static str {
        "current-path"
    }

    fn iter_envs(&self, _query: &PythonLocatorQuery) -> EnvStream {
        let ctx = self.ctx.clone();
        let dirs = self.path_dirs();
        lazy_env_stream(move || {
            async move {
                let known_dirs = default_known_dirs();
                let mut envs = Vec::new();
                for dir in &dirs {
                    for executable in python_executables_in(ctx.fs.as_ref(), dir).await {
                        envs.push(
                            global_env_for_executable(
                                ctx.fs.as_ref(),
                                &ctx.host,
                                executable,
                                &known_dirs,
                                EnvSource::PathEnvVar,
                            )
                            .await,
                        );
                    }
                }
                debug!("Found {} interpreters on PATH", envs.len());
                envs
            }
            .instrument(locator_span("current-path"))
        })
    }

    async fn resolve_env(&self, executable: &Path) -> Option<PythonEnvInfo> {
        let parent = executable.parent()?;
        if !is_python_executable_path(executable)
            || !self.path_dirs().iter().any(|d| paths_equal(d, parent))
            || !self.ctx.fs.is_file(executable).await
        {
            return None;
        }
        Some(
            global_env_for_executable(
                self.ctx.fs.as_ref(),
                &self.ctx.host,
                executable.to_path_buf(),
                &default_known_dirs(),
                EnvSource::PathEnvVar,
            )
            .await,
        )
    }
}
