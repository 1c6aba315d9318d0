// Adapter from discovery records to the interpreter shape older consumers expect
use futures::{FutureExt, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, Instrument};

use crate::environment::{Architecture, EnvKind, EnvSource, PythonEnvInfo};
use crate::error::Result;
use crate::events::{Emitter, Subscription};
use crate::filesystem::normalize_path_key;
use crate::locators::{CompositeLocator, PythonLocatorQuery, WorkspaceLocators};
use crate::logging::utils::refresh_span;

/// Interpreter categories of the legacy model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum InterpreterType {
    Unknown,
    Conda,
    VirtualEnv,
    Pipenv,
    Pyenv,
    Venv,
    WindowsStore,
    Global,
    System,
}

impl From<EnvKind> for InterpreterType {
    fn from(kind: EnvKind) -> Self {
        match kind {
            EnvKind::Conda | EnvKind::CondaBase => InterpreterType::Conda,
            EnvKind::VirtualEnv | EnvKind::VirtualEnvWrapper | EnvKind::OtherVirtual => {
                InterpreterType::VirtualEnv
            }
            EnvKind::Pipenv => InterpreterType::Pipenv,
            EnvKind::Pyenv => InterpreterType::Pyenv,
            EnvKind::Venv => InterpreterType::Venv,
            EnvKind::WindowsStore => InterpreterType::WindowsStore,
            EnvKind::System | EnvKind::MacDefault => InterpreterType::System,
            EnvKind::OtherGlobal => InterpreterType::Global,
            EnvKind::Unknown | EnvKind::Custom => InterpreterType::Unknown,
        }
    }
}

impl fmt::Display for InterpreterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Legacy interpreter record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PythonInterpreter {
    pub path: PathBuf,
    pub version: Option<String>,
    pub sys_version: Option<String>,
    pub sys_prefix: Option<PathBuf>,
    pub architecture: Architecture,
    pub env_type: InterpreterType,
    pub env_name: Option<String>,
    pub env_path: Option<PathBuf>,
    pub company_display_name: Option<String>,
    pub display_name: String,
    pub cached_entry: bool,
}

impl PythonInterpreter {
    pub fn from_env(env: &PythonEnvInfo, cached_entry: bool) -> Self {
        Self {
            path: env.executable.filename.clone(),
            version: (!env.version.is_unknown()).then(|| env.version.to_string()),
            sys_version: env.version.sys_version.clone(),
            sys_prefix: env.executable.sys_prefix.clone(),
            architecture: env.arch,
            env_type: env.kind.into(),
            env_name: (!env.name.is_empty()).then(|| env.name.clone()),
            env_path: env.location.clone(),
            company_display_name: env.distro.org.clone(),
            display_name: env.display_name(),
            cached_entry,
        }
    }
}

/// Progress of a `get_interpreters` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Refreshing,
    Refreshed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetInterpretersOptions {
    /// Return what is already known without running discovery
    pub only_when_cached: bool,
}

pub struct DiscoveryAdapter {
    composite: Arc<CompositeLocator>,
    workspace: Option<Arc<WorkspaceLocators>>,
    refresh: Emitter<RefreshState>,
}

impl DiscoveryAdapter {
    pub fn new(composite: Arc<CompositeLocator>, workspace: Option<Arc<WorkspaceLocators>>) -> Self {
        Self {
            composite,
            workspace,
            refresh: Emitter::new(),
        }
    }

    pub fn on_refresh_state<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&RefreshState) + Send + Sync + 'static,
    {
        self.refresh.on_changed(listener)
    }

    fn query_for(&self, resource: Option<&Path>) -> PythonLocatorQuery {
        let root = resource.and_then(|resource| {
            self.workspace
                .as_ref()
                .and_then(|workspace| workspace.root_containing(resource))
        });
        match root {
            Some(root) => PythonLocatorQuery::for_roots(vec![root], true),
            None => PythonLocatorQuery::all(),
        }
    }

    /// Run discovery and convert the result.
    ///
    /// `Refreshed` always follows `Refreshing`, even when discovery fails; a
    /// failure yields an empty list.
    pub async fn get_interpreters(
        &self,
        resource: Option<&Path>,
        options: GetInterpretersOptions,
        source_filter: Option<&[EnvSource]>,
    ) -> Vec<PythonInterpreter> {
        self.refresh.fire(&RefreshState::Refreshing);

        let previously_known: HashSet<String> = self
            .composite
            .known_envs()
            .iter()
            .map(|env| normalize_path_key(env.executable_path()))
            .collect();

        let envs = if options.only_when_cached {
            self.composite.known_envs()
        } else {
            let query = self.query_for(resource);
            let root = query.roots().first().cloned();
            let discovery = AssertUnwindSafe(self.composite.get_envs(&query))
                .catch_unwind()
                .instrument(refresh_span(root.as_deref()));
            match discovery.await {
                Ok(envs) => envs,
                Err(_) => {
                    error!("Interpreter discovery panicked; reporting no interpreters");
                    Vec::new()
                }
            }
        };

        let interpreters: Vec<PythonInterpreter> = envs
            .iter()
            .filter(|env| match source_filter {
                Some(sources) => sources.iter().any(|source| env.source.contains(source)),
                None => true,
            })
            .map(|env| {
                let cached = previously_known.contains(&normalize_path_key(env.executable_path()));
                PythonInterpreter::from_env(env, cached)
            })
            .collect();

        info!("Found {} interpreters", interpreters.len());
        self.refresh.fire(&RefreshState::Refreshed);
        interpreters
    }

    /// Resolve a single interpreter; timeouts surface as errors
    pub async fn get_interpreter_details(&self, path: &Path) -> Result<Option<PythonInterpreter>> {
        let cached = self
            .composite
            .known_envs()
            .iter()
            .any(|env| normalize_path_key(env.executable_path()) == normalize_path_key(path));
        Ok(self
            .composite
            .resolve_env(path)
            .await?
            .map(|env| PythonInterpreter::from_env(&env, cached)))
    }

    /// True once any interpreter is known or discoverable
    pub async fn has_interpreters(&self) -> bool {
        if !self.composite.known_envs().is_empty() {
            return true;
        }
        self.composite
            .iter_envs(&PythonLocatorQuery::all())
            .next()
            .await
            .is_some()
    }
}
