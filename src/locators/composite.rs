// Top of the locator pipeline: merges every source, removes duplicates,
// resolves what is missing and remembers the result
use futures::future;
use futures::stream::{self, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn, Instrument};

use crate::environment::{EnvSource, HostEnvironment, PythonEnvInfo};
use crate::error::Result;
use crate::events::{EnvWatcher, Subscription};
use crate::filesystem::{normalize_path_key, paths_equal, FileSystem};
use crate::locators::known_paths::{default_known_dirs, global_env_for_executable};
use crate::locators::{lazy_env_stream, ChangeListener, EnvStream, Locator, PythonLocatorQuery};
use crate::logging::utils::locator_span;
use crate::resolution::EnvironmentResolver;

/// Interpreter resolutions allowed in flight during `get_envs`
pub const DEFAULT_RESOLVE_CONCURRENCY: usize = 8;

/// What `resolve_env` is asked about: a bare path, or a record to complete
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvRef {
    Path(PathBuf),
    Info(Box<PythonEnvInfo>),
}

impl EnvRef {
    pub fn executable(&self) -> &Path {
        match self {
            EnvRef::Path(path) => path,
            EnvRef::Info(info) => info.executable_path(),
        }
    }
}

impl From<PathBuf> for EnvRef {
    fn from(path: PathBuf) -> Self {
        EnvRef::Path(path)
    }
}

impl From<&Path> for EnvRef {
    fn from(path: &Path) -> Self {
        EnvRef::Path(path.to_path_buf())
    }
}

impl From<PythonEnvInfo> for EnvRef {
    fn from(info: PythonEnvInfo) -> Self {
        EnvRef::Info(Box::new(info))
    }
}

/// Combine two records of the same environment.
///
/// The record with the more specific kind wins; on a tie `existing` wins.
/// Empty fields of the winner are filled from the other record, the more
/// complete version is kept and the sources are unioned.
pub fn merge_env_infos(existing: PythonEnvInfo, incoming: PythonEnvInfo) -> PythonEnvInfo {
    let (mut merged, other) = if incoming.kind.specificity() > existing.kind.specificity() {
        (incoming, existing)
    } else {
        (existing, incoming)
    };

    if merged.name.is_empty() {
        merged.name = other.name;
    }
    if merged.location.is_none() {
        merged.location = other.location;
    }
    if merged.search_location.is_none() {
        merged.search_location = other.search_location;
    }
    merged.version = merged.version.more_complete(other.version);
    if merged.arch == crate::environment::Architecture::Unknown {
        merged.arch = other.arch;
    }

    let executable = &mut merged.executable;
    if executable.sys_prefix.is_none() {
        executable.sys_prefix = other.executable.sys_prefix;
    }
    if executable.ctime.is_none() {
        executable.ctime = other.executable.ctime;
    }
    if executable.mtime.is_none() {
        executable.mtime = other.executable.mtime;
    }

    if merged.distro.org.is_none() {
        merged.distro.org = other.distro.org;
    }
    if merged.distro.default_display_name.is_none() {
        merged.distro.default_display_name = other.distro.default_display_name;
    }
    merged.source.extend(other.source);
    merged
}

/// Ordered, deduplicated collection of records. Two records are the same
/// environment when their normalized paths or their real paths match.
#[derive(Default)]
struct EnvSet {
    envs: Vec<PythonEnvInfo>,
    index: HashMap<String, usize>,
}

impl EnvSet {
    fn add(&mut self, env: PythonEnvInfo, real_path: Option<PathBuf>) {
        let mut keys = vec![normalize_path_key(env.executable_path())];
        if let Some(real_path) = real_path {
            keys.push(normalize_path_key(&real_path));
        }

        match keys.iter().find_map(|key| self.index.get(key).copied()) {
            Some(position) => {
                let existing = self.envs[position].clone();
                self.envs[position] = merge_env_infos(existing, env);
                for key in keys {
                    self.index.insert(key, position);
                }
            }
            None => {
                let position = self.envs.len();
                self.envs.push(env);
                for key in keys {
                    self.index.insert(key, position);
                }
            }
        }
    }

    fn into_envs(self) -> Vec<PythonEnvInfo> {
        self.envs
    }
}

pub struct CompositeLocator {
    globals: Vec<Arc<dyn Locator>>,
    workspace: Option<Arc<dyn Locator>>,
    resolver: Arc<EnvironmentResolver>,
    fs: Arc<dyn FileSystem>,
    host: Arc<HostEnvironment>,
    known: RwLock<HashMap<String, PythonEnvInfo>>,
    concurrency: usize,
    watcher: EnvWatcher,
    forwards: Mutex<Option<Vec<Subscription>>>,
}

impl CompositeLocator {
    pub fn new(
        globals: Vec<Arc<dyn Locator>>,
        workspace: Option<Arc<dyn Locator>>,
        resolver: Arc<EnvironmentResolver>,
        fs: Arc<dyn FileSystem>,
    ) -> Self {
        Self {
            globals,
            workspace,
            resolver,
            fs,
            host: Arc::new(HostEnvironment::from_process()),
            known: RwLock::new(HashMap::new()),
            concurrency: DEFAULT_RESOLVE_CONCURRENCY,
            watcher: EnvWatcher::new(),
            forwards: Mutex::new(None),
        }
    }

    pub fn with_host(mut self, host: Arc<HostEnvironment>) -> Self {
        self.host = host;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn resolver(&self) -> &EnvironmentResolver {
        &self.resolver
    }

    fn locators(&self) -> impl Iterator<Item = &Arc<dyn Locator>> {
        self.globals.iter().chain(self.workspace.iter())
    }

    fn streams_for(&self, query: &PythonLocatorQuery) -> Vec<EnvStream> {
        let mut streams = Vec::new();
        if query.includes_non_rooted() {
            streams.extend(self.globals.iter().map(|locator| locator.iter_envs(query)));
        } else {
            debug!("Root-scoped query; skipping global locators");
        }
        if let Some(workspace) = &self.workspace {
            streams.push(workspace.iter_envs(query));
        }
        streams
    }

    /// Merged, deduplicated records from every source. Records whose
    /// executable is gone, records of other roots and records of unwanted
    /// kinds are left out.
    pub fn iter_envs(&self, query: &PythonLocatorQuery) -> EnvStream {
        let streams = self.streams_for(query);
        let fs = Arc::clone(&self.fs);
        let query = query.clone();

        lazy_env_stream(move || {
            async move {
                let mut merged = stream::select_all(streams);
                let mut set = EnvSet::default();
                let mut dropped = 0usize;

                while let Some(env) = merged.next().await {
                    if !query.matches_kind(env.kind) || !in_scope(&query, &env) {
                        continue;
                    }
                    if !fs.is_file(env.executable_path()).await {
                        dropped += 1;
                        continue;
                    }
                    let real_path = fs.real_path(env.executable_path()).await;
                    set.add(env, real_path);
                }

                let envs = set.into_envs();
                debug!(dropped, "Merged {} environments", envs.len());
                envs
            }
            .instrument(locator_span("composite"))
        })
    }

    /// Drain `iter_envs`, resolve records that are still incomplete and
    /// remember the outcome. Records that fail to resolve are dropped.
    pub async fn get_envs(&self, query: &PythonLocatorQuery) -> Vec<PythonEnvInfo> {
        let discovered: Vec<PythonEnvInfo> = self.iter_envs(query).collect().await;

        let resolver = Arc::clone(&self.resolver);
        let envs: Vec<PythonEnvInfo> = stream::iter(discovered)
            .map(|env| {
                let resolver = Arc::clone(&resolver);
                async move {
                    if env.is_resolved() {
                        return Some(env);
                    }
                    let executable = env.executable.filename.clone();
                    match resolver.resolve_env(env).await {
                        Ok(resolved) => resolved,
                        Err(e) => {
                            warn!(executable = %executable.display(), "Dropping environment: {}", e);
                            None
                        }
                    }
                }
            })
            .buffered(self.concurrency)
            .filter_map(future::ready)
            .collect()
            .await;

        {
            let mut known = self.known.write();
            if query == &PythonLocatorQuery::all() {
                known.clear();
            }
            for env in &envs {
                known.insert(normalize_path_key(env.executable_path()), env.clone());
            }
        }
        envs
    }

    /// Records remembered from earlier `get_envs` and `resolve_env` calls
    pub fn known_envs(&self) -> Vec<PythonEnvInfo> {
        self.known.read().values().cloned().collect()
    }

    /// Fully resolved record for one interpreter.
    ///
    /// Looks in the known set, then asks each locator, then classifies the bare
    /// path. `Ok(None)` when the path is not a runnable interpreter; a query
    /// timeout is returned as an error.
    pub async fn resolve_env(&self, env_ref: impl Into<EnvRef>) -> Result<Option<PythonEnvInfo>> {
        let env_ref = env_ref.into();
        let executable = env_ref.executable().to_path_buf();
        if !self.fs.is_file(&executable).await {
            return Ok(None);
        }

        let key = normalize_path_key(&executable);
        let known = self.known.read().get(&key).cloned();
        if let Some(env) = known.filter(PythonEnvInfo::is_resolved) {
            return Ok(Some(env));
        }

        let candidate = match env_ref {
            EnvRef::Info(info) => *info,
            EnvRef::Path(_) => self.identify(&executable).await,
        };

        let resolved = self.resolver.resolve_env(candidate).await?;
        if let Some(env) = &resolved {
            self.known.write().insert(key, env.clone());
        }
        Ok(resolved)
    }

    async fn identify(&self, executable: &Path) -> PythonEnvInfo {
        for locator in self.locators() {
            if let Some(env) = locator.resolve_env(executable).await {
                debug!(locator = locator.name(), "Locator recognized executable");
                return env;
            }
        }
        global_env_for_executable(
            self.fs.as_ref(),
            &self.host,
            executable.to_path_buf(),
            &default_known_dirs(),
            EnvSource::Other,
        )
        .await
    }

    /// Subscribe to changes reported by any locator
    pub fn on_changed(&self, listener: ChangeListener) -> Subscription {
        let subscription = self.watcher.on_changed(move |event| listener(event));
        let mut forwards = self.forwards.lock();
        if forwards.is_none() {
            let subscriptions = self
                .locators()
                .filter_map(|locator| {
                    let watcher = self.watcher.clone();
                    locator.on_changed(Arc::new(move |event| watcher.fire(event)))
                })
                .collect();
            *forwards = Some(subscriptions);
        }
        subscription
    }

    pub fn dispose(&self) {
        self.forwards.lock().take();
        for locator in self.locators() {
            locator.dispose();
        }
    }
}

fn in_scope(query: &PythonLocatorQuery, env: &PythonEnvInfo) -> bool {
    if !query.is_root_scoped() {
        return true;
    }
    match &env.search_location {
        Some(location) => query.roots().iter().any(|root| paths_equal(root, location)),
        None => query.includes_non_rooted(),
    }
}
