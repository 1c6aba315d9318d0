// End-to-end discovery tests over real directory trees with a fake process executor

#![cfg(unix)]


use chrono::{Duration as ChronoDuration, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use pyscout::environment::{
    Architecture, EnvKind, EnvSource, InterpreterInformation, PythonVersion,
};
use pyscout::events::EnvChangeEvent;
use pyscout::filesystem::{FileSystem, LocalFileSystem};
use pyscout::legacy::{DiscoveryAdapter, GetInterpretersOptions, RefreshState};
use pyscout::locators::windows_registry::RegistryHive;
use pyscout::locators::{
    CompositeLocator, CondaLocator, GlobalVirtualEnvLocator, Locator, LocatorContext,
    PythonLocatorQuery, RootLocatorFactory, StaticWorkspaceFolders, WindowsRegistryLocator,
    WorkspaceFolders, WorkspaceLocators, WorkspaceVirtualEnvLocator,
};
use pyscout::resolution::{EnvironmentResolver, ResolutionCache};
use pyscout::storage::{KeyValueStore, SqliteStore};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use test_utils::{
    context, make_conda_prefix, make_venv, FakeExecutor, FakeRegistry, RecordingFileWatcher,
};

struct Harness {
    ctx: LocatorContext,
    folders: Arc<StaticWorkspaceFolders>,
    workspace: Arc<WorkspaceLocators>,
    composite: Arc<CompositeLocator>,
}

fn harness(
    process: Arc<FakeExecutor>,
    home: &Path,
    roots: Vec<PathBuf>,
    global_folders: Vec<PathBuf>,
) -> Harness {
    let ctx = context(Arc::clone(&process), home);
    let folders = Arc::new(StaticWorkspaceFolders::new(roots));

    let root_ctx = ctx.clone();
    let factory: RootLocatorFactory = Arc::new(move |root: &Path| {
        vec![Arc::new(WorkspaceVirtualEnvLocator::new(root, root_ctx.clone())) as Arc<dyn Locator>]
    });
    let workspace = Arc::new(WorkspaceLocators::new(
        Arc::clone(&folders) as Arc<dyn WorkspaceFolders>,
        vec![factory],
    ));

    let globals: Vec<Arc<dyn Locator>> = if global_folders.is_empty() {
        Vec::new()
    } else {
        vec![Arc::new(GlobalVirtualEnvLocator::new(ctx.clone(), global_folders))]
    };

    let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem);
    let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::with_memory_database().unwrap());
    let resolver = EnvironmentResolver::new(process, Arc::clone(&fs))
        .with_cache(ResolutionCache::new(store, Arc::clone(&fs)));
    let composite = Arc::new(
        CompositeLocator::new(
            globals,
            Some(Arc::clone(&workspace) as Arc<dyn Locator>),
            Arc::new(resolver),
            fs,
        )
        .with_host(Arc::clone(&ctx.host)),
    );

    Harness {
        ctx,
        folders,
        workspace,
        composite,
    }
}

async fn executables(composite: &CompositeLocator, query: &PythonLocatorQuery) -> BTreeSet<PathBuf> {
    composite
        .iter_envs(query)
        .map(|env| env.executable.filename)
        .collect()
        .await
}

#[tokio::test]
async fn test_empty_workspace_root_yields_nothing() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("proj");
    fs::create_dir_all(root.join("src")).unwrap();
    let h = harness(FakeExecutor::new(), temp.path(), vec![root], Vec::new());

    let envs: Vec<_> = h.workspace.iter_envs(&PythonLocatorQuery::all()).collect().await;
    assert!(envs.is_empty());
}

#[tokio::test]
async fn test_workspace_dot_venv_is_classified_venv() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("proj");
    let executable = make_venv(&root, ".venv", "3.11.4");
    let h = harness(FakeExecutor::new(), temp.path(), vec![root.clone()], Vec::new());

    let envs: Vec<_> = h
        .composite
        .iter_envs(&PythonLocatorQuery::for_roots(vec![root.clone()], false))
        .collect()
        .await;

    assert_eq!(envs.len(), 1);
    let env = &envs[0];
    assert_eq!(env.kind, EnvKind::Venv);
    assert_eq!(env.name, ".venv");
    assert_eq!(env.location.as_deref(), Some(root.join(".venv").as_path()));
    assert_eq!(env.search_location.as_deref(), Some(root.as_path()));
    assert_eq!(env.executable.filename, executable);
    assert!(env.source.contains(&EnvSource::WorkspaceVirtualEnv));
    assert_eq!(env.version, PythonVersion::new(3, 11, 4));
}

#[tokio::test]
async fn test_conda_envs_from_conda_info() {
    let temp = TempDir::new().unwrap();
    let base = temp.path().join("miniconda3");
    let foo = base.join("envs").join("foo");
    make_conda_prefix(&base, true);
    make_conda_prefix(&foo, false);
    let conda = base.join("bin").join("conda");

    let process = FakeExecutor::new();
    process.add_stdout(
        &conda,
        serde_json::json!({
            "envs": [foo],
            "default_prefix": base,
            "envs_dirs": [base.join("envs")],
            "conda_version": "23.7.4",
        })
        .to_string(),
    );
    let locator = CondaLocator::new(context(Arc::clone(&process), temp.path()), Some(conda.clone()));

    let envs: Vec<_> = locator.iter_envs(&PythonLocatorQuery::all()).collect().await;
    assert_eq!(envs.len(), 2);

    let base_env = envs.iter().find(|e| e.kind == EnvKind::CondaBase).unwrap();
    assert_eq!(base_env.executable.filename, base.join("bin").join("python"));
    assert_eq!(base_env.name, "base");

    let foo_env = envs.iter().find(|e| e.kind == EnvKind::Conda).unwrap();
    assert_eq!(foo_env.executable.filename, foo.join("bin").join("python"));
    assert_eq!(foo_env.name, "foo");
    assert_eq!(foo_env.version.minor, Some(10));
    assert_eq!(foo_env.distro.org.as_deref(), Some("ContinuumAnalytics"));
    assert_eq!(process.calls_for(&conda), 1);
}

#[tokio::test]
async fn test_conda_subscription_before_listing_watches_envs_dirs() {
    let temp = TempDir::new().unwrap();
    let base = temp.path().join("miniconda3");
    let envs_dir = base.join("envs");
    make_conda_prefix(&base, true);
    let conda = base.join("bin").join("conda");

    let process = FakeExecutor::new();
    process.add_stdout(
        &conda,
        serde_json::json!({
            "envs": [],
            "default_prefix": base,
            "envs_dirs": [envs_dir],
        })
        .to_string(),
    );
    let watcher = RecordingFileWatcher::new();
    let ctx = context(Arc::clone(&process), temp.path())
        .with_file_watcher(Arc::clone(&watcher) as Arc<dyn pyscout::events::FileWatcher>);
    let locator = CondaLocator::new(ctx, Some(conda.clone()));

    let events = Arc::new(Mutex::new(Vec::<EnvChangeEvent>::new()));
    let sink = Arc::clone(&events);
    let _subscription = locator
        .on_changed(Arc::new(move |event: &EnvChangeEvent| sink.lock().push(event.clone())))
        .unwrap();
    assert_eq!(watcher.watched_dirs(), vec![temp.path().join(".conda")]);

    let _: Vec<_> = locator.iter_envs(&PythonLocatorQuery::all()).collect().await;
    let _: Vec<_> = locator.iter_envs(&PythonLocatorQuery::all()).collect().await;
    let watched = watcher.watched_dirs();
    assert_eq!(watched.iter().filter(|d| **d == envs_dir).count(), 1);

    watcher.create(&envs_dir, "newenv");
    let events = events.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, Some(EnvKind::Conda));
}

#[tokio::test]
async fn test_conda_unexpected_output_is_treated_as_missing() {
    let temp = TempDir::new().unwrap();
    let base = temp.path().join("miniconda3");
    make_conda_prefix(&base, true);
    let conda = base.join("bin").join("conda");

    let process = FakeExecutor::new();
    process.add_stdout(&conda, r#"{"envs": "not-a-list"}"#);
    let locator = CondaLocator::new(context(Arc::clone(&process), temp.path()), Some(conda.clone()));
    let envs: Vec<_> = locator.iter_envs(&PythonLocatorQuery::all()).collect().await;
    assert!(envs.is_empty());

    process.add_failure(&conda);
    let envs: Vec<_> = locator.iter_envs(&PythonLocatorQuery::all()).collect().await;
    assert!(envs.is_empty());
}

fn cached_info(executable: &Path, prefix: &Path) -> InterpreterInformation {
    InterpreterInformation {
        executable: executable.to_path_buf(),
        sys_prefix: prefix.to_path_buf(),
        version: PythonVersion::new(3, 11, 4).with_sys_version("3.11.4 (cached)"),
        arch: Architecture::X64,
    }
}

#[tokio::test]
async fn test_fresh_cache_entry_skips_process_execution() {
    let temp = TempDir::new().unwrap();
    let executable = make_venv(temp.path(), "env", "3.11.4");
    let prefix = temp.path().join("env");
    let process = FakeExecutor::new();
    let h = harness(Arc::clone(&process), temp.path(), Vec::new(), Vec::new());

    let cache = h.composite.resolver().cache().unwrap();
    cache
        .insert_at(&executable, &cached_info(&executable, &prefix), Utc::now() - ChronoDuration::hours(1))
        .await
        .unwrap();

    let env = h.composite.resolve_env(executable.as_path()).await.unwrap().unwrap();
    assert_eq!(process.total_calls(), 0);
    assert_eq!(env.version.sys_version.as_deref(), Some("3.11.4 (cached)"));
    assert_eq!(env.executable.sys_prefix.as_deref(), Some(prefix.as_path()));
}

#[tokio::test]
async fn test_expired_cache_entry_runs_interpreter_and_overwrites() {
    let temp = TempDir::new().unwrap();
    let executable = make_venv(temp.path(), "env", "3.11.4");
    let prefix = temp.path().join("env");
    let process = FakeExecutor::new();
    process.add_interpreter(&executable, "3.11.9", &prefix);
    let h = harness(Arc::clone(&process), temp.path(), Vec::new(), Vec::new());

    let cache = h.composite.resolver().cache().unwrap();
    cache
        .insert_at(&executable, &cached_info(&executable, &prefix), Utc::now() - ChronoDuration::hours(25))
        .await
        .unwrap();

    let env = h.composite.resolve_env(executable.as_path()).await.unwrap().unwrap();
    assert_eq!(process.calls_for(&executable), 1);
    assert_eq!(env.version.micro, Some(9));

    let refreshed = cache.get(&executable).await.unwrap();
    assert_eq!(refreshed.version.micro, Some(9));
}

#[tokio::test]
async fn test_added_root_is_discovered_and_removed_root_is_not() {
    let temp = TempDir::new().unwrap();
    let proj = temp.path().join("proj");
    let proj2 = temp.path().join("proj2");
    let first = make_venv(&proj, ".venv", "3.11.4");
    let second = make_venv(&proj2, "env", "3.12.1");
    let h = harness(FakeExecutor::new(), temp.path(), vec![proj.clone()], Vec::new());
    let query = PythonLocatorQuery::all();

    let before = executables(&h.composite, &query).await;
    assert_eq!(before, BTreeSet::from([first.clone()]));

    assert!(h.folders.add_root(proj2.clone()));
    let added = executables(&h.composite, &query).await;
    assert_eq!(added, BTreeSet::from([first.clone(), second.clone()]));

    assert!(h.folders.remove_root(&proj2));
    let after = executables(&h.composite, &query).await;
    assert_eq!(after, before);
}

#[tokio::test]
async fn test_root_changes_fire_events_for_the_root() {
    let temp = TempDir::new().unwrap();
    let proj2 = temp.path().join("proj2");
    fs::create_dir_all(&proj2).unwrap();
    let h = harness(FakeExecutor::new(), temp.path(), Vec::new(), Vec::new());

    let events: Arc<Mutex<Vec<EnvChangeEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let _subscription = h
        .composite
        .on_changed(Arc::new(move |event: &EnvChangeEvent| sink.lock().push(event.clone())));

    h.folders.add_root(proj2.clone());
    h.folders.remove_root(&proj2);

    let events = events.lock();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|event| event.is_in(&proj2)));
}

#[tokio::test]
async fn test_iteration_is_repeatable() {
    let temp = TempDir::new().unwrap();
    let globals = temp.path().join("envs");
    make_venv(&globals, "one", "3.10.2");
    make_venv(&globals, "two", "3.12.1");
    let proj = temp.path().join("proj");
    make_venv(&proj, ".venv", "3.11.4");
    let h = harness(FakeExecutor::new(), temp.path(), vec![proj], vec![globals]);

    let query = PythonLocatorQuery::all();
    let first = executables(&h.composite, &query).await;
    let second = executables(&h.composite, &query).await;
    assert_eq!(first.len(), 3);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_same_interpreter_from_two_sources_is_reported_once() {
    let temp = TempDir::new().unwrap();
    let shared = temp.path().join("shared");
    let executable = make_venv(&shared, "env", "3.11.4");
    std::os::unix::fs::symlink(shared.join("env"), shared.join("env-link")).unwrap();

    // `shared` is both a global venv folder and a workspace root
    let h = harness(
        FakeExecutor::new(),
        temp.path(),
        vec![shared.clone()],
        vec![shared.clone()],
    );

    let envs: Vec<_> = h.composite.iter_envs(&PythonLocatorQuery::all()).collect().await;
    assert_eq!(envs.len(), 1, "{envs:#?}");
    let env = &envs[0];
    assert!(env.source.contains(&EnvSource::GlobalVirtualEnv));
    assert!(env.source.contains(&EnvSource::WorkspaceVirtualEnv));
    assert!(
        env.executable.filename == executable
            || env.executable.filename == shared.join("env-link").join("bin").join("python")
    );
}

#[tokio::test]
async fn test_root_scoped_query_only_sees_that_root() {
    let temp = TempDir::new().unwrap();
    let a = temp.path().join("a");
    let b = temp.path().join("b");
    let in_a = make_venv(&a, ".venv", "3.11.4");
    make_venv(&b, ".venv", "3.11.4");
    let globals = temp.path().join("envs");
    make_venv(&globals, "tools", "3.12.1");
    let h = harness(FakeExecutor::new(), temp.path(), vec![a.clone(), b], vec![globals]);

    let envs: Vec<_> = h
        .composite
        .iter_envs(&PythonLocatorQuery::for_roots(vec![a.clone()], false))
        .collect()
        .await;
    assert_eq!(envs.len(), 1);
    assert_eq!(envs[0].executable.filename, in_a);
    assert!(envs
        .iter()
        .all(|env| env.search_location.as_deref() == Some(a.as_path())));

    let with_globals: Vec<_> = h
        .composite
        .iter_envs(&PythonLocatorQuery::for_roots(vec![a.clone()], true))
        .collect()
        .await;
    assert_eq!(with_globals.len(), 2);
    assert!(with_globals.iter().all(|env| env
        .search_location
        .as_deref()
        .map_or(true, |location| location == a.as_path())));
}

#[tokio::test]
async fn test_resolution_runs_each_interpreter_once() {
    let temp = TempDir::new().unwrap();
    let proj = temp.path().join("proj");
    let executable = make_venv(&proj, ".venv", "3.11.4");
    let process = FakeExecutor::new();
    process.add_interpreter(&executable, "3.11.4", &proj.join(".venv"));
    let h = harness(Arc::clone(&process), temp.path(), vec![proj], Vec::new());

    let envs = h.composite.get_envs(&PythonLocatorQuery::all()).await;
    assert_eq!(envs.len(), 1);
    assert!(envs[0].is_resolved());
    assert_eq!(envs[0].arch, Architecture::X64);

    let again = h.composite.get_envs(&PythonLocatorQuery::all()).await;
    assert_eq!(again.len(), 1);
    assert_eq!(process.calls_for(&executable), 1);
}

#[tokio::test]
async fn test_timeout_is_an_error_for_one_interpreter_only() {
    let temp = TempDir::new().unwrap();
    let proj = temp.path().join("proj");
    let slow = make_venv(&proj, "slow", "3.11.4");
    let fast = make_venv(&proj, "fast", "3.12.1");
    let process = FakeExecutor::new();
    process.add_timeout(&slow);
    process.add_interpreter(&fast, "3.12.1", &proj.join("fast"));
    let h = harness(Arc::clone(&process), temp.path(), vec![proj], Vec::new());

    let envs = h.composite.get_envs(&PythonLocatorQuery::all()).await;
    assert_eq!(envs.len(), 1);
    assert_eq!(envs[0].executable.filename, fast);

    let err = h.composite.resolve_env(slow.as_path()).await.unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test]
async fn test_missing_interpreter_resolves_to_none() {
    let temp = TempDir::new().unwrap();
    let h = harness(FakeExecutor::new(), temp.path(), Vec::new(), Vec::new());
    let resolved = h
        .composite
        .resolve_env(temp.path().join("nope").join("bin").join("python"))
        .await
        .unwrap();
    assert!(resolved.is_none());
}

#[tokio::test]
async fn test_registry_denied_hive_is_skipped() {
    let temp = TempDir::new().unwrap();
    let registry = FakeRegistry::default()
        .with_install(RegistryHive::LocalMachine, "PythonCore", "3.10", r"C:\Python310", "3.10.11")
        .with_install(
            RegistryHive::CurrentUser,
            "PythonCore",
            "3.12",
            r"C:\Users\u\AppData\Local\Programs\Python\Python312",
            "3.12.1",
        )
        .deny(RegistryHive::LocalMachine);

    let h = harness(FakeExecutor::new(), temp.path(), Vec::new(), Vec::new());
    let locator = WindowsRegistryLocator::new(h.ctx.clone(), Arc::new(registry));

    let envs: Vec<_> = locator.iter_envs(&PythonLocatorQuery::all()).collect().await;
    assert_eq!(envs.len(), 1);
    let env = &envs[0];
    assert_eq!(
        env.executable.filename,
        PathBuf::from(r"C:\Users\u\AppData\Local\Programs\Python\Python312").join("python.exe")
    );
    assert_eq!(env.version, PythonVersion::new(3, 12, 1));
    assert_eq!(env.arch, Architecture::X64);
    assert_eq!(env.kind, EnvKind::OtherGlobal);
    assert!(env.source.contains(&EnvSource::WindowsRegistry));
}

#[tokio::test]
async fn test_adapter_reports_refresh_and_cached_entries() {
    let temp = TempDir::new().unwrap();
    let proj = temp.path().join("proj");
    let executable = make_venv(&proj, ".venv", "3.11.4");
    let process = FakeExecutor::new();
    process.add_interpreter(&executable, "3.11.4", &proj.join(".venv"));
    let h = harness(Arc::clone(&process), temp.path(), vec![proj.clone()], Vec::new());
    let adapter = DiscoveryAdapter::new(Arc::clone(&h.composite), Some(Arc::clone(&h.workspace)));

    let states: Arc<Mutex<Vec<RefreshState>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&states);
    let _subscription = adapter.on_refresh_state(move |state| sink.lock().push(*state));

    let resource = proj.join("src").join("main.py");
    let first = adapter
        .get_interpreters(Some(&resource), GetInterpretersOptions::default(), None)
        .await;
    assert_eq!(first.len(), 1);
    assert!(!first[0].cached_entry);
    assert_eq!(first[0].env_name.as_deref(), Some(".venv"));

    let second = adapter
        .get_interpreters(None, GetInterpretersOptions::default(), None)
        .await;
    assert!(second[0].cached_entry);

    let filtered = adapter
        .get_interpreters(None, GetInterpretersOptions::default(), Some(&[EnvSource::Conda]))
        .await;
    assert!(filtered.is_empty());

    let cached_only = adapter
        .get_interpreters(None, GetInterpretersOptions { only_when_cached: true }, None)
        .await;
    assert_eq!(cached_only.len(), 1);

    assert_eq!(
        *states.lock(),
        vec![
            RefreshState::Refreshing,
            RefreshState::Refreshed,
            RefreshState::Refreshing,
            RefreshState::Refreshed,
            RefreshState::Refreshing,
            RefreshState::Refreshed,
            RefreshState::Refreshing,
            RefreshState::Refreshed,
        ]
    );
    assert!(adapter.has_interpreters().await);

    let details = adapter.get_interpreter_details(&executable).await.unwrap().unwrap();
    assert!(details.cached_entry);
    assert_eq!(process.calls_for(&executable), 1);
}

#[tokio::test]
async fn test_host_environment_drives_virtualenvwrapper_kind() {
    let temp = TempDir::new().unwrap();
    let workon = temp.path().join(".virtualenvs");
    let executable = make_venv(&workon, "wrapped", "3.11.4");
    fs::remove_file(workon.join("wrapped").join("pyvenv.cfg")).unwrap();
    fs::write(workon.join("wrapped").join("bin").join("activate"), "").unwrap();

    let h = harness(FakeExecutor::new(), temp.path(), Vec::new(), Vec::new());
    let locator = GlobalVirtualEnvLocator::new(h.ctx.clone(), Vec::new());

    let envs: Vec<_> = locator.iter_envs(&PythonLocatorQuery::all()).collect().await;
    let env = envs
        .iter()
        .find(|env| env.executable.filename == executable)
        .unwrap();
    assert_eq!(env.kind, EnvKind::VirtualEnvWrapper);
}
