// Directory scanning shared by the folder-based locators
use std::path::{Path, PathBuf};

use crate::environment::{
    classify_environment, EnvCandidate, EnvKind, EnvSource, PythonEnvInfo, PythonVersion,
};
use crate::filesystem::{interpreter_candidates_in, is_python_executable_path, FileSystem};
use crate::locators::LocatorContext;

/// First interpreter that exists inside an environment prefix
pub async fn find_interpreter_in(fs: &dyn FileSystem, prefix: &Path) -> Option<PathBuf> {
    for candidate in interpreter_candidates_in(prefix) {
        if fs.is_file(&candidate).await {
            return Some(candidate);
        }
    }
    None
}

/// Python executables directly inside a binary directory, in listing order
pub async fn python_executables_in(fs: &dyn FileSystem, dir: &Path) -> Vec<PathBuf> {
    let mut executables = Vec::new();
    for entry in fs.list_dir(dir).await {
        if is_python_executable_path(&entry) && fs.is_file(&entry).await {
            executables.push(entry);
        }
    }
    executables
}

/// Best version hint available without running the interpreter
pub async fn version_from_prefix(
    fs: &dyn FileSystem,
    prefix: &Path,
    executable: &Path,
) -> PythonVersion {
    if let Some(cfg) = fs.read_to_string(&prefix.join("pyvenv.cfg")).await {
        if let Some(version) = PythonVersion::from_pyvenv_cfg(&cfg) {
            return version;
        }
    }

    for entry in fs.list_dir(&prefix.join("conda-meta")).await {
        let parsed = entry
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(PythonVersion::from_conda_meta_filename);
        if let Some(version) = parsed {
            return version;
        }
    }

    executable
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(PythonVersion::from_executable_name)
        .unwrap_or_else(PythonVersion::unknown)
}

/// Build a record for an environment folder
pub async fn env_from_prefix(
    ctx: &LocatorContext,
    prefix: &Path,
    executable: PathBuf,
    fallback: EnvKind,
    source: EnvSource,
) -> PythonEnvInfo {
    let candidate = EnvCandidate {
        executable: executable.clone(),
        prefix: Some(prefix.to_path_buf()),
    };
    let kind = classify_environment(ctx.fs.as_ref(), &ctx.host, &candidate, fallback).await;
    let version = version_from_prefix(ctx.fs.as_ref(), prefix, &executable).await;
    let name = prefix
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    PythonEnvInfo::new(executable, kind)
        .with_name(name)
        .with_location(prefix)
        .with_version(version)
        .with_source(source)
}

/// Environments found in the immediate children of `dir`
pub async fn envs_in_directory(
    ctx: &LocatorContext,
    dir: &Path,
    fallback: EnvKind,
    source: EnvSource,
    search_location: Option<&Path>,
) -> Vec<PythonEnvInfo> {
    let mut envs = Vec::new();
    for prefix in ctx.fs.list_dir(dir).await {
        if !ctx.fs.is_dir(&prefix).await {
            continue;
        }
        let Some(executable) = find_interpreter_in(ctx.fs.as_ref(), &prefix).await else {
            continue;
        };

        let mut env = env_from_prefix(ctx, &prefix, executable, fallback, source).await;
        if let Some(search_location) = search_location {
            env.search_location = Some(search_location.to_path_buf());
        }
        envs.push(env);
    }
    envs
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::environment::HostEnvironment;
    use crate::filesystem::LocalFileSystem;
    use crate::process::SystemProcessExecutor;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn context() -> LocatorContext {
        LocatorContext::new(
            Arc::new(LocalFileSystem),
            Arc::new(SystemProcessExecutor::default()),
            Arc::new(HostEnvironment::default()),
        )
    }

    #[tokio::test]
    async fn test_envs_in_directory_skips_folders_without_interpreter() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("env/bin")).unwrap();
        fs::write(temp.path().join("env/bin/python"), "").unwrap();
        fs::write(temp.path().join("env/pyvenv.cfg"), "version = 3.12.1\n").unwrap();
        fs::create_dir_all(temp.path().join("docs")).unwrap();
        fs::write(temp.path().join("README.md"), "").unwrap();

        let envs = envs_in_directory(
            &context(),
            temp.path(),
            EnvKind::VirtualEnv,
            EnvSource::GlobalVirtualEnv,
            None,
        )
        .await;

        assert_eq!(envs.len(), 1);
        assert_eq!(envs[0].name, "env");
        assert_eq!(envs[0].kind, EnvKind::Venv);
        assert_eq!(envs[0].version, PythonVersion::new(3, 12, 1));
        assert!(envs[0].source.contains(&EnvSource::GlobalVirtualEnv));
    }

    #[tokio::test]
    async fn test_python_executables_in() {
        let temp = TempDir::new().unwrap();
        for name in ["python3", "python3.11", "python3-config", "pip"] {
            fs::write(temp.path().join(name), "").unwrap();
        }

        let mut found = python_executables_in(&LocalFileSystem, temp.path()).await;
        found.sort();
        assert_eq!(
            found,
            vec![temp.path().join("python3"), temp.path().join("python3.11")]
        );
    }
}
