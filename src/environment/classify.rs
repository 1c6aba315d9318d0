// Environment kind detection from on-disk layout.
//
// Each predicate looks at one candidate and either claims it or passes. They
// run in a fixed order and the first claim wins, so an environment matching
// several layouts gets the most specific kind.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::trace;

use crate::environment::info::EnvKind;
use crate::filesystem::{
    env_prefix_from_executable, is_parent_path, normalize_path_key, scripts_dir_name, FileSystem,
};

/// An interpreter path and the environment prefix it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvCandidate {
    pub executable: PathBuf,
    pub prefix: Option<PathBuf>,
}

impl EnvCandidate {
    pub fn from_executable(executable: impl Into<PathBuf>) -> Self {
        let executable = executable.into();
        let prefix = env_prefix_from_executable(&executable);
        Self { executable, prefix }
    }
}

/// Snapshot of the user-level locations the predicates depend on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostEnvironment {
    pub home: Option<PathBuf>,
    pub vars: HashMap<String, String>,
}

impl HostEnvironment {
    /// Capture the current process environment
    pub fn from_process() -> Self {
        Self {
            home: dirs::home_dir(),
            vars: std::env::vars().collect(),
        }
    }

    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    /// `PYENV_ROOT`, else `~/.pyenv` (`~/.pyenv/pyenv-win` on Windows)
    pub fn pyenv_root(&self) -> Option<PathBuf> {
        if let Some(root) = self.var("PYENV_ROOT") {
            return Some(PathBuf::from(root));
        }
        let home = self.home.as_ref()?;
        if cfg!(windows) {
            Some(home.join(".pyenv").join("pyenv-win"))
        } else {
            Some(home.join(".pyenv"))
        }
    }

    /// `WORKON_HOME`, else `~/.virtualenvs` (`~/Envs` on Windows)
    pub fn workon_home(&self) -> Option<PathBuf> {
        if let Some(workon) = self.var("WORKON_HOME") {
            return Some(PathBuf::from(workon));
        }
        let home = self.home.as_ref()?;
        if cfg!(windows) {
            Some(home.join("Envs"))
        } else {
            Some(home.join(".virtualenvs"))
        }
    }
}

/// Conda environments carry a `conda-meta` directory. The base install also
/// ships the conda entry points.
pub async fn is_conda_environment(fs: &dyn FileSystem, candidate: &EnvCandidate) -> Option<EnvKind> {
    let prefix = candidate.prefix.as_deref()?;
    if !fs.is_dir(&prefix.join("conda-meta")).await {
        return None;
    }

    let base_markers = [
        prefix.join("condabin"),
        prefix.join("bin").join("conda"),
        prefix.join("Scripts").join("conda.exe"),
    ];
    for marker in &base_markers {
        if fs.exists(marker).await {
            return Some(EnvKind::CondaBase);
        }
    }
    Some(EnvKind::Conda)
}

/// Store installs live under `%LOCALAPPDATA%\Microsoft\WindowsApps`
pub fn is_windows_store_environment(candidate: &EnvCandidate) -> Option<EnvKind> {
    let key = normalize_path_key(&candidate.executable).to_lowercase();
    let is_store =
        key.contains("microsoft\\windowsapps") || key.contains("microsoft/windowsapps");
    is_store.then_some(EnvKind::WindowsStore)
}

/// Pipenv environments either record their project in `.project`, or are a
/// `.venv` folder next to a `Pipfile`
pub async fn is_pipenv_environment(
    fs: &dyn FileSystem,
    host: &HostEnvironment,
    candidate: &EnvCandidate,
) -> Option<EnvKind> {
    let prefix = candidate.prefix.as_deref()?;
    let pipfile_name = host.var("PIPENV_PIPFILE").unwrap_or("Pipfile");

    if let Some(project) = fs.read_to_string(&prefix.join(".project")).await {
        let project = PathBuf::from(project.trim());
        if !project.as_os_str().is_empty() && fs.exists(&project.join(pipfile_name)).await {
            return Some(EnvKind::Pipenv);
        }
    }

    let is_dot_venv = prefix.file_name().map(|n| n == ".venv").unwrap_or(false);
    if is_dot_venv {
        if let Some(project) = prefix.parent() {
            if fs.exists(&project.join(pipfile_name)).await {
                return Some(EnvKind::Pipenv);
            }
        }
    }
    None
}

/// Interpreters installed by pyenv sit under `<pyenv root>/versions`
pub fn is_pyenv_environment(host: &HostEnvironment, candidate: &EnvCandidate) -> Option<EnvKind> {
    let versions = host.pyenv_root()?.join("versions");
    is_parent_path(&candidate.executable, &versions).then_some(EnvKind::Pyenv)
}

/// `python -m venv` writes `pyvenv.cfg` at the prefix root
pub async fn is_venv_environment(fs: &dyn FileSystem, candidate: &EnvCandidate) -> Option<EnvKind> {
    let prefix = candidate.prefix.as_deref()?;
    fs.exists(&prefix.join("pyvenv.cfg"))
        .await
        .then_some(EnvKind::Venv)
}

/// A virtualenv living under the virtualenvwrapper home
pub async fn is_virtualenvwrapper_environment(
    fs: &dyn FileSystem,
    host: &HostEnvironment,
    candidate: &EnvCandidate,
) -> Option<EnvKind> {
    let prefix = candidate.prefix.as_deref()?;
    let workon_home = host.workon_home()?;
    if !is_parent_path(prefix, &workon_home) {
        return None;
    }
    is_virtualenv_environment(fs, candidate)
        .await
        .map(|_| EnvKind::VirtualEnvWrapper)
}

// `activate`, `activate.fish`, `activate.ps1`... but not unrelated tools such
// as Debian's `activate-global-python-argcomplete` in /usr/bin
static ACTIVATE_SCRIPT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^activate(\.[a-z0-9]+)?$").expect("activate script regex is valid")
});

/// virtualenv drops `activate` scripts next to the interpreter
pub async fn is_virtualenv_environment(
    fs: &dyn FileSystem,
    candidate: &EnvCandidate,
) -> Option<EnvKind> {
    let prefix = candidate.prefix.as_deref()?;
    let scripts = prefix.join(scripts_dir_name());
    let has_activate = fs.list_dir(&scripts).await.iter().any(|entry| {
        entry
            .file_name()
            .map(|n| ACTIVATE_SCRIPT.is_match(&n.to_string_lossy()))
            .unwrap_or(false)
    });
    has_activate.then_some(EnvKind::VirtualEnv)
}

/// Run the predicate chain; `None` when no layout matched
pub async fn identify_environment(
    fs: &dyn FileSystem,
    host: &HostEnvironment,
    candidate: &EnvCandidate,
) -> Option<EnvKind> {
    let kind = if let Some(kind) = is_conda_environment(fs, candidate).await {
        Some(kind)
    } else if let Some(kind) = is_windows_store_environment(candidate) {
        Some(kind)
    } else if let Some(kind) = is_pipenv_environment(fs, host, candidate).await {
        Some(kind)
    } else if let Some(kind) = is_pyenv_environment(host, candidate) {
        Some(kind)
    } else if let Some(kind) = is_venv_environment(fs, candidate).await {
        Some(kind)
    } else if let Some(kind) = is_virtualenvwrapper_environment(fs, host, candidate).await {
        Some(kind)
    } else {
        is_virtualenv_environment(fs, candidate).await
    };

    trace!(
        executable = %candidate.executable.display(),
        kind = ?kind,
        "Classified environment"
    );
    kind
}

/// Classify, falling back to `fallback` when nothing matched
pub async fn classify_environment(
    fs: &dyn FileSystem,
    host: &HostEnvironment,
    candidate: &EnvCandidate,
    fallback: EnvKind,
) -> EnvKind {
    identify_environment(fs, host, candidate)
        .await
        .unwrap_or(fallback)
}

/// Folder name used as the environment name for prefix-based environments
pub fn env_name_from_prefix(prefix: &Path) -> String {
    prefix
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::filesystem::LocalFileSystem;
    use std::fs;
    use tempfile::TempDir;

    fn make_env(root: &Path, name: &str, markers: &[&str]) -> EnvCandidate {
        let prefix = root.join(name);
        fs::create_dir_all(prefix.join("bin")).unwrap();
        fs::write(prefix.join("bin").join("python"), "").unwrap();
        for marker in markers {
            let path = prefix.join(marker);
            if marker.ends_with('/') {
                fs::create_dir_all(&path).unwrap();
            } else {
                fs::create_dir_all(path.parent().unwrap()).unwrap();
                fs::write(&path, "").unwrap();
            }
        }
        EnvCandidate::from_executable(prefix.join("bin").join("python"))
    }

    #[tokio::test]
    async fn test_venv_layout() {
        let temp = TempDir::new().unwrap();
        let candidate = make_env(temp.path(), ".venv", &["pyvenv.cfg", "bin/activate"]);
        let host = HostEnvironment::default();

        assert_eq!(
            identify_environment(&LocalFileSystem, &host, &candidate).await,
            Some(EnvKind::Venv)
        );
    }

    #[tokio::test]
    async fn test_conda_beats_venv() {
        let temp = TempDir::new().unwrap();
        let env = make_env(temp.path(), "env", &["conda-meta/", "pyvenv.cfg"]);
        let base = make_env(temp.path(), "miniconda3", &["conda-meta/", "condabin/"]);
        let host = HostEnvironment::default();

        assert_eq!(
            identify_environment(&LocalFileSystem, &host, &env).await,
            Some(EnvKind::Conda)
        );
        assert_eq!(
            identify_environment(&LocalFileSystem, &host, &base).await,
            Some(EnvKind::CondaBase)
        );
    }

    #[tokio::test]
    async fn test_pipenv_beats_venv() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("Pipfile"), "").unwrap();
        let candidate = make_env(temp.path(), ".venv", &["pyvenv.cfg"]);

        assert_eq!(
            identify_environment(&LocalFileSystem, &HostEnvironment::default(), &candidate).await,
            Some(EnvKind::Pipenv)
        );
    }

    #[tokio::test]
    async fn test_pipenv_project_file() {
        let temp = TempDir::new().unwrap();
        let project = temp.path().join("project");
        fs::create_dir_all(&project).unwrap();
        fs::write(project.join("Pipfile"), "").unwrap();
        let candidate = make_env(temp.path(), "project-AbCd1234", &["bin/activate"]);
        fs::write(
            candidate.prefix.as_ref().unwrap().join(".project"),
            project.to_string_lossy().as_bytes(),
        )
        .unwrap();

        assert_eq!(
            identify_environment(&LocalFileSystem, &HostEnvironment::default(), &candidate).await,
            Some(EnvKind::Pipenv)
        );
    }

    #[tokio::test]
    async fn test_pyenv_and_wrapper_homes() {
        let temp = TempDir::new().unwrap();
        let host = HostEnvironment::default()
            .with_var("PYENV_ROOT", temp.path().join("pyenv").to_string_lossy())
            .with_var("WORKON_HOME", temp.path().join("workon").to_string_lossy());

        let pyenv = make_env(&temp.path().join("pyenv/versions"), "3.11.4", &[]);
        let wrapped = make_env(&temp.path().join("workon"), "proj", &["bin/activate"]);
        let plain = make_env(temp.path(), "plain", &["bin/activate.fish"]);

        assert_eq!(
            identify_environment(&LocalFileSystem, &host, &pyenv).await,
            Some(EnvKind::Pyenv)
        );
        assert_eq!(
            identify_environment(&LocalFileSystem, &host, &wrapped).await,
            Some(EnvKind::VirtualEnvWrapper)
        );
        assert_eq!(
            identify_environment(&LocalFileSystem, &host, &plain).await,
            Some(EnvKind::VirtualEnv)
        );
    }

    #[tokio::test]
    async fn test_argcomplete_helper_is_not_a_virtualenv() {
        let temp = TempDir::new().unwrap();
        let candidate = make_env(
            temp.path(),
            "usr",
            &["bin/activate-global-python-argcomplete", "bin/python3"],
        );
        let host = HostEnvironment::default();

        assert_eq!(is_virtualenv_environment(&LocalFileSystem, &candidate).await, None);
        assert_eq!(
            identify_environment(&LocalFileSystem, &host, &candidate).await,
            None
        );
        assert_eq!(
            classify_environment(&LocalFileSystem, &host, &candidate, EnvKind::System).await,
            EnvKind::System
        );
    }

    #[tokio::test]
    async fn test_activate_script_variants() {
        let temp = TempDir::new().unwrap();
        for (name, script) in [
            ("bash", "bin/activate"),
            ("fish", "bin/activate.fish"),
            ("ps", "bin/Activate.ps1"),
        ] {
            let candidate = make_env(temp.path(), name, &[script]);
            assert_eq!(
                is_virtualenv_environment(&LocalFileSystem, &candidate).await,
                Some(EnvKind::VirtualEnv),
                "{script}"
            );
        }
    }

    #[tokio::test]
    async fn test_unmatched_uses_fallback() {
        let candidate = EnvCandidate::from_executable("/usr/bin/python3");
        let host = HostEnvironment::default();

        assert_eq!(
            classify_environment(&LocalFileSystem, &host, &candidate, EnvKind::System).await,
            EnvKind::System
        );
    }

    #[test]
    fn test_windows_store_path() {
        let candidate = EnvCandidate::from_executable(
            "/Users/u/AppData/Local/Microsoft/WindowsApps/python3.exe",
        );
        assert_eq!(
            is_windows_store_environment(&candidate),
            Some(EnvKind::WindowsStore)
        );
    }
}
