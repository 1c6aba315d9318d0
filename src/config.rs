// Configuration handling for pyscout
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{ConfigError, Result, ScoutError};

/// File looked up in the user config directory when no path is given
pub const CONFIG_FILE_NAME: &str = "pyscout.yaml";

/// Overrides the cache directory
pub const HOME_ENV_VAR: &str = "PYSCOUT_HOME";

/// Overrides `conda_path`
pub const CONDA_PATH_ENV_VAR: &str = "PYSCOUT_CONDA_PATH";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchConfig {
    pub enabled: bool,
    pub poll_interval_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoveryConfig {
    /// Explicit conda binary
    pub conda_path: Option<PathBuf>,
    /// Folder whose children are virtual environments
    pub venv_path: Option<PathBuf>,
    /// Folders of virtual environments, relative to the home directory
    pub venv_folders: Vec<PathBuf>,
    /// Extra binary directories scanned like the known system paths
    pub search_paths: Vec<PathBuf>,
    pub resolve_timeout_secs: u64,
    pub cache_expiry_hours: u64,
    pub include_registry: bool,
    pub include_path: bool,
    pub watch: WatchConfig,
    pub cache_dir: Option<PathBuf>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            conda_path: None,
            venv_path: None,
            venv_folders: Vec::new(),
            search_paths: Vec::new(),
            resolve_timeout_secs: 15,
            cache_expiry_hours: 24,
            include_registry: cfg!(windows),
            include_path: true,
            watch: WatchConfig::default(),
            cache_dir: None,
        }
    }
}

impl DiscoveryConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ScoutError::Config(Box::new(ConfigError::NotFound {
                path: path.to_path_buf(),
                suggestion: Some(format!(
                    "Create {} or omit --config to use the defaults",
                    path.display()
                )),
            })));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            ScoutError::Config(Box::new(ConfigError::IOError {
                message: e.to_string(),
                path: Some(path.to_path_buf()),
            }))
        })?;
        Self::from_yaml_with_context(&content, Some(path))
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::from_yaml_with_context(yaml, None)
    }

    fn from_yaml_with_context(yaml: &str, file_path: Option<&Path>) -> Result<Self> {
        // An empty document means "all defaults"
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: DiscoveryConfig = serde_yaml::from_str(yaml).map_err(|e| {
            let mut config_error = *Box::<ConfigError>::from(e);
            if let ConfigError::InvalidYaml {
                file_path: ref mut path,
                ..
            } = config_error
            {
                *path = file_path.map(Path::to_path_buf);
            }
            ScoutError::Config(Box::new(config_error))
        })?;

        config.validate(file_path)?;
        Ok(config)
    }

    /// Load the explicit file, else the user config file when present, else
    /// defaults; environment overrides are applied last
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_config_path().filter(|p| p.is_file()) {
                Some(path) => {
                    debug!(path = %path.display(), "Loading user configuration");
                    Self::from_file(&path)?
                }
                None => Self::default(),
            },
        };
        config.apply_env_overrides();
        config.validate(explicit)?;
        Ok(config)
    }

    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pyscout").join(CONFIG_FILE_NAME))
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(home) = std::env::var_os(HOME_ENV_VAR).filter(|v| !v.is_empty()) {
            self.cache_dir = Some(PathBuf::from(home));
        }
        if let Some(conda) = std::env::var_os(CONDA_PATH_ENV_VAR).filter(|v| !v.is_empty()) {
            self.conda_path = Some(PathBuf::from(conda));
        }
    }

    fn validate(&self, file_path: Option<&Path>) -> Result<()> {
        let invalid = |field: &str, value: String, message: &str, expected: &str| {
            ScoutError::Config(Box::new(ConfigError::InvalidValue {
                message: message.to_string(),
                field: field.to_string(),
                value,
                expected: expected.to_string(),
                file_path: file_path.map(Path::to_path_buf),
            }))
        };

        if self.resolve_timeout_secs == 0 {
            return Err(invalid(
                "resolve_timeout_secs",
                "0".to_string(),
                "resolve timeout must be positive",
                "a positive number of seconds",
            ));
        }
        if self.cache_expiry_hours == 0 {
            return Err(invalid(
                "cache_expiry_hours",
                "0".to_string(),
                "cache expiry must be positive",
                "a positive number of hours",
            ));
        }
        if self.watch.enabled && self.watch.poll_interval_ms == 0 {
            return Err(invalid(
                "watch.poll_interval_ms",
                "0".to_string(),
                "poll interval must be positive",
                "a positive number of milliseconds",
            ));
        }

        let absolute_fields = [
            ("conda_path", self.conda_path.as_ref()),
            ("venv_path", self.venv_path.as_ref()),
            ("cache_dir", self.cache_dir.as_ref()),
        ];
        let configured = absolute_fields
            .into_iter()
            .filter_map(|(field, path)| path.map(|p| (field, p)))
            .chain(self.search_paths.iter().map(|p| ("search_paths", p)));
        for (field, path) in configured {
            if path.is_relative() {
                return Err(invalid(
                    field,
                    path.display().to_string(),
                    "configured paths must be absolute",
                    "an absolute path",
                ));
            }
        }
        Ok(())
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }

    pub fn cache_expiry(&self) -> Duration {
        Duration::from_secs(self.cache_expiry_hours * 60 * 60)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.watch.poll_interval_ms)
    }

    /// `venv_path` plus every `venv_folders` entry resolved against `home`
    pub fn virtual_env_folders(&self, home: Option<&Path>) -> Vec<PathBuf> {
        let mut folders: Vec<PathBuf> = self.venv_path.iter().cloned().collect();
        for folder in &self.venv_folders {
            if folder.is_absolute() {
                folders.push(folder.clone());
            } else if let Some(home) = home {
                folders.push(home.join(folder));
            }
        }
        folders
    }
}
