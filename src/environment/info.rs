// Environment records produced by locators and enriched by resolution
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::SystemTime;

use crate::environment::version::PythonVersion;

/// Which tool or layout produced an environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvKind {
    Unknown,
    System,
    MacDefault,
    WindowsStore,
    Pyenv,
    Conda,
    CondaBase,
    #[serde(rename = "virtualenv")]
    VirtualEnv,
    Pipenv,
    Venv,
    #[serde(rename = "virtualenvwrapper")]
    VirtualEnvWrapper,
    OtherGlobal,
    OtherVirtual,
    Custom,
}

impl EnvKind {
    pub const ALL: [EnvKind; 14] = [
        EnvKind::Unknown,
        EnvKind::System,
        EnvKind::MacDefault,
        EnvKind::WindowsStore,
        EnvKind::Pyenv,
        EnvKind::Conda,
        EnvKind::CondaBase,
        EnvKind::VirtualEnv,
        EnvKind::Pipenv,
        EnvKind::Venv,
        EnvKind::VirtualEnvWrapper,
        EnvKind::OtherGlobal,
        EnvKind::OtherVirtual,
        EnvKind::Custom,
    ];

    /// Rank used when two sources disagree about the same interpreter.
    /// Higher is more specific.
    pub fn specificity(self) -> u8 {
        match self {
            EnvKind::Conda | EnvKind::CondaBase => 10,
            EnvKind::WindowsStore => 9,
            EnvKind::Pipenv => 8,
            EnvKind::Pyenv => 7,
            EnvKind::Venv => 6,
            EnvKind::VirtualEnvWrapper => 5,
            EnvKind::VirtualEnv => 4,
            EnvKind::Custom | EnvKind::OtherVirtual => 3,
            EnvKind::MacDefault => 2,
            EnvKind::System | EnvKind::OtherGlobal => 1,
            EnvKind::Unknown => 0,
        }
    }

    /// Environments layered on top of a base interpreter
    pub fn is_virtual(self) -> bool {
        matches!(
            self,
            EnvKind::Venv
                | EnvKind::VirtualEnv
                | EnvKind::VirtualEnvWrapper
                | EnvKind::Pipenv
                | EnvKind::OtherVirtual
                | EnvKind::Conda
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EnvKind::Unknown => "unknown",
            EnvKind::System => "system",
            EnvKind::MacDefault => "mac-default",
            EnvKind::WindowsStore => "windows-store",
            EnvKind::Pyenv => "pyenv",
            EnvKind::Conda => "conda",
            EnvKind::CondaBase => "conda-base",
            EnvKind::VirtualEnv => "virtualenv",
            EnvKind::Pipenv => "pipenv",
            EnvKind::Venv => "venv",
            EnvKind::VirtualEnvWrapper => "virtualenvwrapper",
            EnvKind::OtherGlobal => "other-global",
            EnvKind::OtherVirtual => "other-virtual",
            EnvKind::Custom => "custom",
        }
    }
}

impl fmt::Display for EnvKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnvKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EnvKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown environment kind '{s}'"))
    }
}

/// Which locator reported an environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvSource {
    Conda,
    WindowsRegistry,
    Pyenv,
    WorkspaceVirtualEnv,
    GlobalVirtualEnv,
    KnownPath,
    PathEnvVar,
    Other,
}

impl EnvSource {
    pub const ALL: [EnvSource; 8] = [
        EnvSource::Conda,
        EnvSource::WindowsRegistry,
        EnvSource::Pyenv,
        EnvSource::WorkspaceVirtualEnv,
        EnvSource::GlobalVirtualEnv,
        EnvSource::KnownPath,
        EnvSource::PathEnvVar,
        EnvSource::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EnvSource::Conda => "conda",
            EnvSource::WindowsRegistry => "windows-registry",
            EnvSource::Pyenv => "pyenv",
            EnvSource::WorkspaceVirtualEnv => "workspace-virtual-env",
            EnvSource::GlobalVirtualEnv => "global-virtual-env",
            EnvSource::KnownPath => "known-path",
            EnvSource::PathEnvVar => "path-env-var",
            EnvSource::Other => "other",
        }
    }
}

impl fmt::Display for EnvSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnvSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EnvSource::ALL
            .iter()
            .copied()
            .find(|source| source.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                let valid: Vec<&str> = EnvSource::ALL.iter().map(|s| s.as_str()).collect();
                format!("unknown source '{s}' (expected one of: {})", valid.join(", "))
            })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    X86,
    X64,
    #[default]
    Unknown,
}

impl Architecture {
    pub fn from_is_64_bit(is_64_bit: bool) -> Self {
        if is_64_bit {
            Architecture::X64
        } else {
            Architecture::X86
        }
    }

    /// Parse registry `SysArchitecture` values such as `64bit`
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "64bit" | "x64" | "amd64" => Architecture::X64,
            "32bit" | "x86" => Architecture::X86,
            _ => Architecture::Unknown,
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::X86 => write!(f, "x86"),
            Architecture::X64 => write!(f, "x64"),
            Architecture::Unknown => write!(f, "unknown"),
        }
    }
}

/// Interpreter executable and its filesystem identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PythonExecutableInfo {
    pub filename: PathBuf,
    pub sys_prefix: Option<PathBuf>,
    pub ctime: Option<SystemTime>,
    pub mtime: Option<SystemTime>,
}

/// Distribution that shipped the interpreter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Distro {
    pub org: Option<String>,
    pub default_display_name: Option<String>,
}

/// Data obtained by running the interpreter itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterpreterInformation {
    pub executable: PathBuf,
    pub sys_prefix: PathBuf,
    pub version: PythonVersion,
    pub arch: Architecture,
}

/// A discovered Python environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PythonEnvInfo {
    pub name: String,
    pub location: Option<PathBuf>,
    pub kind: EnvKind,
    pub executable: PythonExecutableInfo,
    pub version: PythonVersion,
    pub arch: Architecture,
    pub distro: Distro,
    pub search_location: Option<PathBuf>,
    pub source: BTreeSet<EnvSource>,
}

impl PythonEnvInfo {
    pub fn new(executable: impl Into<PathBuf>, kind: EnvKind) -> Self {
        Self {
            name: String::new(),
            location: None,
            kind,
            executable: PythonExecutableInfo {
                filename: executable.into(),
                sys_prefix: None,
                ctime: None,
                mtime: None,
            },
            version: PythonVersion::unknown(),
            arch: Architecture::Unknown,
            distro: Distro::default(),
            search_location: None,
            source: BTreeSet::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_location(mut self, location: impl Into<PathBuf>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_search_location(mut self, search_location: impl Into<PathBuf>) -> Self {
        self.search_location = Some(search_location.into());
        self
    }

    pub fn with_source(mut self, source: EnvSource) -> Self {
        self.source.insert(source);
        self
    }

    pub fn with_version(mut self, version: PythonVersion) -> Self {
        self.version = version;
        self
    }

    pub fn with_arch(mut self, arch: Architecture) -> Self {
        self.arch = arch;
        self
    }

    pub fn with_org(mut self, org: impl Into<String>) -> Self {
        self.distro.org = Some(org.into());
        self
    }

    pub fn executable_path(&self) -> &Path {
        &self.executable.filename
    }

    /// Everything resolution can fill in is already known
    pub fn is_resolved(&self) -> bool {
        self.version.is_complete()
            && self.arch != Architecture::Unknown
            && self.executable.sys_prefix.is_some()
    }

    /// Fold interpreter-reported data into the record. The locator-assigned
    /// executable path is kept so deduplication keys stay stable.
    pub fn apply_interpreter_info(&mut self, info: &InterpreterInformation) {
        self.version = info.version.clone().more_complete(self.version.clone());
        self.arch = info.arch;
        self.executable.sys_prefix = Some(info.sys_prefix.clone());
        if self.location.is_none() && self.kind.is_virtual() {
            self.location = Some(info.sys_prefix.clone());
        }
    }

    /// Human readable label used by the CLI and the legacy adapter
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.distro.default_display_name {
            return name.clone();
        }
        let mut label = format!("Python {}", self.version);
        if self.arch != Architecture::Unknown {
            label.push_str(&format!(" {}-bit", if self.arch == Architecture::X64 { 64 } else { 32 }));
        }
        if !self.name.is_empty() {
            label.push_str(&format!(" ('{}': {})", self.name, self.kind));
        } else if self.kind != EnvKind::Unknown {
            label.push_str(&format!(" ({})", self.kind));
        }
        label
    }
}
