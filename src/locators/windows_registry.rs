// Interpreters registered under SOFTWARE\Python in the Windows registry
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, Instrument};

use crate::environment::{
    classify_environment, Architecture, EnvCandidate, EnvKind, EnvSource, PythonEnvInfo,
    PythonVersion,
};
use crate::error::{ProcessError, Result, ScoutError};
use crate::filesystem::normalize_path_key;
use crate::locators::{lazy_env_stream, EnvStream, Locator, LocatorContext, PythonLocatorQuery};
use crate::logging::utils::locator_span;
use crate::process::{ProcessConfig, ProcessExecutor};

const PYTHON_KEY: &str = r"SOFTWARE\Python";
const PY_LAUNCHER: &str = "PyLauncher";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryHive {
    LocalMachine,
    CurrentUser,
}

impl RegistryHive {
    pub fn short_name(self) -> &'static str {
        match self {
            RegistryHive::LocalMachine => "HKLM",
            RegistryHive::CurrentUser => "HKCU",
        }
    }

    pub fn full_name(self) -> &'static str {
        match self {
            RegistryHive::LocalMachine => "HKEY_LOCAL_MACHINE",
            RegistryHive::CurrentUser => "HKEY_CURRENT_USER",
        }
    }
}

/// Registry view to read through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryArch {
    X86,
    X64,
}

impl RegistryArch {
    fn reg_flag(self) -> &'static str {
        match self {
            RegistryArch::X86 => "/reg:32",
            RegistryArch::X64 => "/reg:64",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistryQuery {
    pub hive: RegistryHive,
    pub arch: RegistryArch,
    pub key: String,
}

impl RegistryQuery {
    pub fn new(hive: RegistryHive, arch: RegistryArch, key: impl Into<String>) -> Self {
        Self {
            hive,
            arch,
            key: key.into(),
        }
    }

    pub fn child(&self, name: &str) -> Self {
        Self::new(self.hive, self.arch, format!(r"{}\{}", self.key, name))
    }
}

impl fmt::Display for RegistryQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, r"{}\{}", self.hive.short_name(), self.key)
    }
}

/// A named value; the default value has an empty name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryValue {
    pub name: String,
    pub value: String,
}

impl RegistryValue {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Read access to the registry. Missing keys read as empty.
#[async_trait]
pub trait RegistryReader: Send + Sync {
    /// Names of the direct subkeys of `query.key`
    async fn read_keys(&self, query: &RegistryQuery) -> Result<Vec<String>>;

    /// Values stored directly under `query.key`
    async fn read_values(&self, query: &RegistryQuery) -> Result<Vec<RegistryValue>>;
}

static VALUE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^ {4}(.*?) {4}(REG_[A-Z_]+)(?: {4}(.*))?$").expect("valid registry value regex")
});

/// Registry access through `reg query`
pub struct RegExeRegistryReader {
    process: Arc<dyn ProcessExecutor>,
    timeout: Duration,
}

impl RegExeRegistryReader {
    pub fn new(process: Arc<dyn ProcessExecutor>, timeout: Duration) -> Self {
        Self { process, timeout }
    }

    async fn query(&self, query: &RegistryQuery) -> Result<Option<String>> {
        let config = ProcessConfig::new("reg")
            .with_args(["query".to_string(), query.to_string(), query.arch.reg_flag().to_string()])
            .with_timeout(self.timeout);

        match self.process.execute(config).await {
            Ok(result) => Ok(Some(result.stdout())),
            // reg exits with 1 when the key does not exist
            Err(ScoutError::Process(e)) if matches!(*e, ProcessError::ExecutionFailed { .. }) => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Subkey names from `reg query` output
    pub fn parse_keys(query: &RegistryQuery, output: &str) -> Vec<String> {
        let own_key = format!(r"{}\{}", query.hive.full_name(), query.key).to_ascii_lowercase();
        output
            .lines()
            .map(str::trim_end)
            .filter(|line| line.starts_with("HKEY_"))
            .filter(|line| line.to_ascii_lowercase() != own_key)
            .filter_map(|line| line.rsplit('\\').next())
            .map(str::to_string)
            .collect()
    }

    /// Values from `reg query` output; `(Default)` becomes the empty name
    pub fn parse_values(output: &str) -> Vec<RegistryValue> {
        output
            .lines()
            .map(|line| line.trim_end_matches(['\r', '\n']))
            .filter_map(|line| VALUE_LINE.captures(line))
            .map(|caps| {
                let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                let value = caps.get(3).map(|m| m.as_str().trim_end()).unwrap_or_default();
                let name = if name == "(Default)" { "" } else { name };
                RegistryValue::new(name, value)
            })
            .collect()
    }
}

#[async_trait]
impl RegistryReader for RegExeRegistryReader {
    async fn read_keys(&self, query: &RegistryQuery) -> Result<Vec<String>> {
        Ok(self
            .query(query)
            .await?
            .map(|output| Self::parse_keys(query, &output))
            .unwrap_or_default())
    }

    async fn read_values(&self, query: &RegistryQuery) -> Result<Vec<RegistryValue>> {
        Ok(self
            .query(query)
            .await?
            .map(|output| Self::parse_values(&output))
            .unwrap_or_default())
    }
}

/// One `SOFTWARE\Python\<company>\<tag>` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryInstall {
    pub company: String,
    pub tag: String,
    pub executable: PathBuf,
    pub display_name: Option<String>,
    pub sys_version: Option<String>,
    pub version: Option<String>,
    pub sys_architecture: Option<String>,
}

fn value_named<'a>(values: &'a [RegistryValue], name: &str) -> Option<&'a str> {
    values
        .iter()
        .find(|v| v.name.eq_ignore_ascii_case(name))
        .map(|v| v.value.as_str())
        .filter(|v| !v.is_empty())
}

pub struct WindowsRegistryLocator {
    ctx: LocatorContext,
    reader: Arc<dyn RegistryReader>,
}

impl WindowsRegistryLocator {
    pub fn new(ctx: LocatorContext, reader: Arc<dyn RegistryReader>) -> Self {
        Self { ctx, reader }
    }

    async fn read_install(
        reader: &dyn RegistryReader,
        company: &str,
        tag_key: &RegistryQuery,
    ) -> Result<Option<RegistryInstall>> {
        let tag = tag_key.key.rsplit('\\').next().unwrap_or_default().to_string();
        let info = reader.read_values(tag_key).await?;
        let install_path = reader.read_values(&tag_key.child("InstallPath")).await?;

        let executable = match value_named(&install_path, "ExecutablePath") {
            Some(path) => PathBuf::from(path),
            None => match value_named(&install_path, "") {
                Some(dir) => PathBuf::from(dir).join("python.exe"),
                None => return Ok(None),
            },
        };

        Ok(Some(RegistryInstall {
            company: company.to_string(),
            tag,
            executable,
            display_name: value_named(&info, "DisplayName").map(str::to_string),
            sys_version: value_named(&info, "SysVersion").map(str::to_string),
            version: value_named(&info, "Version").map(str::to_string),
            sys_architecture: value_named(&info, "SysArchitecture").map(str::to_string),
        }))
    }

    /// Every install in one hive/view. An error ends that branch only.
    async fn installs_in(
        reader: &dyn RegistryReader,
        hive: RegistryHive,
        arch: RegistryArch,
    ) -> Vec<RegistryInstall> {
        let root = RegistryQuery::new(hive, arch, PYTHON_KEY);
        let companies = match reader.read_keys(&root).await {
            Ok(companies) => companies,
            Err(e) => {
                debug!(key = %root, "Registry branch unavailable: {}", e);
                return Vec::new();
            }
        };

        let mut installs = Vec::new();
        for company in companies.iter().filter(|c| c.as_str() != PY_LAUNCHER) {
            let company_key = root.child(company);
            let tags = match reader.read_keys(&company_key).await {
                Ok(tags) => tags,
                Err(e) => {
                    debug!(key = %company_key, "Registry branch unavailable: {}", e);
                    continue;
                }
            };
            for tag in tags {
                let tag_key = company_key.child(&tag);
                match Self::read_install(reader, company, &tag_key).await {
                    Ok(Some(install)) => installs.push(install),
                    Ok(None) => {}
                    Err(e) => debug!(key = %tag_key, "Registry branch unavailable: {}", e),
                }
            }
        }
        installs
    }

    /// Installs from HKLM then HKCU, 32-bit then 64-bit view, first one wins
    pub async fn installs(reader: &dyn RegistryReader) -> Vec<RegistryInstall> {
        let mut seen = HashSet::new();
        let mut installs = Vec::new();
        for hive in [RegistryHive::LocalMachine, RegistryHive::CurrentUser] {
            for arch in [RegistryArch::X86, RegistryArch::X64] {
                for install in Self::installs_in(reader, hive, arch).await {
                    if seen.insert(normalize_path_key(&install.executable)) {
                        installs.push(install);
                    }
                }
            }
        }
        installs
    }

    async fn env_for_install(ctx: &LocatorContext, install: RegistryInstall) -> PythonEnvInfo {
        let candidate = EnvCandidate::from_executable(install.executable.clone());
        let kind = classify_environment(
            ctx.fs.as_ref(),
            &ctx.host,
            &candidate,
            EnvKind::OtherGlobal,
        )
        .await;

        let from_version = install.version.as_deref().and_then(PythonVersion::parse);
        let from_sys_version = install.sys_version.as_deref().and_then(PythonVersion::parse);
        let version = match (from_version, from_sys_version) {
            (Some(a), Some(b)) => a.more_complete(b),
            (Some(v), None) | (None, Some(v)) => v,
            (None, None) => PythonVersion::unknown(),
        };

        let mut env = PythonEnvInfo::new(install.executable, kind)
            .with_version(version)
            .with_org(install.company)
            .with_source(EnvSource::WindowsRegistry);
        if let Some(arch) = install.sys_architecture.as_deref() {
            env.arch = Architecture::parse(arch);
        }
        env.distro.default_display_name = install.display_name;
        if kind.is_virtual() {
            env.location = candidate.prefix;
        }
        env
    }
}

#[async_trait]
impl Locator for WindowsRegistryLocator {
    fn name(&self) -> &'static str {
        "windows-registry"
    }

    fn iter_envs(&self, _query: &PythonLocatorQuery) -> EnvStream {
        let ctx = self.ctx.clone();
        let reader = Arc::clone(&self.reader);
        lazy_env_stream(move || {
            async move {
                let installs = Self::installs(reader.as_ref()).await;
                let mut envs = Vec::with_capacity(installs.len());
                for install in installs {
                    envs.push(Self::env_for_install(&ctx, install).await);
                }
                debug!("Found {} registry installs", envs.len());
                envs
            }
            .instrument(locator_span("windows-registry"))
        })
    }
}
