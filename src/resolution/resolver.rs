// Interpreter resolution: run the executable once and read back what it reports
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn, Instrument};

use crate::environment::{Architecture, InterpreterInformation, PythonEnvInfo, PythonVersion};
use crate::error::{ProcessError, Result, ScoutError};
use crate::filesystem::FileSystem;
use crate::logging::utils::resolve_span;
use crate::process::{ProcessConfig, ProcessExecutor, DEFAULT_PROCESS_TIMEOUT};
use crate::resolution::cache::ResolutionCache;

const OUTPUT_START: &str = ">>>JSON";
const OUTPUT_END: &str = "<<<JSON";

/// Introspection script passed to `python -c`
pub const INTERPRETER_INFO_SCRIPT: &str = r#"import json, sys
print(">>>JSON")
print(json.dumps({
    "versionInfo": list(sys.version_info),
    "sysPrefix": sys.prefix,
    "sysVersion": sys.version,
    "is64Bit": sys.maxsize > 2**32,
    "executable": sys.executable,
}))
print("<<<JSON")
"#;

#[derive(Debug, Deserialize)]
struct RawInterpreterInfo {
    #[serde(rename = "versionInfo")]
    version_info: Vec<serde_json::Value>,
    #[serde(rename = "sysPrefix")]
    sys_prefix: PathBuf,
    #[serde(rename = "sysVersion")]
    sys_version: String,
    #[serde(rename = "is64Bit")]
    is_64_bit: bool,
    #[serde(default)]
    executable: Option<PathBuf>,
}

/// Extract the JSON between the markers; `None` when absent or malformed
pub fn parse_interpreter_output(stdout: &str) -> Option<InterpreterInformation> {
    let start = stdout.find(OUTPUT_START)? + OUTPUT_START.len();
    let end = start + stdout[start..].find(OUTPUT_END)?;

    let raw: RawInterpreterInfo = match serde_json::from_str(stdout[start..end].trim()) {
        Ok(raw) => raw,
        Err(e) => {
            debug!("Interpreter printed unexpected JSON: {}", e);
            return None;
        }
    };
    let version = PythonVersion::from_version_info(&raw.version_info)?
        .with_sys_version(raw.sys_version.trim());

    Some(InterpreterInformation {
        executable: raw.executable.unwrap_or_default(),
        sys_prefix: raw.sys_prefix,
        version,
        arch: Architecture::from_is_64_bit(raw.is_64_bit),
    })
}

/// Runs interpreters to learn their version, prefix and architecture,
/// consulting the resolution cache first
pub struct EnvironmentResolver {
    process: Arc<dyn ProcessExecutor>,
    fs: Arc<dyn FileSystem>,
    cache: Option<ResolutionCache>,
    timeout: Duration,
}

impl EnvironmentResolver {
    pub fn new(process: Arc<dyn ProcessExecutor>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            process,
            fs,
            cache: None,
            timeout: DEFAULT_PROCESS_TIMEOUT,
        }
    }

    pub fn with_cache(mut self, cache: ResolutionCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn cache(&self) -> Option<&ResolutionCache> {
        self.cache.as_ref()
    }

    /// Interpreter data for `executable`.
    ///
    /// `Ok(None)` means the path is not a runnable interpreter. A timeout is
    /// reported as [`ProcessError::Timeout`] so callers can tell it apart.
    pub async fn resolve_interpreter(
        &self,
        executable: &Path,
    ) -> Result<Option<InterpreterInformation>> {
        self.resolve_uninstrumented(executable)
            .instrument(resolve_span(executable))
            .await
    }

    async fn resolve_uninstrumented(
        &self,
        executable: &Path,
    ) -> Result<Option<InterpreterInformation>> {
        if !self.fs.is_file(executable).await {
            debug!("Executable does not exist");
            return Ok(None);
        }

        if let Some(cache) = &self.cache {
            if let Some(info) = cache.get(executable).await {
                debug!("Resolved from cache");
                return Ok(Some(info));
            }
        }

        let config = ProcessConfig::new(executable)
            .with_args(["-c", INTERPRETER_INFO_SCRIPT])
            .with_timeout(self.timeout);

        let result = match self.process.execute(config).await {
            Ok(result) => result,
            Err(ScoutError::Process(e)) if matches!(*e, ProcessError::Timeout { .. }) => {
                warn!(executable = %executable.display(), "Interpreter query timed out");
                return Err(ScoutError::Process(e));
            }
            Err(e) => {
                debug!("Interpreter query failed: {}", e);
                return Ok(None);
            }
        };

        let Some(mut info) = parse_interpreter_output(&result.stdout()) else {
            debug!("Interpreter output could not be parsed");
            return Ok(None);
        };
        if info.executable.as_os_str().is_empty() {
            info.executable = executable.to_path_buf();
        }

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.insert(executable, &info).await {
                warn!("Failed to cache interpreter information: {}", e);
            }
        }
        Ok(Some(info))
    }

    /// Complete a discovered record with interpreter-reported data and the
    /// executable's timestamps
    pub async fn resolve_env(&self, mut env: PythonEnvInfo) -> Result<Option<PythonEnvInfo>> {
        let Some(info) = self.resolve_interpreter(&env.executable.filename).await? else {
            return Ok(None);
        };
        env.apply_interpreter_info(&info);
        if let Some(stat) = self.fs.stat(&env.executable.filename).await {
            env.executable.ctime = stat.ctime;
            env.executable.mtime = stat.mtime;
        }
        Ok(Some(env))
    }
}
