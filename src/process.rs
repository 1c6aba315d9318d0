// Process execution for interpreter and conda queries: timeout handling,
// output capture, and a distinct error for every failure mode

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{ProcessError, Result, ScoutError};

/// Default timeout for subprocess-based resolution
pub const DEFAULT_PROCESS_TIMEOUT: Duration = Duration::from_secs(15);

/// Process execution configuration
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub command: PathBuf,
    pub args: Vec<OsString>,
    pub timeout: Option<Duration>,
}

impl ProcessConfig {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Human readable command line, used in errors and logs
    pub fn display_command(&self) -> String {
        let mut parts = vec![self.command.display().to_string()];
        parts.extend(self.args.iter().map(|a| a.to_string_lossy().to_string()));
        parts.join(" ")
    }
}

/// Output of a process that exited successfully
#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub duration: Duration,
}

impl ProcessResult {
    pub fn stdout(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    pub fn stderr(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}

/// Process execution primitive injected into locators and the resolver.
///
/// Implementations return `Ok` only for a zero exit status. Spawn failures,
/// non-zero exits and timeouts map to distinct [`ProcessError`] variants.
#[async_trait]
pub trait ProcessExecutor: Send + Sync {
    async fn execute(&self, config: ProcessConfig) -> Result<ProcessResult>;
}

/// Process manager backed by `tokio::process`
#[derive(Debug, Clone)]
pub struct ProcessManager {
    default_timeout: Duration,
}

impl ProcessManager {
    pub fn new() -> Self {
        Self {
            default_timeout: DEFAULT_PROCESS_TIMEOUT,
        }
    }

    pub fn with_default_timeout(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub async fn execute_async(&self, config: ProcessConfig) -> Result<ProcessResult> {
        use tokio::process::Command;
        use tokio::time::timeout;

        let start_time = Instant::now();
        let command_line = config.display_command();

        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args);

        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.stdin(Stdio::null());
        // Dropping the child on timeout must not leave it running
        cmd.kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ScoutError::Process(Box::new(ProcessError::CommandNotFound {
                    command: config.command.display().to_string(),
                    suggestion: None,
                }))
            } else {
                ScoutError::Process(Box::new(ProcessError::SpawnFailed {
                    command: command_line.clone(),
                    error: e.to_string(),
                }))
            }
        })?;

        let timeout_duration = config.timeout.unwrap_or(self.default_timeout);

        let output = match timeout(timeout_duration, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ScoutError::Process(Box::new(
                    ProcessError::OutputCaptureFailed {
                        message: format!("Failed to wait for process: {e}"),
                        command: command_line,
                    },
                )));
            }
            Err(_) => {
                debug!(command = %command_line, "Process timed out after {:?}", timeout_duration);
                return Err(ScoutError::Process(Box::new(ProcessError::Timeout {
                    command: command_line,
                    duration: timeout_duration,
                })));
            }
        };

        if !output.status.success() {
            return Err(ScoutError::Process(Box::new(ProcessError::ExecutionFailed {
                command: command_line,
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })));
        }

        Ok(ProcessResult {
            exit_code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
            duration: start_time.elapsed(),
        })
    }
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Production executor spawning real processes
#[derive(Debug, Clone, Default)]
pub struct SystemProcessExecutor {
    manager: ProcessManager,
}

impl SystemProcessExecutor {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            manager: ProcessManager::with_default_timeout(default_timeout),
        }
    }
}

#[async_trait]
impl ProcessExecutor for SystemProcessExecutor {
    async fn execute(&self, config: ProcessConfig) -> Result<ProcessResult> {
        self.manager.execute_async(config).await
    }
}
