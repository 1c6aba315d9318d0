// Error handling framework for pyscout
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScoutError>;

/// Main error type for pyscout
#[derive(Debug, Error)]
pub enum ScoutError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<ConfigError>),

    #[error("Process execution failed: {0}")]
    Process(#[from] Box<ProcessError>),

    #[error("Storage operation failed: {0}")]
    Storage(#[from] Box<StorageError>),

    #[error("Filesystem watch failed: {0}")]
    Watch(#[from] Box<WatchError>),

    #[error("CLI argument error: {0}")]
    Cli(#[from] Box<CliError>),

    #[error("IO operation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration-related errors with detailed context
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid YAML syntax: {message}")]
    InvalidYaml {
        message: String,
        line: Option<u32>,
        column: Option<u32>,
        file_path: Option<PathBuf>,
    },

    #[error("Configuration file not found: {path}")]
    NotFound {
        path: PathBuf,
        suggestion: Option<String>,
    },

    #[error("Invalid configuration value: {message}")]
    InvalidValue {
        message: String,
        field: String,
        value: String,
        expected: String,
        file_path: Option<PathBuf>,
    },

    #[error("IO operation failed: {message}")]
    IOError {
        message: String,
        path: Option<PathBuf>,
    },
}

/// Process execution errors. Each failure mode is a distinct variant so callers
/// can tell a timeout from a non-zero exit from a missing binary.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Process execution failed: {command}")]
    ExecutionFailed {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Process timeout after {duration:?}: {command}")]
    Timeout {
        command: String,
        duration: std::time::Duration,
    },

    #[error("Command not found: {command}")]
    CommandNotFound {
        command: String,
        suggestion: Option<String>,
    },

    #[error("Process spawn failed: {command}")]
    SpawnFailed { command: String, error: String },

    #[error("Output capture failed: {message}")]
    OutputCaptureFailed { message: String, command: String },
}

/// Persistent store errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    ConnectionFailed {
        message: String,
        database_path: Option<PathBuf>,
    },

    #[error("Database query failed: {query}")]
    QueryFailed {
        query: String,
        error: String,
        database_path: Option<PathBuf>,
    },

    #[error("Cache directory creation failed: {path}")]
    CacheDirectoryFailed { path: PathBuf, error: String },

    #[error("Stored value for {key} could not be decoded")]
    CorruptEntry { key: String, error: String },

    #[error("Storage task failed: {operation}")]
    TaskFailed { operation: String, error: String },
}

/// Filesystem watch errors
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Failed to create {backend} watcher")]
    WatcherCreationFailed { backend: String, error: String },

    #[error("Failed to watch {path}")]
    WatchFailed { path: PathBuf, error: String },

    #[error("Invalid watch pattern: {pattern}")]
    InvalidPattern { pattern: String, error: String },
}

/// CLI argument and command-line interface errors
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Conflicting arguments: {first} and {second}")]
    ConflictingArguments {
        first: String,
        second: String,
        suggestion: String,
    },

    #[error("Runtime error: {message}")]
    RuntimeError { message: String },
}

/// Format errors with colors and context
pub struct ErrorFormatter {
    use_colors: bool,
}

impl ErrorFormatter {
    pub fn new(use_colors: bool) -> Self {
        Self { use_colors }
    }

    /// Format an error with context and colors
    pub fn format_error(&self, error: &ScoutError) -> String {
        use tracing::error;

        let error_type = match error {
            ScoutError::Config(_) => "config",
            ScoutError::Process(_) => "process",
            ScoutError::Storage(_) => "storage",
            ScoutError::Watch(_) => "watch",
            ScoutError::Cli(_) => "cli",
            ScoutError::Io(_) => "io",
            ScoutError::Serialization(_) => "serialization",
        };
        error!(error_type = error_type, error = %error, "Operation failed");

        let mut output = String::new();

        if self.use_colors {
            output.push_str("\x1b[31m");
        }
        output.push_str("Error: ");
        if self.use_colors {
            output.push_str("\x1b[0m");
        }

        output.push_str(&error.to_string());

        match error {
            ScoutError::Config(config_err) => {
                self.add_config_context(&mut output, config_err.as_ref());
            }
            ScoutError::Process(process_err) => {
                self.add_process_context(&mut output, process_err.as_ref());
            }
            ScoutError::Watch(watch_err) => {
                if let WatchError::WatchFailed { error, .. } = watch_err.as_ref() {
                    output.push_str(&format!("\n  Watcher error: {error}"));
                }
            }
            ScoutError::Cli(cli_err) => {
                self.add_cli_context(&mut output, cli_err.as_ref());
            }
            _ => {}
        }

        output
    }

    fn add_config_context(&self, output: &mut String, error: &ConfigError) {
        match error {
            ConfigError::InvalidYaml {
                file_path: Some(path),
                line: Some(line),
                ..
            } => {
                output.push_str(&format!("\n  --> {}:{}", path.display(), line));
            }
            ConfigError::NotFound {
                suggestion: Some(suggestion),
                ..
            } => {
                output.push_str(&format!("\n  Help: {suggestion}"));
            }
            ConfigError::InvalidValue {
                field, expected, ..
            } => {
                output.push_str(&format!("\n  Field `{field}` expects {expected}"));
            }
            _ => {}
        }
    }

    fn add_process_context(&self, output: &mut String, error: &ProcessError) {
        match error {
            ProcessError::CommandNotFound {
                suggestion: Some(suggestion),
                ..
            } => {
                output.push_str(&format!("\n  Help: {suggestion}"));
            }
            ProcessError::Timeout { duration, .. } => {
                output.push_str(&format!("\n  Timeout: {duration:?}"));
            }
            ProcessError::ExecutionFailed { stderr, .. } if !stderr.is_empty() => {
                output.push_str(&format!("\n  Process error: {stderr}"));
            }
            _ => {}
        }
    }

    fn add_cli_context(&self, output: &mut String, error: &CliError) {
        if let CliError::ConflictingArguments { suggestion, .. } = error {
            output.push_str(&format!("\n  Help: {suggestion}"));
        }
    }
}

/// Process exit codes for the CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
    pub const CONFIG_ERROR: i32 = 2;
    pub const NOT_FOUND: i32 = 3;
    pub const TIMEOUT_ERROR: i32 = 6;
    pub const CLI_ERROR: i32 = 7;
    pub const STORAGE_ERROR: i32 = 8;
    pub const PROCESS_ERROR: i32 = 9;
}

impl ScoutError {
    /// Get the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            ScoutError::Config(_) => exit_codes::CONFIG_ERROR,
            ScoutError::Process(process_err) => match process_err.as_ref() {
                ProcessError::Timeout { .. } => exit_codes::TIMEOUT_ERROR,
                _ => exit_codes::PROCESS_ERROR,
            },
            ScoutError::Storage(_) => exit_codes::STORAGE_ERROR,
            ScoutError::Cli(_) => exit_codes::CLI_ERROR,
            ScoutError::Watch(_) | ScoutError::Io(_) | ScoutError::Serialization(_) => {
                exit_codes::GENERAL_ERROR
            }
        }
    }

    /// True when the error is a subprocess timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, ScoutError::Process(e) if matches!(e.as_ref(), ProcessError::Timeout { .. }))
    }

    /// Create a user-friendly error message with context
    pub fn user_message(&self, use_colors: bool) -> String {
        let formatter = ErrorFormatter::new(use_colors);
        formatter.format_error(self)
    }
}

impl From<serde_yaml::Error> for Box<ConfigError> {
    fn from(error: serde_yaml::Error) -> Self {
        let location = error.location();
        Box::new(ConfigError::InvalidYaml {
            message: error.to_string(),
            line: location.as_ref().map(|l| l.line() as u32),
            column: location.as_ref().map(|l| l.column() as u32),
            file_path: None,
        })
    }
}

impl From<rusqlite::Error> for Box<StorageError> {
    fn from(error: rusqlite::Error) -> Self {
        match error {
            rusqlite::Error::SqliteFailure(sqlite_error, message) => {
                Box::new(StorageError::QueryFailed {
                    query: "SQLite operation".to_string(),
                    error: message.unwrap_or_else(|| format!("SQLite error: {sqlite_error:?}")),
                    database_path: None,
                })
            }
            rusqlite::Error::InvalidPath(path) => Box::new(StorageError::ConnectionFailed {
                message: format!("Invalid database path: {}", path.display()),
                database_path: Some(path),
            }),
            _ => Box::new(StorageError::QueryFailed {
                query: "Database operation".to_string(),
                error: error.to_string(),
                database_path: None,
            }),
        }
    }
}

impl From<rusqlite::Error> for ScoutError {
    fn from(error: rusqlite::Error) -> Self {
        ScoutError::Storage(Box::<StorageError>::from(error))
    }
}

impl From<notify::Error> for Box<WatchError> {
    fn from(error: notify::Error) -> Self {
        let path = error.paths.first().cloned().unwrap_or_default();
        Box::new(WatchError::WatchFailed {
            path,
            error: error.to_string(),
        })
    }
}

impl From<notify::Error> for ScoutError {
    fn from(error: notify::Error) -> Self {
        ScoutError::Watch(Box::<WatchError>::from(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_display() {
        let error = ScoutError::Config(Box::new(ConfigError::InvalidValue {
            message: "timeout must be positive".to_string(),
            field: "resolve_timeout_secs".to_string(),
            value: "0".to_string(),
            expected: "a positive number of seconds".to_string(),
            file_path: None,
        }));
        assert_eq!(
            error.to_string(),
            "Configuration error: Invalid configuration value: timeout must be positive"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error = ScoutError::from(io_error);
        assert!(error.to_string().contains("IO operation failed"));
    }

    #[test]
    fn test_timeout_is_distinguishable() {
        let timeout = ScoutError::Process(Box::new(ProcessError::Timeout {
            command: "python".to_string(),
            duration: Duration::from_secs(15),
        }));
        let failed = ScoutError::Process(Box::new(ProcessError::ExecutionFailed {
            command: "python".to_string(),
            exit_code: Some(1),
            stderr: String::new(),
        }));

        assert!(timeout.is_timeout());
        assert!(!failed.is_timeout());
        assert_eq!(timeout.exit_code(), exit_codes::TIMEOUT_ERROR);
        assert_eq!(failed.exit_code(), exit_codes::PROCESS_ERROR);
    }

    #[test]
    fn test_user_message_includes_context() {
        let error = ScoutError::Process(Box::new(ProcessError::CommandNotFound {
            command: "conda".to_string(),
            suggestion: Some("Set conda_path in pyscout.yaml".to_string()),
        }));
        let message = error.user_message(false);
        assert!(message.starts_with("Error: "));
        assert!(message.contains("Help: Set conda_path"));
    }

    #[test]
    fn test_conflicting_arguments_message() {
        let error = ScoutError::Cli(Box::new(CliError::ConflictingArguments {
            first: "--verbose".to_string(),
            second: "--quiet".to_string(),
            suggestion: "Use only one of --verbose or --quiet".to_string(),
        }));
        let message = error.user_message(false);

        assert_eq!(error.exit_code(), exit_codes::CLI_ERROR);
        assert!(message.contains("Conflicting arguments: --verbose and --quiet"));
        assert!(message.contains("Help: Use only one of --verbose or --quiet"));
    }
}
