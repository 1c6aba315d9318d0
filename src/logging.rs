// Logging setup for pyscout
use std::io::{self, IsTerminal};
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{CliError, Result, ScoutError};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: Level,
    /// Output format (pretty for terminals, json for programmatic use)
    pub format: LogFormat,
    /// Color output configuration
    pub color: ColorConfig,
    /// Whether to show targets (module names)
    pub show_targets: bool,
    /// Whether to show timestamps
    pub show_timestamps: bool,
}

/// Log output format options
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
    Compact,
}

/// Color output configuration
#[derive(Debug, Clone, PartialEq)]
pub enum ColorConfig {
    Auto,
    Always,
    Never,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::WARN,
            format: LogFormat::Pretty,
            color: ColorConfig::Auto,
            show_targets: false,
            show_timestamps: false,
        }
    }
}

impl LogConfig {
    /// Create logging configuration from CLI arguments.
    /// Discovery failures are logged at warn/debug, so the default stays quiet.
    pub fn from_cli(verbose: bool, quiet: bool, color: Option<String>) -> Self {
        let level = if quiet {
            Level::ERROR
        } else if verbose {
            Level::DEBUG
        } else {
            Level::WARN
        };

        let color_config = match color.as_deref() {
            Some("always") => ColorConfig::Always,
            Some("never") => ColorConfig::Never,
            _ => ColorConfig::Auto,
        };

        Self {
            level,
            color: color_config,
            ..Self::default()
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Check if colors should be used based on configuration and terminal
    pub fn should_use_colors(&self) -> bool {
        match self.color {
            ColorConfig::Always => true,
            ColorConfig::Never => false,
            ColorConfig::Auto => {
                io::stderr().is_terminal()
                    && std::env::var("TERM").map_or(true, |term| term != "dumb")
                    && std::env::var("NO_COLOR").is_err()
            }
        }
    }

    fn env_filter(&self) -> EnvFilter {
        // RUST_LOG wins over the CLI-derived level when present
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("pyscout={}", self.level)))
    }
}

/// Initialize the logging system with the given configuration.
/// Logs go to stderr so stdout stays machine-readable.
pub fn init_logging(config: LogConfig) -> Result<()> {
    let env_filter = config.env_filter();
    let use_colors = config.should_use_colors();

    let result = match config.format {
        LogFormat::Pretty => fmt()
            .with_env_filter(env_filter)
            .with_writer(io::stderr)
            .with_ansi(use_colors)
            .with_target(config.show_targets)
            .try_init(),
        LogFormat::Json => fmt()
            .with_env_filter(env_filter)
            .with_writer(io::stderr)
            .json()
            .try_init(),
        LogFormat::Compact => fmt()
            .with_env_filter(env_filter)
            .with_writer(io::stderr)
            .with_ansi(use_colors)
            .compact()
            .with_target(config.show_targets)
            .try_init(),
    };

    result.map_err(|e| {
        ScoutError::Cli(Box::new(CliError::RuntimeError {
            message: format!("Failed to initialize logging: {e}"),
        }))
    })
}

/// Span helpers shared by the discovery pipeline
pub mod utils {
    use std::path::Path;
    use tracing::{span, Level, Span};

    /// Span covering one enumeration pass of a locator
    pub fn locator_span(locator: &str) -> Span {
        span!(Level::DEBUG, "locator", locator = %locator)
    }

    /// Span covering the resolution of a single interpreter
    pub fn resolve_span(executable: &Path) -> Span {
        span!(Level::DEBUG, "resolve", executable = %executable.display())
    }

    /// Span covering a full interpreter refresh
    pub fn refresh_span(root: Option<&Path>) -> Span {
        span!(Level::INFO, "refresh", root = ?root)
    }
}
