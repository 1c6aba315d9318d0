// pyscout - Library module
// Discovery, classification and resolution of Python environments

pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod environment;
pub mod error;
pub mod events;
pub mod filesystem;
pub mod legacy;
pub mod locators;
pub mod logging;
pub mod process;
pub mod resolution;
pub mod storage;

// Re-export main types for easier access
pub use bootstrap::{Discovery, DiscoveryParts};
pub use config::{DiscoveryConfig, WatchConfig};
pub use environment::{
    Architecture, EnvKind, EnvSource, HostEnvironment, PythonEnvInfo, PythonVersion,
};
pub use error::{
    exit_codes, CliError, ConfigError, ProcessError, Result, ScoutError, StorageError, WatchError,
};
pub use events::{EnvChangeEvent, EnvWatcher, Subscription};
pub use filesystem::{FileSystem, LocalFileSystem};
pub use legacy::{DiscoveryAdapter, GetInterpretersOptions, InterpreterType, PythonInterpreter, RefreshState};
pub use locators::{CompositeLocator, EnvRef, Locator, LocatorContext, PythonLocatorQuery};
pub use process::{ProcessConfig, ProcessExecutor, ProcessResult, SystemProcessExecutor};
pub use resolution::{EnvironmentResolver, ResolutionCache};
pub use storage::{KeyValueStore, ScopedStore, SqliteStore};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
