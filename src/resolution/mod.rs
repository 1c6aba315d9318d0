// Interpreter resolution and its persistent cache

pub mod cache;
pub mod resolver;

pub use cache::{CachedResolution, ResolutionCache, CACHE_SCHEMA_VERSION, DEFAULT_CACHE_EXPIRY};
pub use resolver::{parse_interpreter_output, EnvironmentResolver, INTERPRETER_INFO_SCRIPT};
