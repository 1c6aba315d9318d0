// Python environment data model and classification

pub mod classify;
pub mod info;
pub mod version;

pub use classify::{classify_environment, identify_environment, EnvCandidate, HostEnvironment};
pub use info::{
    Architecture, Distro, EnvKind, EnvSource, InterpreterInformation, PythonEnvInfo,
    PythonExecutableInfo,
};
pub use version::{PythonReleaseInfo, PythonVersion, ReleaseLevel};
