// Python version model and the parsers for the places a version can be read from
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Release level of a Python build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseLevel {
    Alpha,
    Beta,
    Candidate,
    Final,
}

impl ReleaseLevel {
    /// Parse `sys.version_info.releaselevel` or a PEP 440 pre-release tag
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "alpha" | "a" => Some(Self::Alpha),
            "beta" | "b" => Some(Self::Beta),
            "candidate" | "rc" | "c" => Some(Self::Candidate),
            "final" => Some(Self::Final),
            _ => None,
        }
    }

    fn short_tag(self) -> &'static str {
        match self {
            Self::Alpha => "a",
            Self::Beta => "b",
            Self::Candidate => "rc",
            Self::Final => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PythonReleaseInfo {
    pub level: ReleaseLevel,
    pub serial: u32,
}

/// A possibly partial Python version.
///
/// Missing components are `None`; [`PythonVersion::unknown`] has none at all.
/// Ordering compares components left to right with missing sorting first.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct PythonVersion {
    pub major: Option<u32>,
    pub minor: Option<u32>,
    pub micro: Option<u32>,
    pub release: Option<PythonReleaseInfo>,
    pub sys_version: Option<String>,
}

static VERSION_STRING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*v?(\d+)(?:\.(\d+))?(?:\.(\d+))?(?:(a|b|rc|c)(\d+))?")
        .expect("version regex is valid")
});

static CONDA_META_PYTHON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^python-(\d+(?:\.\d+)*)-.*\.json$").expect("conda-meta regex is valid")
});

static EXECUTABLE_VERSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^python(\d+(?:\.\d+)?)(?:\.exe)?$").expect("executable version regex is valid")
});

impl PythonVersion {
    /// The explicit "version not known" value
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn new(major: u32, minor: u32, micro: u32) -> Self {
        Self {
            major: Some(major),
            minor: Some(minor),
            micro: Some(micro),
            release: None,
            sys_version: None,
        }
    }

    pub fn with_release(mut self, level: ReleaseLevel, serial: u32) -> Self {
        self.release = Some(PythonReleaseInfo { level, serial });
        self
    }

    pub fn with_sys_version(mut self, sys_version: impl Into<String>) -> Self {
        self.sys_version = Some(sys_version.into());
        self
    }

    pub fn is_unknown(&self) -> bool {
        self.major.is_none()
    }

    /// Major, minor and micro are all known
    pub fn is_complete(&self) -> bool {
        self.major.is_some() && self.minor.is_some() && self.micro.is_some()
    }

    /// Number of known components, used to pick the better of two versions
    pub fn completeness(&self) -> usize {
        [
            self.major.is_some(),
            self.minor.is_some(),
            self.micro.is_some(),
            self.release.is_some(),
            self.sys_version.is_some(),
        ]
        .iter()
        .filter(|known| **known)
        .count()
    }

    /// Parse `3`, `3.8`, `3.8.5`, `3.9.0rc1`; trailing text is ignored
    pub fn parse(value: &str) -> Option<Self> {
        let captures = VERSION_STRING.captures(value)?;
        let number = |i: usize| captures.get(i).and_then(|m| m.as_str().parse::<u32>().ok());

        let mut version = Self {
            major: number(1),
            minor: number(2),
            micro: number(3),
            ..Self::default()
        };
        if let (Some(tag), Some(serial)) = (captures.get(4), number(5)) {
            if let Some(level) = ReleaseLevel::parse(tag.as_str()) {
                version.release = Some(PythonReleaseInfo { level, serial });
            }
        }
        Some(version)
    }

    /// Build from the `sys.version_info` tuple, e.g. `[3, 8, 5, "final", 0]`
    pub fn from_version_info(values: &[serde_json::Value]) -> Option<Self> {
        let number = |i: usize| {
            values
                .get(i)
                .and_then(|v| v.as_u64())
                .and_then(|n| u32::try_from(n).ok())
        };

        let major = number(0)?;
        let mut version = Self {
            major: Some(major),
            minor: number(1),
            micro: number(2),
            ..Self::default()
        };
        if let Some(level) = values
            .get(3)
            .and_then(|v| v.as_str())
            .and_then(ReleaseLevel::parse)
        {
            version.release = Some(PythonReleaseInfo {
                level,
                serial: number(4).unwrap_or(0),
            });
        }
        Some(version)
    }

    /// Read `version` (or `version_info`) from a `pyvenv.cfg` file
    pub fn from_pyvenv_cfg(content: &str) -> Option<Self> {
        let mut fallback = None;
        for line in content.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key.trim().to_ascii_lowercase().as_str() {
                "version" => return Self::parse(value),
                "version_info" => fallback = Self::parse(value),
                _ => {}
            }
        }
        fallback
    }

    /// Version of the `python-X.Y.Z-<build>.json` package record in `conda-meta`
    pub fn from_conda_meta_filename(file_name: &str) -> Option<Self> {
        let captures = CONDA_META_PYTHON.captures(file_name)?;
        Self::parse(captures.get(1)?.as_str())
    }

    /// Version hinted by an executable name such as `python3.8`
    pub fn from_executable_name(file_name: &str) -> Option<Self> {
        let captures = EXECUTABLE_VERSION.captures(file_name)?;
        Self::parse(captures.get(1)?.as_str())
    }

    /// Keep whichever of the two versions carries more information
    pub fn more_complete(self, other: Self) -> Self {
        if other.completeness() > self.completeness() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for PythonVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(major) = self.major else {
            return write!(f, "unknown");
        };
        write!(f, "{major}")?;
        if let Some(minor) = self.minor {
            write!(f, ".{minor}")?;
            if let Some(micro) = self.micro {
                write!(f, ".{micro}")?;
            }
        }
        if let Some(release) = self.release {
            if release.level != ReleaseLevel::Final {
                write!(f, "{}{}", release.level.short_tag(), release.serial)?;
            }
        }
        Ok(())
    }
}
