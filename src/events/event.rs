// Change events published by locators and the filesystem watcher
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::environment::EnvKind;

/// Kind of filesystem change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileChangeType {
    Created,
    Changed,
    Deleted,
}

impl fmt::Display for FileChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileChangeType::Created => write!(f, "created"),
            FileChangeType::Changed => write!(f, "changed"),
            FileChangeType::Deleted => write!(f, "deleted"),
        }
    }
}

/// A single file matching a watch pattern changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChangeEvent {
    pub path: PathBuf,
    pub change_type: FileChangeType,
}

/// Something about the set of Python environments may have changed.
///
/// All fields are hints; an empty event means "anything may have changed".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnvChangeEvent {
    pub kind: Option<EnvKind>,
    pub search_location: Option<PathBuf>,
    pub change_type: Option<FileChangeType>,
}

impl EnvChangeEvent {
    pub fn for_kind(kind: Option<EnvKind>) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    pub fn for_location(search_location: impl Into<PathBuf>) -> Self {
        Self {
            search_location: Some(search_location.into()),
            ..Self::default()
        }
    }

    pub fn with_kind(mut self, kind: Option<EnvKind>) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_change_type(mut self, change_type: FileChangeType) -> Self {
        self.change_type = Some(change_type);
        self
    }

    /// True when the event is scoped to exactly `location`
    pub fn is_in(&self, location: &Path) -> bool {
        self.search_location
            .as_deref()
            .map(|l| crate::filesystem::paths_equal(l, location))
            .unwrap_or(false)
    }
}

impl fmt::Display for EnvChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = self
            .kind
            .map(|k| k.to_string())
            .unwrap_or_else(|| "any".to_string());
        write!(f, "kind={kind}")?;
        if let Some(location) = &self.search_location {
            write!(f, " location={}", location.display())?;
        }
        if let Some(change_type) = self.change_type {
            write!(f, " change={change_type}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_builders() {
        let event = EnvChangeEvent::for_location("/proj")
            .with_kind(Some(EnvKind::Venv))
            .with_change_type(FileChangeType::Created);

        assert!(event.is_in(Path::new("/proj")));
        assert!(!event.is_in(Path::new("/proj2")));
        assert_eq!(event.to_string(), "kind=venv location=/proj change=created");
    }

    #[test]
    fn test_empty_event_is_unscoped() {
        let event = EnvChangeEvent::for_kind(None);
        assert!(!event.is_in(Path::new("/proj")));
        assert_eq!(event.to_string(), "kind=any");
    }
}
