// Environment change watcher shared by locators
use std::path::{Path, PathBuf};

use crate::environment::EnvKind;
use crate::events::bus::{Emitter, Subscription};
use crate::events::event::EnvChangeEvent;

/// Publishes [`EnvChangeEvent`]s to subscribers, optionally scoped to a
/// search location (usually a workspace root).
#[derive(Clone, Default)]
pub struct EnvWatcher {
    emitter: Emitter<EnvChangeEvent>,
}

impl EnvWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every event
    pub fn on_changed<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&EnvChangeEvent) + Send + Sync + 'static,
    {
        self.emitter.on_changed(listener)
    }

    /// Subscribe to events whose search location is exactly `location`
    pub fn on_changed_in<F>(&self, location: impl Into<PathBuf>, listener: F) -> Subscription
    where
        F: Fn(&EnvChangeEvent) + Send + Sync + 'static,
    {
        let location = location.into();
        self.emitter.on_changed(move |event: &EnvChangeEvent| {
            if event.is_in(&location) {
                listener(event);
            }
        })
    }

    /// Signal that environments of `kind` (or of any kind) may have changed
    pub fn trigger(&self, kind: Option<EnvKind>) {
        self.fire(&EnvChangeEvent::for_kind(kind));
    }

    /// Signal a change scoped to `location`
    pub fn trigger_in(&self, location: &Path, kind: Option<EnvKind>) {
        self.fire(&EnvChangeEvent::for_location(location).with_kind(kind));
    }

    pub fn fire(&self, event: &EnvChangeEvent) {
        self.emitter.fire(event);
    }

    pub fn listener_count(&self) -> usize {
        self.emitter.listener_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_trigger_delivers_kind() {
        let watcher = EnvWatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = watcher.on_changed(move |e| sink.lock().push(e.clone()));

        watcher.trigger(Some(EnvKind::Conda));
        watcher.trigger(None);

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].kind, Some(EnvKind::Conda));
        assert_eq!(seen[1], EnvChangeEvent::default());
    }

    #[test]
    fn test_scoped_listener_filters_other_locations() {
        let watcher = EnvWatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = watcher.on_changed_in("/proj", move |e| sink.lock().push(e.clone()));

        watcher.trigger_in(Path::new("/proj2"), None);
        watcher.trigger(None);
        watcher.trigger_in(Path::new("/proj"), Some(EnvKind::Venv));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].search_location.as_deref(), Some(Path::new("/proj")));
    }
}
