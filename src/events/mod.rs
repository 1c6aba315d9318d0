// Change notification for discovery: listener registries, environment change
// events and filesystem watches

pub mod bus;
pub mod event;
pub mod fs_watch;
pub mod watcher;

// Re-export main types for easier access
pub use bus::{Emitter, Listener, Subscription};
pub use event::{EnvChangeEvent, FileChangeEvent, FileChangeType};
pub use fs_watch::{FileChangeCallback, FileWatcher, NotifyFileWatcher, WatchHandle, WatchPattern};
pub use watcher::EnvWatcher;
