// Synchronous listener registry used for every change notification in discovery
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use tracing::{trace, warn};

/// Callback registered on an [`Emitter`]
pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    next_id: u64,
    listeners: Vec<(u64, Listener<E>)>,
}

/// Fan-out of events to registered listeners.
///
/// `fire` calls every listener registered at the time of the call, in
/// registration order, exactly once. Nothing is buffered: listeners added later
/// never see earlier events. A panicking listener is logged and skipped.
pub struct Emitter<E> {
    registry: Arc<Mutex<Registry<E>>>,
}

impl<E: 'static> Emitter<E> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                listeners: Vec::new(),
            })),
        }
    }

    /// Register a listener; dropping the returned handle removes it
    pub fn on_changed<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = {
            let mut registry = self.registry.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.listeners.push((id, Arc::new(listener)));
            id
        };

        let registry: Weak<Mutex<Registry<E>>> = Arc::downgrade(&self.registry);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.lock().listeners.retain(|(listener_id, _)| *listener_id != id);
            }
        })
    }

    /// Deliver an event to every current listener
    pub fn fire(&self, event: &E) {
        // Snapshot so listeners may subscribe or unsubscribe while being called
        let listeners: Vec<Listener<E>> = self
            .registry
            .lock()
            .listeners
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        trace!("Firing event to {} listeners", listeners.len());
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                warn!("Change listener panicked; continuing with remaining listeners");
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.registry.lock().listeners.len()
    }
}

impl<E: 'static> Default for Emitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for Emitter<E> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

/// Handle that removes a registration when dropped or unsubscribed
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    dispose: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new<F>(dispose: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            dispose: Some(Box::new(dispose)),
        }
    }

    /// A subscription owning several others
    pub fn all(subscriptions: Vec<Subscription>) -> Self {
        Self::new(move || drop(subscriptions))
    }

    /// Remove the registration now
    pub fn unsubscribe(mut self) {
        self.dispose_now();
    }

    fn dispose_now(&mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.dispose.is_some())
            .finish()
    }
}
