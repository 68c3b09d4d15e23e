//! Revalidation driven by host activity.
//!
//! The [`FocusRegistry`] keeps a set of "revalidate now" callbacks per key. Whenever the host
//! reports renewed activity (it regained focus, or became visible again), every registered
//! callback runs once. The underlying host listeners are attached lazily when the first
//! callback is registered and detached again when the last one goes away.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// A kind of activity signal a host can deliver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActivityKind {
    /// The application window gained focus.
    Focus,
    /// The visibility of the document changed.
    VisibilityChange,
}

/// An activity signal delivered by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActivityEvent {
    /// The application window gained focus.
    Focus,
    /// The visibility of the document changed.
    VisibilityChange { visible: bool },
}

impl ActivityEvent {
    pub fn kind(&self) -> ActivityKind {
        match self {
            Self::Focus => ActivityKind::Focus,
            Self::VisibilityChange { .. } => ActivityKind::VisibilityChange,
        }
    }

    /// Whether this event means the user is back.
    fn is_renewed_activity(&self) -> bool {
        match self {
            Self::Focus => true,
            Self::VisibilityChange { visible } => *visible,
        }
    }
}

/// Callback invoked by a host for each signal it delivers.
pub type ActivityHandler = Arc<dyn Fn(ActivityEvent) + Send + Sync>;

/// The environment hosting the cache, as a source of activity signals.
pub trait ActivityHost: Send + Sync {
    /// Starts delivering signals of `kind` to `handler`.
    fn attach(&self, kind: ActivityKind, handler: ActivityHandler);

    /// Stops delivering signals of `kind`.
    fn detach(&self, kind: ActivityKind);
}

/// An [`ActivityHost`] fed by the embedding application.
///
/// Call [`emit`](Self::emit) from wherever the application learns about focus and visibility
/// changes. Signals are dropped while no handler is attached.
#[derive(Default)]
pub struct ActivityChannel {
    handlers: Mutex<HashMap<ActivityKind, ActivityHandler>>,
    attached: AtomicUsize,
    detached: AtomicUsize,
}

impl ActivityChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers `event` to the handler attached for its kind.
    pub fn emit(&self, event: ActivityEvent) {
        let handler = self.handlers.lock().get(&event.kind()).cloned();
        if let Some(handler) = handler {
            handler(event);
        }
    }

    /// Whether a handler is attached for `kind`.
    pub fn is_attached(&self, kind: ActivityKind) -> bool {
        self.handlers.lock().contains_key(&kind)
    }

    /// Total number of `attach` calls received.
    pub fn attach_count(&self) -> usize {
        self.attached.load(Ordering::Relaxed)
    }

    /// Total number of `detach` calls received.
    pub fn detach_count(&self) -> usize {
        self.detached.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for ActivityChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds: Vec<_> = self.handlers.lock().keys().copied().collect();
        f.debug_struct("ActivityChannel")
            .field("attached", &kinds)
            .finish()
    }
}

impl ActivityHost for ActivityChannel {
    fn attach(&self, kind: ActivityKind, handler: ActivityHandler) {
        self.attached.fetch_add(1, Ordering::Relaxed);
        self.handlers.lock().insert(kind, handler);
    }

    fn detach(&self, kind: ActivityKind) {
        self.detached.fetch_add(1, Ordering::Relaxed);
        self.handlers.lock().remove(&kind);
    }
}

type Revalidator = Arc<dyn Fn() + Send + Sync>;

/// Identifies one registration in the [`FocusRegistry`].
#[derive(Debug, PartialEq, Eq)]
pub struct FocusToken {
    key: Arc<str>,
    id: u64,
}

impl FocusToken {
    pub fn key(&self) -> &str {
        &self.key
    }
}

#[derive(Default)]
struct Registrations {
    keys: HashMap<Arc<str>, Vec<(u64, Revalidator)>>,
    next_id: u64,
    attached: bool,
}

struct FocusInner {
    host: Arc<dyn ActivityHost>,
    registrations: Mutex<Registrations>,
}

/// Per-key registry of callbacks to run when the host reports renewed activity.
#[derive(Clone)]
pub struct FocusRegistry {
    inner: Arc<FocusInner>,
}

impl fmt::Debug for FocusRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registrations = self.inner.registrations.lock();
        f.debug_struct("FocusRegistry")
            .field("keys", &registrations.keys.len())
            .field("attached", &registrations.attached)
            .finish()
    }
}

const KINDS: [ActivityKind; 2] = [ActivityKind::Focus, ActivityKind::VisibilityChange];

impl FocusRegistry {
    pub fn new(host: Arc<dyn ActivityHost>) -> Self {
        Self {
            inner: Arc::new(FocusInner {
                host,
                registrations: Mutex::new(Registrations::default()),
            }),
        }
    }

    /// Registers `revalidate` to run on renewed activity.
    ///
    /// Attaches the host listeners if this is the first registration.
    pub fn register<F>(&self, key: &str, revalidate: F) -> FocusToken
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut registrations = self.inner.registrations.lock();
        registrations.next_id += 1;
        let id = registrations.next_id;

        let key: Arc<str> = match registrations.keys.get_key_value(key) {
            Some((existing, _)) => Arc::clone(existing),
            None => key.into(),
        };
        registrations
            .keys
            .entry(Arc::clone(&key))
            .or_default()
            .push((id, Arc::new(revalidate)));

        if !registrations.attached {
            registrations.attached = true;
            tracing::trace!("Attaching activity listeners");
            // the host only holds a weak reference, so the registry can still be dropped
            let weak = Arc::downgrade(&self.inner);
            for kind in KINDS {
                let weak: Weak<FocusInner> = weak.clone();
                let handler: ActivityHandler = Arc::new(move |event| {
                    if let Some(inner) = weak.upgrade() {
                        FocusRegistry { inner }.broadcast(event);
                    }
                });
                self.inner.host.attach(kind, handler);
            }
        }

        FocusToken { key, id }
    }

    /// Removes a registration.
    ///
    /// Detaches the host listeners once no registration is left.
    pub fn unregister(&self, token: &FocusToken) {
        let mut registrations = self.inner.registrations.lock();
        if let Some(callbacks) = registrations.keys.get_mut(&token.key) {
            callbacks.retain(|(id, _)| *id != token.id);
            if callbacks.is_empty() {
                registrations.keys.remove(&token.key);
            }
        }

        if registrations.attached && registrations.keys.is_empty() {
            registrations.attached = false;
            tracing::trace!("Detaching activity listeners");
            for kind in KINDS {
                self.inner.host.detach(kind);
            }
        }
    }

    /// Runs every registered callback if `event` signals renewed activity.
    pub fn broadcast(&self, event: ActivityEvent) {
        if !event.is_renewed_activity() {
            return;
        }

        let callbacks: Vec<Revalidator> = self
            .inner
            .registrations
            .lock()
            .keys
            .values()
            .flatten()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        metric!(counter("focus.broadcast") += 1);
        tracing::debug!(callbacks = callbacks.len(), ?event, "Revalidating on activity");
        for callback in callbacks {
            callback();
        }
    }

    /// Whether the host listeners are currently attached.
    pub fn is_attached(&self) -> bool {
        self.inner.registrations.lock().attached
    }

    /// Number of keys with at least one registration.
    pub fn key_count(&self) -> usize {
        self.inner.registrations.lock().keys.len()
    }
}
