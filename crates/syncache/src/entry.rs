use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::channel::oneshot;
use futures::future::Shared;
use parking_lot::{Mutex, MutexGuard};
use tokio::time::Instant;

use crate::error::{CacheError, CacheResult};
use crate::fetcher::Fetcher;
use crate::utils::futures::CallOnDrop;

/// The shared receiving end of a running fetch.
pub(crate) type FetchChannel<T> = Shared<oneshot::Receiver<CacheResult<T>>>;

type Listener = Arc<dyn Fn() + Send + Sync>;

/// A fetch that is currently running for an entry.
pub(crate) struct InFlight<T> {
    /// Distinguishes this fetch from fetches started later for the same entry.
    pub generation: u64,
    pub channel: FetchChannel<T>,
}

/// The mutable state of an [`Entry`], guarded by its lock.
pub(crate) struct EntryState<T> {
    pub data: Option<T>,
    pub error: Option<CacheError>,
    pub in_flight: Option<InFlight<T>>,
    pub fetched_at: Option<Instant>,
    pub version: u64,
    pub fetcher: Option<Fetcher<T>>,
    /// Number of live bindings on this entry.
    pub bindings: usize,
    /// Generation of the most recently started fetch.
    pub generation: u64,
}

impl<T> Default for EntryState<T> {
    fn default() -> Self {
        Self {
            data: None,
            error: None,
            in_flight: None,
            fetched_at: None,
            version: 0,
            fetcher: None,
            bindings: 0,
            generation: 0,
        }
    }
}

/// A point-in-time copy of an entry's observable state.
#[derive(Clone, Debug)]
pub struct Snapshot<T> {
    /// Last known value.
    pub data: Option<T>,
    /// Last fetch failure, cleared whenever a fetch starts or a mutation succeeds.
    pub error: Option<CacheError>,
    /// Whether a fetch is currently running.
    pub is_validating: bool,
    /// Change counter of the entry.
    pub version: u64,
}

/// The cached state of a single key.
///
/// Entries are created lazily by the [`Store`](crate::Store) and live as long as the store.
/// Every observable state transition (fetch start, fetch success, fetch failure, mutation)
/// increments [`version`](Self::version) exactly once and then invokes all subscribed
/// listeners. Listeners receive no arguments, they read whatever they need off the entry.
pub struct Entry<T> {
    key: Arc<str>,
    state: Mutex<EntryState<T>>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener: AtomicU64,
}

impl<T> fmt::Debug for Entry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Entry")
            .field("key", &self.key)
            .field("has_data", &state.data.is_some())
            .field("error", &state.error)
            .field("is_validating", &state.in_flight.is_some())
            .field("version", &state.version)
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}

impl<T> Entry<T> {
    pub(crate) fn new(key: Arc<str>) -> Self {
        Self {
            key,
            state: Mutex::new(EntryState::default()),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(0),
        }
    }

    /// The key of this entry.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn shared_key(&self) -> Arc<str> {
        Arc::clone(&self.key)
    }

    /// The change counter. Only ever increases.
    pub fn version(&self) -> u64 {
        self.state.lock().version
    }

    /// Whether a fetch is currently running.
    pub fn is_validating(&self) -> bool {
        self.state.lock().in_flight.is_some()
    }

    /// The last fetch failure.
    pub fn error(&self) -> Option<CacheError> {
        self.state.lock().error.clone()
    }

    /// Number of listeners currently subscribed.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, EntryState<T>> {
        self.state.lock()
    }

    /// Completes a state transition started with [`lock`](Self::lock).
    ///
    /// Bumps the version while still holding the lock, releases it, and only then runs the
    /// listeners so they can freely read the entry.
    pub(crate) fn notify(&self, mut state: MutexGuard<'_, EntryState<T>>) {
        state.version += 1;
        drop(state);

        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener();
        }
    }

    /// Records an error that did not come out of a fetch.
    pub(crate) fn record_error(&self, error: CacheError) {
        let mut state = self.lock();
        state.error = Some(error);
        self.notify(state);
    }

    /// Assigns the fetcher used for revalidations of this entry.
    pub(crate) fn set_fetcher(&self, fetcher: &Fetcher<T>) {
        let mut state = self.lock();
        if !state.fetcher.as_ref().is_some_and(|current| current.same(fetcher)) {
            state.fetcher = Some(fetcher.clone());
        }
    }

    /// Registers a new binding that brings `fetcher`.
    ///
    /// Rebinding the current fetcher is a no-op. A different fetcher replaces the current one,
    /// unless other bindings are still live: then `strict` rejects the bind, and otherwise the
    /// new fetcher wins with a warning.
    pub(crate) fn attach_binding(&self, fetcher: &Fetcher<T>, strict: bool) -> CacheResult<()> {
        let mut state = self.lock();
        match state.fetcher {
            Some(ref current) if current.same(fetcher) => {}
            Some(_) if state.bindings > 0 => {
                if strict {
                    return Err(CacheError::FetcherConflict {
                        key: self.shared_key(),
                    });
                }
                tracing::warn!(
                    key = %self.key,
                    bindings = state.bindings,
                    "Replacing the fetcher of a key that still has live bindings"
                );
                state.fetcher = Some(fetcher.clone());
            }
            _ => state.fetcher = Some(fetcher.clone()),
        }
        state.bindings += 1;
        Ok(())
    }

    pub(crate) fn detach_binding(&self) {
        let mut state = self.lock();
        state.bindings = state.bindings.saturating_sub(1);
    }
}

impl<T: Send + Sync + 'static> Entry<T> {
    /// Registers a change listener.
    ///
    /// The listener stays registered until the returned [`Subscription`] is dropped or
    /// [unsubscribed](Subscription::unsubscribe).
    pub fn subscribe<F>(self: &Arc<Self>, listener: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Arc::new(listener)));

        let entry = Arc::downgrade(self);
        Subscription {
            _token: CallOnDrop::new(move || {
                if let Some(entry) = entry.upgrade() {
                    entry.listeners.lock().retain(|(other, _)| *other != id);
                }
            }),
        }
    }
}

impl<T: Clone> Entry<T> {
    /// The last known value.
    pub fn data(&self) -> Option<T> {
        self.state.lock().data.clone()
    }

    /// Copies the observable state out of the entry in one consistent read.
    pub fn snapshot(&self) -> Snapshot<T> {
        let state = self.state.lock();
        Snapshot {
            data: state.data.clone(),
            error: state.error.clone(),
            is_validating: state.in_flight.is_some(),
            version: state.version,
        }
    }
}

/// A registered change listener.
///
/// Dropping the subscription removes the listener.
#[must_use = "dropping a subscription unsubscribes the listener"]
#[derive(Debug)]
pub struct Subscription {
    _token: CallOnDrop,
}

impl Subscription {
    /// Removes the listener.
    pub fn unsubscribe(self) {
        drop(self);
    }
}
