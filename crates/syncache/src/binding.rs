use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::entry::{Entry, Snapshot, Subscription};
use crate::error::{CacheError, CacheResult};
use crate::fetcher::Fetcher;
use crate::focus::{FocusRegistry, FocusToken};
use crate::mutate::{self, MutateOptions, Mutation};
use crate::revalidate::{self, Revalidation};
use crate::store::Store;

/// Per-binding overrides of the store [`Config`](crate::Config).
pub struct BindOptions<T> {
    /// Data to show before the first fetch completes.
    ///
    /// Only seeds an entry that has no data yet. Seeding is silent: it neither bumps the version
    /// nor counts as fresh data, so the initial revalidation still fetches.
    pub fallback_data: Option<T>,
    pub dedup_interval: Option<Duration>,
    pub revalidate_on_focus: Option<bool>,
    pub revalidate_on_bind: Option<bool>,
}

impl<T> Default for BindOptions<T> {
    fn default() -> Self {
        Self {
            fallback_data: None,
            dedup_interval: None,
            revalidate_on_focus: None,
            revalidate_on_bind: None,
        }
    }
}

impl<T> fmt::Debug for BindOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindOptions")
            .field("fallback_data", &self.fallback_data.is_some())
            .field("dedup_interval", &self.dedup_interval)
            .field("revalidate_on_focus", &self.revalidate_on_focus)
            .field("revalidate_on_bind", &self.revalidate_on_bind)
            .finish()
    }
}

impl<T> BindOptions<T> {
    pub fn fallback_data(mut self, data: T) -> Self {
        self.fallback_data = Some(data);
        self
    }

    pub fn dedup_interval(mut self, interval: Duration) -> Self {
        self.dedup_interval = Some(interval);
        self
    }

    pub fn revalidate_on_focus(mut self, enabled: bool) -> Self {
        self.revalidate_on_focus = Some(enabled);
        self
    }

    pub fn revalidate_on_bind(mut self, enabled: bool) -> Self {
        self.revalidate_on_bind = Some(enabled);
        self
    }
}

/// The live parts of an enabled binding.
struct Bound<T> {
    entry: Arc<Entry<T>>,
    fetcher: Fetcher<T>,
    dedup_interval: Duration,
    changes: watch::Receiver<u64>,
    focus: Option<(FocusRegistry, FocusToken)>,
    initial: Mutex<Option<Revalidation<T>>>,
    _subscription: Subscription,
}

impl<T> Drop for Bound<T> {
    fn drop(&mut self) {
        if let Some((registry, token)) = self.focus.take() {
            registry.unregister(&token);
        }
        self.entry.detach_binding();
        tracing::trace!(key = self.entry.key(), "Released binding");
    }
}

/// A consumer's live view of one key.
///
/// While the binding exists, it keeps the key's fetcher registered, follows every state change
/// of the entry and, if enabled, revalidates when the host reports renewed activity. Dropping
/// the binding undoes all of that.
///
/// A binding created without a key is *disabled*: it has no data, never fetches and all of its
/// operations are no-ops.
pub struct Binding<T> {
    bound: Option<Bound<T>>,
}

impl<T> fmt::Debug for Binding<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bound {
            Some(ref bound) => f
                .debug_struct("Binding")
                .field("entry", &bound.entry)
                .field("dedup_interval", &bound.dedup_interval)
                .field("revalidate_on_focus", &bound.focus.is_some())
                .finish(),
            None => f.write_str("Binding(disabled)"),
        }
    }
}

impl<T> Binding<T> {
    /// The bound key, or `None` for a disabled binding.
    pub fn key(&self) -> Option<&str> {
        self.bound.as_ref().map(|bound| bound.entry.key())
    }

    pub fn is_enabled(&self) -> bool {
        self.bound.is_some()
    }

    /// The bound entry.
    pub fn entry(&self) -> Option<&Arc<Entry<T>>> {
        self.bound.as_ref().map(|bound| &bound.entry)
    }

    pub fn error(&self) -> Option<CacheError> {
        self.bound.as_ref().and_then(|bound| bound.entry.error())
    }

    pub fn is_validating(&self) -> bool {
        self.bound
            .as_ref()
            .is_some_and(|bound| bound.entry.is_validating())
    }

    pub fn version(&self) -> u64 {
        self.bound.as_ref().map_or(0, |bound| bound.entry.version())
    }

    /// Takes the revalidation started when the binding was created.
    ///
    /// Returns `None` if no revalidation was started on bind, or it was already taken. The
    /// revalidation runs regardless of whether it is ever taken.
    pub fn initial_revalidation(&mut self) -> Option<Revalidation<T>> {
        self.bound
            .as_mut()
            .and_then(|bound| bound.initial.get_mut().take())
    }
}

impl<T> Binding<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn data(&self) -> Option<T> {
        self.bound.as_ref().and_then(|bound| bound.entry.data())
    }

    /// Reads data, error and validation state in one consistent step.
    pub fn snapshot(&self) -> Snapshot<T> {
        match self.bound {
            Some(ref bound) => bound.entry.snapshot(),
            None => Snapshot {
                data: None,
                error: None,
                is_validating: false,
                version: 0,
            },
        }
    }

    /// Waits for the next state change of the entry and returns the state after it.
    ///
    /// Changes that happened since the last call are reported right away. Several changes in
    /// quick succession may be reported as one. Returns `None` for a disabled binding.
    pub async fn changed(&mut self) -> Option<Snapshot<T>> {
        let bound = self.bound.as_mut()?;
        bound.changes.changed().await.ok()?;
        Some(bound.entry.snapshot())
    }

    /// Revalidates the bound key with this binding's fetcher and dedup interval.
    ///
    /// Failures are not returned; they are left on the entry for all observers to see.
    pub async fn revalidate(&self) -> Option<T> {
        let bound = self.bound.as_ref()?;
        bound.entry.set_fetcher(&bound.fetcher);
        match revalidate::revalidate(&bound.entry, bound.dedup_interval).await {
            Ok(data) => Some(data),
            Err(error) => {
                tracing::debug!(key = bound.entry.key(), error = %error, "Revalidation failed");
                None
            }
        }
    }

    /// Applies a mutation to the bound key.
    ///
    /// Reconciliation uses this binding's fetcher. Resolves to `Ok(None)` for a disabled binding.
    pub async fn mutate(&self, next: Mutation<T>, options: MutateOptions) -> CacheResult<Option<T>> {
        let Some(bound) = self.bound.as_ref() else {
            return Ok(None);
        };
        bound.entry.set_fetcher(&bound.fetcher);
        mutate::mutate(&bound.entry, next, options).await
    }
}

impl<T> Entry<T> {
    /// Seeds data into an empty entry without notifying anyone.
    fn seed(&self, data: T) {
        let mut state = self.lock();
        if state.data.is_none() {
            state.data = Some(data);
        }
    }
}

impl Store {
    /// Binds to `key` with `fetcher`.
    ///
    /// The entry is created if needed, `fetcher` becomes the key's fetcher, fallback data seeds
    /// an empty entry, and a revalidation starts unless disabled. The binding observes every
    /// state change of the entry until it is dropped.
    ///
    /// Fails with [`CacheError::TypeMismatch`] if the key holds another value type, and with
    /// [`CacheError::FetcherConflict`] if [`strict_fetchers`](crate::Config::strict_fetchers) is
    /// set and a live binding brought a different fetcher.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a Tokio runtime, unless revalidation on bind and on focus
    /// are both disabled. Activity signals may reach the binding from any thread later on, they
    /// revalidate on the runtime the binding was made on.
    pub fn bind<T>(
        &self,
        key: &str,
        fetcher: Fetcher<T>,
        options: BindOptions<T>,
    ) -> CacheResult<Binding<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.bind_conditional(Some(key), fetcher, options)
    }

    /// Like [`bind`](Self::bind), but returns a disabled binding if `key` is `None`.
    ///
    /// A disabled binding does not touch the store at all.
    pub fn bind_conditional<T>(
        &self,
        key: Option<&str>,
        fetcher: Fetcher<T>,
        options: BindOptions<T>,
    ) -> CacheResult<Binding<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let Some(key) = key else {
            return Ok(Binding { bound: None });
        };

        let config = self.config();
        let dedup_interval = options.dedup_interval.unwrap_or(config.dedup_interval);
        let revalidate_on_focus = options
            .revalidate_on_focus
            .unwrap_or(config.revalidate_on_focus);
        let revalidate_on_bind = options
            .revalidate_on_bind
            .unwrap_or(config.revalidate_on_bind);

        let entry = self.entry::<T>(key)?;
        entry.attach_binding(&fetcher, config.strict_fetchers)?;
        if let Some(fallback) = options.fallback_data {
            entry.seed(fallback);
        }

        let (sender, changes) = watch::channel(entry.version());
        let subscription = {
            let weak = Arc::downgrade(&entry);
            entry.subscribe(move || {
                if let Some(entry) = weak.upgrade() {
                    sender.send_replace(entry.version());
                }
            })
        };

        let focus = revalidate_on_focus.then(|| {
            let registry = self.focus().clone();
            let revalidator =
                self.focus_revalidator(entry.shared_key(), fetcher.clone(), dedup_interval);
            let token = registry.register(key, revalidator);
            (registry, token)
        });

        tracing::trace!(key, revalidate_on_focus, revalidate_on_bind, "Binding key");
        let initial = revalidate_on_bind.then(|| revalidate::revalidate(&entry, dedup_interval));

        Ok(Binding {
            bound: Some(Bound {
                entry,
                fetcher,
                dedup_interval,
                changes,
                focus,
                initial: Mutex::new(initial),
                _subscription: subscription,
            }),
        })
    }
}
