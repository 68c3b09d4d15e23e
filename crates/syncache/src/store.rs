use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;

use crate::config::Config;
use crate::entry::{Entry, Subscription};
use crate::error::{CacheError, CacheResult};
use crate::fetcher::Fetcher;
use crate::focus::{ActivityChannel, ActivityHost, FocusRegistry};
use crate::mutate::{self, MutateOptions, Mutation};
use crate::revalidate::{self, Revalidation};
use crate::utils::futures::ready_boxed;

type ErasedEntry = Arc<dyn Any + Send + Sync>;

static GLOBAL: OnceLock<Store> = OnceLock::new();

pub(crate) struct StoreInner {
    config: Config,
    entries: Mutex<HashMap<Arc<str>, ErasedEntry>>,
    focus: FocusRegistry,
}

/// A key-addressed cache shared by any number of consumers.
///
/// Every key maps to one [`Entry`] of a fixed value type, created lazily on first access and
/// kept for the lifetime of the store. Accessing a key with a value type other than the one it
/// was created with fails with [`CacheError::TypeMismatch`].
///
/// Stores are cheap to clone; clones share all entries. Most applications use the process-wide
/// [`global`](Self::global) store, while tests create isolated instances with [`new`](Self::new).
///
/// Any code holding a store can read and write every key. Do not share one store between
/// tenants.
#[derive(Clone)]
pub struct Store {
    pub(crate) inner: Arc<StoreInner>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("entries", &self.inner.entries.lock().len())
            .field("focus", &self.inner.focus)
            .finish()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Store {
    /// Creates a store whose focus registry listens to a private [`ActivityChannel`].
    ///
    /// Use [`with_host`](Self::with_host) to deliver activity signals to the store.
    pub fn new(config: Config) -> Self {
        Self::with_host(config, Arc::new(ActivityChannel::new()))
    }

    /// Creates a store that receives activity signals from `host`.
    pub fn with_host(config: Config, host: Arc<dyn ActivityHost>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                config,
                entries: Mutex::new(HashMap::new()),
                focus: FocusRegistry::new(host),
            }),
        }
    }

    /// The process-wide store, created with the default [`Config`] on first use.
    pub fn global() -> &'static Store {
        GLOBAL.get_or_init(Store::default)
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The registry of callbacks run on renewed host activity.
    pub fn focus(&self) -> &FocusRegistry {
        &self.inner.focus
    }

    /// Number of keys that have been accessed.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the entry of `key`, creating it if the key was never accessed.
    pub fn entry<T>(&self, key: &str) -> CacheResult<Arc<Entry<T>>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let mut entries = self.inner.entries.lock();
        if let Some(existing) = entries.get(key) {
            return Arc::clone(existing)
                .downcast::<Entry<T>>()
                .map_err(|_| CacheError::TypeMismatch { key: key.into() });
        }

        let key: Arc<str> = key.into();
        let entry = Arc::new(Entry::<T>::new(Arc::clone(&key)));
        tracing::trace!(key = &*key, "Creating cache entry");
        entries.insert(key, entry.clone());
        Ok(entry)
    }

    /// Returns the cached data of `key` without any side effects.
    ///
    /// Never creates an entry and never starts a fetch.
    pub fn peek<T>(&self, key: &str) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let erased = self.inner.entries.lock().get(key).cloned()?;
        match erased.downcast::<Entry<T>>() {
            Ok(entry) => entry.data(),
            Err(_) => {
                tracing::warn!(key, "Peeked a key that is cached with a different value type");
                None
            }
        }
    }

    /// Registers a change listener on `key`.
    pub fn subscribe<T, F>(&self, key: &str, listener: F) -> CacheResult<Subscription>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() + Send + Sync + 'static,
    {
        Ok(self.entry::<T>(key)?.subscribe(listener))
    }

    /// Assigns the fetcher used to revalidate `key` outside of any binding.
    pub fn set_fetcher<T>(&self, key: &str, fetcher: &Fetcher<T>) -> CacheResult<()>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.entry::<T>(key)?.set_fetcher(fetcher);
        Ok(())
    }

    /// Revalidates `key` with the configured dedup interval.
    ///
    /// Failures are propagated to the caller. See [`revalidate_with`](Self::revalidate_with).
    pub fn revalidate<T>(&self, key: &str) -> Revalidation<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.revalidate_with(key, self.inner.config.dedup_interval)
    }

    /// Revalidates `key`, serving data younger than `dedup_interval` from the cache.
    ///
    /// Joins the running fetch of `key` if there is one. Otherwise starts a new fetch with the
    /// fetcher bound to the key, which fails with [`CacheError::NoFetcherRegistered`] if there
    /// is none.
    ///
    /// # Panics
    ///
    /// Starting a fetch panics when called outside of a Tokio runtime.
    pub fn revalidate_with<T>(&self, key: &str, dedup_interval: Duration) -> Revalidation<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        match self.entry::<T>(key) {
            Ok(entry) => revalidate::revalidate(&entry, dedup_interval),
            Err(error) => ready_boxed(Err(error)),
        }
    }

    /// Applies a mutation to `key`, optionally reconciling with the source of truth afterwards.
    ///
    /// The new data is visible to every observer as soon as it is known, ahead of any
    /// reconciliation. Resolves to the data after the mutation, or after reconciliation if one
    /// was requested and succeeded.
    pub async fn mutate<T>(
        &self,
        key: &str,
        next: Mutation<T>,
        options: MutateOptions,
    ) -> CacheResult<Option<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let entry = self.entry::<T>(key)?;
        mutate::mutate(&entry, next, options).await
    }

    /// Builds the callback a binding registers for activity revalidation.
    ///
    /// The callback re-asserts `fetcher` and revalidates on the runtime that was current when it
    /// was built, so hosts may signal activity from any thread. Background revalidations never
    /// report failures, they only leave them on the entry.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a Tokio runtime.
    pub(crate) fn focus_revalidator<T>(
        &self,
        key: Arc<str>,
        fetcher: Fetcher<T>,
        dedup_interval: Duration,
    ) -> impl Fn() + Send + Sync + 'static
    where
        T: Clone + Send + Sync + 'static,
    {
        let store = Arc::downgrade(&self.inner);
        let runtime = Handle::current();
        move || {
            let Some(inner) = store.upgrade() else {
                return;
            };
            let _guard = runtime.enter();
            let entry = match (Store { inner }).entry::<T>(&key) {
                Ok(entry) => entry,
                Err(error) => {
                    tracing::debug!(key = &*key, error = %error, "Background revalidation failed");
                    return;
                }
            };
            entry.set_fetcher(&fetcher);

            let revalidation = revalidate::revalidate(&entry, dedup_interval);
            let key = Arc::clone(&key);
            drop(runtime.spawn(async move {
                if let Err(error) = revalidation.await {
                    tracing::debug!(key = &*key, error = %error, "Background revalidation failed");
                }
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::FutureExt;

    use super::*;

    #[test]
    fn test_peek_has_no_side_effects() {
        let store = Store::default();

        assert_eq!(store.peek::<u32>("/users"), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_entries_are_created_once() {
        let store = Store::default();

        let first = store.entry::<u32>("/users").unwrap();
        let second = store.entry::<u32>("/users").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_type_mismatch() {
        let store = Store::default();
        store.entry::<u32>("/users").unwrap();

        let err = store.entry::<String>("/users").unwrap_err();
        assert!(matches!(err, CacheError::TypeMismatch { ref key } if &**key == "/users"));
        assert_eq!(store.peek::<String>("/users"), None);
    }

    #[test]
    fn test_clones_share_entries() {
        let store = Store::default();
        let clone = store.clone();

        store
            .mutate("/n", Mutation::value(1u32), MutateOptions::default())
            .now_or_never()
            .unwrap()
            .unwrap();
        assert_eq!(clone.peek::<u32>("/n"), Some(1));
    }

    #[test]
    fn test_global_store_is_shared() {
        assert!(std::ptr::eq(Store::global(), Store::global()));
    }

    #[tokio::test]
    async fn test_missing_fetcher() {
        let store = Store::default();

        let err = store.revalidate::<u32>("/nothing").await.unwrap_err();
        assert!(matches!(err, CacheError::NoFetcherRegistered(_)));
    }

    #[test]
    fn test_subscription_lifecycle() {
        let store = Store::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let subscription = {
            let calls = Arc::clone(&calls);
            store
                .subscribe::<u32, _>("/n", move || {
                    calls.fetch_add(1, Ordering::Relaxed);
                })
                .unwrap()
        };

        let mutate = |value| {
            store
                .mutate("/n", Mutation::value(value), MutateOptions::default())
                .now_or_never()
                .unwrap()
                .unwrap()
        };

        mutate(2u32);
        assert_eq!(calls.load(Ordering::Relaxed), 1);

        subscription.unsubscribe();
        mutate(3);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert_eq!(store.peek::<u32>("/n"), Some(3));
    }
}
