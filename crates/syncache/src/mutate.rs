use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use tokio::time::Instant;

use crate::entry::Entry;
use crate::error::{CacheError, CacheResult};
use crate::revalidate::revalidate;

type Updater<T> = Box<dyn FnOnce(Option<T>) -> anyhow::Result<T> + Send>;
type AsyncUpdater<T> = Box<dyn FnOnce(Option<T>) -> BoxFuture<'static, anyhow::Result<T>> + Send>;

/// The next value of an entry, as handed to [`Store::mutate`](crate::Store::mutate).
pub enum Mutation<T> {
    /// Keep the current data.
    ///
    /// The mutation still clears the error, refreshes the timestamp and notifies listeners,
    /// which makes it useful as a "refresh" combined with [`MutateOptions::revalidate`].
    Unchanged,
    /// Replace the data with a known value.
    Value(T),
    /// Replace the data with a value that is still being computed.
    Pending(BoxFuture<'static, anyhow::Result<T>>),
    /// Compute the next value from the current data.
    Update(Updater<T>),
    /// Compute the next value from the current data, asynchronously.
    UpdateAsync(AsyncUpdater<T>),
}

impl<T> Mutation<T> {
    pub fn value(value: T) -> Self {
        Self::Value(value)
    }

    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::Pending(future.boxed())
    }

    pub fn update<F>(f: F) -> Self
    where
        F: FnOnce(Option<T>) -> anyhow::Result<T> + Send + 'static,
    {
        Self::Update(Box::new(f))
    }

    pub fn update_async<F, Fut>(f: F) -> Self
    where
        F: FnOnce(Option<T>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::UpdateAsync(Box::new(move |current| f(current).boxed()))
    }
}

impl<T> fmt::Debug for Mutation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Unchanged => "Unchanged",
            Self::Value(_) => "Value",
            Self::Pending(_) => "Pending",
            Self::Update(_) => "Update",
            Self::UpdateAsync(_) => "UpdateAsync",
        };
        f.write_str(kind)
    }
}

/// Options for a mutation.
#[derive(Clone, Copy, Debug, Default)]
pub struct MutateOptions {
    /// Revalidate right after applying the mutation to reconcile with the source of truth.
    ///
    /// The reconciliation fetch ignores the freshness the mutation itself just established, but
    /// joins a fetch that is already running. Its failure is recorded on the entry and not
    /// returned to the caller.
    pub revalidate: bool,
}

impl MutateOptions {
    /// Options that reconcile with the source of truth after mutating.
    pub fn revalidate() -> Self {
        Self { revalidate: true }
    }
}

/// Applies `next` to `entry`.
///
/// Pending values are awaited first. Once the value is known, it is written to the entry and
/// listeners are notified in one step, before any reconciliation starts.
pub(crate) async fn mutate<T>(
    entry: &Arc<Entry<T>>,
    next: Mutation<T>,
    options: MutateOptions,
) -> CacheResult<Option<T>>
where
    T: Clone + Send + Sync + 'static,
{
    let value = match next {
        Mutation::Unchanged => None,
        Mutation::Value(value) => Some(value),
        Mutation::Pending(future) => Some(future.await.map_err(CacheError::mutate_compute)?),
        Mutation::Update(f) => Some(f(entry.data()).map_err(CacheError::mutate_compute)?),
        Mutation::UpdateAsync(f) => {
            Some(f(entry.data()).await.map_err(CacheError::mutate_compute)?)
        }
    };

    let data = entry.apply(value);
    metric!(counter("mutate") += 1, "revalidate" => if options.revalidate { "true" } else { "false" });

    if !options.revalidate {
        return Ok(data);
    }

    match revalidate(entry, Duration::ZERO).await {
        Ok(data) => Ok(Some(data)),
        Err(error) => {
            tracing::debug!(key = entry.key(), error = %error, "Reconciliation after mutation failed");
            // the engine records failed and interrupted fetches itself
            if matches!(error, CacheError::NoFetcherRegistered(_)) {
                entry.record_error(error);
            }
            Ok(entry.data())
        }
    }
}

impl<T: Clone> Entry<T> {
    /// Writes a mutation into the entry and returns the resulting data.
    fn apply(&self, value: Option<T>) -> Option<T> {
        let mut state = self.lock();
        if let Some(value) = value {
            state.data = Some(value);
        }
        state.error = None;
        state.fetched_at = Some(Instant::now());
        let data = state.data.clone();
        self.notify(state);
        data
    }
}
