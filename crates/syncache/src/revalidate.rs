//! Decides whether a revalidation is served from cache, joins a running fetch, or starts a
//! new one.
//!
//! Two independent mechanisms keep the number of fetches down:
//!
//! - *Coalescing*: while a fetch for a key is running, every revalidation of that key joins it
//!   and observes the identical outcome.
//! - *Deduplication*: for a window after a successful fetch or mutation, revalidations are
//!   answered with the cached data.

use std::sync::Arc;
use std::time::Duration;

use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt, TryFutureExt};
use tokio::time::Instant;

use crate::entry::{Entry, FetchChannel, InFlight};
use crate::error::{CacheError, CacheResult};
use crate::utils::futures::{CallOnDrop, ready_boxed};

/// The eventual outcome of a revalidation.
///
/// The fetch itself runs on a spawned task, so dropping this future does not cancel it.
pub type Revalidation<T> = BoxFuture<'static, CacheResult<T>>;

/// Revalidates `entry`, treating data younger than `dedup_interval` as fresh.
///
/// NOTE: This function itself is *not* `async`, because the decision has to be taken against
/// the entry state at call time and a new fetch is started eagerly, even if the result is
/// never awaited.
///
/// # Panics
///
/// Starting a fetch panics when called outside of a Tokio runtime.
pub(crate) fn revalidate<T>(entry: &Arc<Entry<T>>, dedup_interval: Duration) -> Revalidation<T>
where
    T: Clone + Send + Sync + 'static,
{
    let mut state = entry.lock();

    if let Some(ref in_flight) = state.in_flight {
        metric!(counter("revalidate.coalesced") += 1);
        tracing::trace!(key = entry.key(), "Joining in-flight fetch");
        return join(entry, in_flight.channel.clone());
    }

    if let (Some(data), Some(fetched_at)) = (&state.data, state.fetched_at) {
        if fetched_at.elapsed() < dedup_interval {
            metric!(counter("revalidate.fresh") += 1);
            tracing::trace!(key = entry.key(), "Serving fresh data from cache");
            return ready_boxed(Ok(data.clone()));
        }
    }

    let Some(fetcher) = state.fetcher.clone() else {
        metric!(counter("revalidate.no_fetcher") += 1);
        return ready_boxed(Err(CacheError::NoFetcherRegistered(entry.shared_key())));
    };

    state.generation += 1;
    let generation = state.generation;
    let (sender, receiver) = oneshot::channel();
    let channel = receiver.shared();
    state.in_flight = Some(InFlight {
        generation,
        channel: channel.clone(),
    });
    state.error = None;
    entry.notify(state);

    // Releases the in-flight slot if the fetch is dropped before it settles, so the entry does
    // not stay validating forever.
    let interrupted_token = {
        let entry = Arc::clone(entry);
        CallOnDrop::new(move || entry.interrupt(generation))
    };

    tracing::trace!(key = entry.key(), generation, "Starting fetch");
    let computation = fetcher.fetch(entry.key());

    let task = {
        let entry = Arc::clone(entry);
        async move {
            let result = computation.await;
            let result = entry.settle(generation, result);
            drop(interrupted_token);
            sender.send(result).ok();
        }
    };
    tokio::spawn(task);

    join(entry, channel)
}

fn join<T>(entry: &Entry<T>, channel: FetchChannel<T>) -> Revalidation<T>
where
    T: Clone + Send + Sync + 'static,
{
    let key = entry.shared_key();
    channel
        .unwrap_or_else(move |_cancelled| Err(CacheError::Interrupted(key)))
        .boxed()
}

impl<T: Clone> Entry<T> {
    /// Writes the outcome of the fetch `generation` into the entry.
    fn settle(&self, generation: u64, result: anyhow::Result<T>) -> CacheResult<T> {
        let mut state = self.lock();
        if state
            .in_flight
            .as_ref()
            .is_some_and(|in_flight| in_flight.generation == generation)
        {
            state.in_flight = None;
        }

        let result = match result {
            Ok(data) => {
                metric!(counter("revalidate.fetch") += 1, "status" => "ok");
                state.data = Some(data.clone());
                state.fetched_at = Some(Instant::now());
                Ok(data)
            }
            Err(error) => {
                metric!(counter("revalidate.fetch") += 1, "status" => "error");
                let error = CacheError::fetch(error);
                tracing::debug!(key = self.key(), error = %error, "Fetch failed");
                state.error = Some(error.clone());
                Err(error)
            }
        };
        self.notify(state);
        result
    }
}

impl<T> Entry<T> {
    /// Releases the in-flight slot of an abandoned fetch.
    ///
    /// Does nothing if the fetch already settled or a newer fetch took its place.
    fn interrupt(&self, generation: u64) {
        let mut state = self.lock();
        if !state
            .in_flight
            .as_ref()
            .is_some_and(|in_flight| in_flight.generation == generation)
        {
            return;
        }
        tracing::debug!(key = self.key(), generation, "Fetch was interrupted");
        state.in_flight = None;
        state.error = Some(CacheError::Interrupted(self.shared_key()));
        self.notify(state);
    }
}
