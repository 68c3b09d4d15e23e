use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

type FetchFn<T> = dyn Fn(&str) -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync;

/// A function producing the value of a key.
///
/// Fetchers are cheap to clone, and clones share an identity: two handles are the
/// [same](Fetcher::same) fetcher if one was cloned from the other. The cache uses this identity
/// to tell a binding that re-asserts its own fetcher apart from one that brings a different
/// fetcher for a key that is already bound.
///
/// The cache is transport agnostic; see [`JsonFetcher`](crate::http::JsonFetcher) for a
/// ready-made HTTP implementation.
pub struct Fetcher<T> {
    inner: Arc<FetchFn<T>>,
}

impl<T> Clone for Fetcher<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Fetcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Fetcher")
            .field(&Arc::as_ptr(&self.inner).cast::<()>())
            .finish()
    }
}

impl<T: 'static> Fetcher<T> {
    /// Creates a fetcher from a function returning a future.
    ///
    /// The function is invoked synchronously when a fetch starts. The returned future must not
    /// borrow the key; clone it into the future if needed.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(&str) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            inner: Arc::new(move |key: &str| f(key).boxed()),
        }
    }
}

impl<T> Fetcher<T> {
    /// Starts fetching the value of `key`.
    pub fn fetch(&self, key: &str) -> BoxFuture<'static, anyhow::Result<T>> {
        (self.inner)(key)
    }

    /// Returns `true` if both handles refer to the same fetcher.
    pub fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
