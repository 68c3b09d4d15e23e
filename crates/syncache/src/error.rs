use std::sync::Arc;

use thiserror::Error;

/// An error produced by the cache.
///
/// Errors are cloned into every caller that joined a coalesced fetch and are kept on the
/// [`Entry`](crate::Entry) for observers, which is why the underlying causes are reference
/// counted.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The bound fetcher failed.
    #[error("fetch failed: {0:#}")]
    Fetch(Arc<anyhow::Error>),
    /// A revalidation was requested for a key that never had a fetcher bound.
    ///
    /// This is a programming error rather than a transient failure.
    #[error("no fetcher registered for key: {0}")]
    NoFetcherRegistered(Arc<str>),
    /// The value handed to a mutation could not be computed.
    #[error("failed to compute mutation: {0:#}")]
    MutateCompute(Arc<anyhow::Error>),
    /// The key is already cached with a value of a different type.
    #[error("key {key} is cached with a different value type")]
    TypeMismatch { key: Arc<str> },
    /// A different fetcher is still bound to the key by a live binding.
    #[error("key {key} is bound to a different fetcher")]
    FetcherConflict { key: Arc<str> },
    /// The fetch task was dropped before it could settle.
    #[error("revalidation of key {0} was interrupted")]
    Interrupted(Arc<str>),
}

impl CacheError {
    pub(crate) fn fetch(error: anyhow::Error) -> Self {
        Self::Fetch(Arc::new(error))
    }

    pub(crate) fn mutate_compute(error: anyhow::Error) -> Self {
        Self::MutateCompute(Arc::new(error))
    }

    /// Returns `true` if this error is a failure reported by the fetcher.
    pub fn is_fetch(&self) -> bool {
        matches!(self, Self::Fetch(_))
    }
}

/// The result of a cache operation.
pub type CacheResult<T> = Result<T, CacheError>;
