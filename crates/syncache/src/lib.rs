//! A key-addressed data cache implementing stale-while-revalidate.
//!
//! Consumers [bind](Store::bind) to a key together with a [`Fetcher`] that produces its value.
//! The [`Store`] keeps one [`Entry`] per key and makes sure that:
//!
//! - concurrent revalidations of a key share a single fetch,
//! - revalidations within a short window after fresh data arrived are answered from the cache,
//! - every consumer of a key observes the same state, and is notified on every change,
//! - [mutations](Store::mutate) are visible to all consumers immediately, optionally followed by
//!   a fetch that reconciles with the source of truth.
//!
//! ```no_run
//! # async fn example() -> syncache::CacheResult<()> {
//! use syncache::{BindOptions, Fetcher, Store};
//!
//! let store = Store::global();
//! let fetcher = Fetcher::new(|_key: &str| async { Ok(vec![1, 2, 3]) });
//! let mut binding = store.bind("/numbers", fetcher, BindOptions::default())?;
//!
//! while let Some(snapshot) = binding.changed().await {
//!     println!("{:?} (validating: {})", snapshot.data, snapshot.is_validating);
//! }
//! # Ok(())
//! # }
//! ```

#[macro_use]
pub mod metrics;

mod binding;
pub mod config;
mod entry;
mod error;
mod fetcher;
pub mod focus;
pub mod http;
pub mod logging;
mod mutate;
mod revalidate;
mod store;
pub mod utils;

pub use binding::{BindOptions, Binding};
pub use config::Config;
pub use entry::{Entry, Snapshot, Subscription};
pub use error::{CacheError, CacheResult};
pub use fetcher::Fetcher;
pub use focus::{ActivityChannel, ActivityEvent, ActivityHost, ActivityKind, FocusRegistry};
pub use mutate::{MutateOptions, Mutation};
pub use revalidate::Revalidation;
pub use store::Store;
