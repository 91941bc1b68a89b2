//! Client-side cache of server reads.
//!
//! Inspired by TanStack Query: reads are bound to a structured [`QueryKey`],
//! concurrent reads of the same key share one fetch, values go stale and are
//! refetched, observers poll on an interval, and [`Mutation`]s declare which
//! entries they invalidate or overwrite on success.
//!
//! # Example
//!
//! ```ignore
//! let client = QueryClient::default();
//! let api = api.clone();
//! let stats = QueryDef::new(QueryKey::resource_only(QUOTE_STATS), move || {
//!   let api = api.clone();
//!   async move { api.quote_stats().await }
//! });
//!
//! // One-shot read
//! let state = client.query(&stats).await;
//!
//! // Mounted consumer
//! let mut observer = client.observe(stats);
//! let result = observer.changed().await;
//! ```

mod client;
mod key;
mod mutation;
mod observer;
mod options;
mod state;

pub use client::{QueryClient, QueryDef};
pub use key::{KeyFilter, ParamValue, Params, QueryKey, Resource};
pub use mutation::{CacheEffects, Mutation};
pub use observer::QueryObserver;
pub use options::{QueryClientConfig, QueryOptions, RetryPolicy};
pub use state::{QueryResult, QueryState, QueryStatus};
