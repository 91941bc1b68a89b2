//! Admin client for the Daily Quote service.
//!
//! Two independent pieces live here:
//! - [`query`]: a client-side cache of server reads with fetch deduplication,
//!   staleness, polling and mutation-driven invalidation.
//! - [`worker`]: a cache-first offline worker with versioned stores.
//!
//! [`api`] and [`admin`] wire the cache to the Daily Quote backend.

pub mod admin;
pub mod api;
pub mod config;
pub mod logging;
pub mod query;
pub mod worker;
