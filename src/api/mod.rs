//! Daily Quote backend API.

pub mod client;
pub mod types;

pub use client::ApiClient;
