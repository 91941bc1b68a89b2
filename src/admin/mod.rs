//! The admin dashboard's data layer: keys, hooks and mutation policy.

pub mod auth;
pub mod dashboard;
pub mod hooks;
pub mod keys;
pub mod policy;

pub use auth::Session;
pub use dashboard::{DashboardStats, DashboardWatcher};
pub use hooks::AdminQueries;
