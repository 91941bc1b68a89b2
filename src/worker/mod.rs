//! Offline cache worker: cache-first interception over versioned stores.

pub mod network;
pub mod request;
pub mod storage;
pub mod sw;

pub use network::{HttpNetwork, Network};
pub use request::{Destination, FetchRequest, RequestMode, ResponseType, StoredResponse};
pub use storage::{CacheStorage, MemoryCacheStorage, SqliteCacheStorage, StoredEntry};
pub use sw::{
  FetchOutcome, Notification, Notifier, OfflineWorker, PushPayload, SyncOutcome, SyncTask,
  WorkerSettings, WorkerState,
};
