//! Progress engine: log polling, the tracker driver and result caching.
mod cache;
mod fetch;
mod persist;
mod request;
mod tracker;
mod types;

pub use cache::{
    generate_key, CacheConfig, CacheEntry, CacheManager, CacheNamespaces, CacheStats, Clock,
    WarmupItem,
};
pub use fetch::{HttpLogSource, LogFetchSettings, LogSource};
pub use persist::{ensure_storage_dir, write_atomically, PersistError};
pub use request::CachedJsonClient;
pub use tracker::{ChannelProgressSink, ProgressSink, Tracker, TrackerOptions};
pub use types::{FailureKind, FetchError, TrackerEvent};
