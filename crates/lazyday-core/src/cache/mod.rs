//! In-memory query cache.
//!
//! `CacheStore` keeps one entry per structured key. Each entry holds the last
//! good data, a status, and bookkeeping for staleness, observers and the
//! in-flight fetch. Entries are:
//!
//! - fetched through a fetcher registered per entity, de-duplicated per key
//! - considered stale after `stale_time` or once invalidated
//! - evicted `cache_time` after their last observer goes away
//!
//! The store never returns errors: a failed fetch is recorded in the entry's
//! status while the previous data stays readable.

pub mod entry;
pub mod key;
pub mod query;
pub mod store;

pub use entry::{CacheConfig, CacheEntry, QueryStatus};
pub use key::{CacheKey, KeyFilter};
pub use query::{query_keys, QueryCache, QueryData, QueryFilter, QueryKey, QueryObserver};
pub use store::{CacheEvent, CacheStore, FetchFuture, Fetcher, MutationGuard, Observer, WeakCacheStore};
