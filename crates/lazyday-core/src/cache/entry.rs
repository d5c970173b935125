use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::api::ApiError;

/// How long fetched data counts as fresh by default.
pub const DEFAULT_STALE_TIME: Duration = Duration::from_secs(60);

/// How long an unobserved entry is kept by default.
pub const DEFAULT_CACHE_TIME: Duration = Duration::from_secs(90);

/// Cache tuning shared by every entry of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Data older than this is refetched on the next read
    pub stale_time: Duration,
    /// Entries without observers are evicted after this long
    pub cache_time: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_time: DEFAULT_STALE_TIME,
            cache_time: DEFAULT_CACHE_TIME,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// Nothing fetched yet and nothing in flight
    Idle,
    /// First fetch in flight, no data yet
    Loading,
    Success,
    /// Last fetch failed; `data` still holds the last good value
    Error,
}

/// Point-in-time view of one cache entry.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub data: Option<V>,
    pub status: QueryStatus,
    pub last_updated: Option<DateTime<Utc>>,
    pub error: Option<Arc<ApiError>>,
    pub is_fetching: bool,
    pub is_stale: bool,
    pub is_invalidated: bool,
    pub observers: usize,
    pub stale_after: Duration,
    pub evict_after: Duration,
}

impl<V> CacheEntry<V> {
    pub(crate) fn missing(config: &CacheConfig) -> Self {
        Self {
            data: None,
            status: QueryStatus::Idle,
            last_updated: None,
            error: None,
            is_fetching: false,
            is_stale: true,
            is_invalidated: false,
            observers: 0,
            stale_after: config.stale_time,
            evict_after: config.cache_time,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }

    pub fn is_loading(&self) -> bool {
        self.status == QueryStatus::Loading
    }
}
