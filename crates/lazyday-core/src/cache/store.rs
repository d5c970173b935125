//! The keyed query cache.
//!
//! All entry state sits behind one mutex that is only ever held for
//! synchronous bookkeeping, never across an `.await`. Network work happens in
//! spawned tasks that report back through `settle`, which drops any result
//! whose fetch generation is no longer current.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use chrono::{DateTime, Utc};
use futures::future::{AbortHandle, Abortable, BoxFuture, Shared};
use futures::FutureExt;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::api::ApiError;

use super::entry::{CacheConfig, CacheEntry, QueryStatus};
use super::key::{CacheKey, KeyFilter};

/// Capacity of the change-notification channel
const EVENT_CHANNEL_CAPACITY: usize = 128;

pub type FetchFuture<V> = BoxFuture<'static, Result<V, ApiError>>;

/// Produces the data for one key. Registered once per entity.
pub trait Fetcher<K, V>: Send + Sync {
    fn fetch(&self, key: K) -> FetchFuture<V>;
}

impl<K, V, F, Fut> Fetcher<K, V> for F
where
    F: Fn(K) -> Fut + Send + Sync,
    Fut: Future<Output = Result<V, ApiError>> + Send + 'static,
{
    fn fetch(&self, key: K) -> FetchFuture<V> {
        self(key).boxed()
    }
}

/// Change notifications, for re-rendering and for routing fetch errors.
#[derive(Debug, Clone)]
pub enum CacheEvent<K> {
    Updated(K),
    FetchFailed { key: K, error: Arc<ApiError> },
    Invalidated(K),
    Removed(K),
    Evicted(K),
}

struct InFlight {
    generation: u64,
    abort: AbortHandle,
    done: Shared<BoxFuture<'static, ()>>,
}

struct Slot<V> {
    data: Option<V>,
    status: QueryStatus,
    fetched_at: Option<Instant>,
    last_updated: Option<DateTime<Utc>>,
    error: Option<Arc<ApiError>>,
    invalidated: bool,
    observers: usize,
    fetch: Option<InFlight>,
    eviction: Option<u64>,
}

impl<V> Slot<V> {
    fn new() -> Self {
        Self {
            data: None,
            status: QueryStatus::Idle,
            fetched_at: None,
            last_updated: None,
            error: None,
            invalidated: false,
            observers: 0,
            fetch: None,
            eviction: None,
        }
    }

    fn is_stale(&self, config: &CacheConfig) -> bool {
        if self.invalidated {
            return true;
        }
        match self.fetched_at {
            Some(at) => at.elapsed() >= config.stale_time,
            None => true,
        }
    }

    fn needs_fetch(&self, config: &CacheConfig) -> bool {
        self.fetch.is_none() && self.is_stale(config)
    }

    fn store(&mut self, value: V) {
        self.data = Some(value);
        self.status = QueryStatus::Success;
        self.fetched_at = Some(Instant::now());
        self.last_updated = Some(Utc::now());
        self.error = None;
        self.invalidated = false;
    }

    /// Abort the in-flight fetch, if any. Its late result will not match.
    fn abort_fetch(&mut self) -> bool {
        match self.fetch.take() {
            Some(in_flight) => {
                in_flight.abort.abort();
                if self.status == QueryStatus::Loading {
                    self.status = QueryStatus::Idle;
                }
                true
            }
            None => false,
        }
    }
}

impl<V: Clone> Slot<V> {
    fn snapshot(&self, config: &CacheConfig) -> CacheEntry<V> {
        CacheEntry {
            data: self.data.clone(),
            status: self.status,
            last_updated: self.last_updated,
            error: self.error.clone(),
            is_fetching: self.fetch.is_some(),
            is_stale: self.is_stale(config),
            is_invalidated: self.invalidated,
            observers: self.observers,
            stale_after: config.stale_time,
            evict_after: config.cache_time,
        }
    }
}

struct State<K, V> {
    entries: HashMap<K, Slot<V>>,
}

struct Inner<K, V> {
    config: CacheConfig,
    state: Mutex<State<K, V>>,
    fetchers: RwLock<HashMap<&'static str, Arc<dyn Fetcher<K, V>>>>,
    events: broadcast::Sender<CacheEvent<K>>,
    generation: AtomicU64,
    mutations: Arc<AtomicUsize>,
}

/// Process-wide cache of query results.
///
/// Cloning is cheap; every clone shares the same entries.
pub struct CacheStore<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for CacheStore<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Non-owning handle, for fetchers that need to read the store they live in.
pub struct WeakCacheStore<K, V> {
    inner: Weak<Inner<K, V>>,
}

impl<K, V> Clone for WeakCacheStore<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<K, V> WeakCacheStore<K, V> {
    pub fn upgrade(&self) -> Option<CacheStore<K, V>> {
        self.inner.upgrade().map(|inner| CacheStore { inner })
    }
}

impl<K, V> CacheStore<K, V>
where
    K: CacheKey,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(config: CacheConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(State {
                    entries: HashMap::new(),
                }),
                fetchers: RwLock::new(HashMap::new()),
                events,
                generation: AtomicU64::new(0),
                mutations: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn downgrade(&self) -> WeakCacheStore<K, V> {
        WeakCacheStore {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Register the fetch function used for every key of `entity`.
    pub fn register<F>(&self, entity: &'static str, fetcher: F)
    where
        F: Fetcher<K, V> + 'static,
    {
        debug!(entity, "Registering fetcher");
        self.inner
            .fetchers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entity, Arc::new(fetcher));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent<K>> {
        self.inner.events.subscribe()
    }

    // ===== Reads =====

    /// Current entry for `key`, starting a background fetch if it is stale or absent.
    pub fn read(&self, key: &K) -> CacheEntry<V> {
        let mut state = self.lock();
        let needs_fetch = state
            .entries
            .get(key)
            .map_or(true, |slot| slot.needs_fetch(&self.inner.config));
        if needs_fetch {
            self.start_fetch(&mut state, key);
        }
        self.snapshot(&state, key)
    }

    /// Current entry for `key` without triggering a fetch.
    pub fn peek(&self, key: &K) -> CacheEntry<V> {
        let state = self.lock();
        self.snapshot(&state, key)
    }

    /// Cached data for `key`, if any, without triggering a fetch.
    pub fn get_data(&self, key: &K) -> Option<V> {
        self.lock().entries.get(key).and_then(|slot| slot.data.clone())
    }

    /// Wait until `key` has settled, fetching first if it is stale or absent.
    ///
    /// An in-flight fetch is joined rather than duplicated. Never fails; the
    /// outcome is in the returned entry's status.
    pub async fn fetch(&self, key: &K) -> CacheEntry<V> {
        let mut started = false;
        loop {
            let pending = {
                let mut state = self.lock();
                let in_flight = state
                    .entries
                    .get(key)
                    .and_then(|slot| slot.fetch.as_ref())
                    .map(|f| f.done.clone());
                match in_flight {
                    Some(done) => Some(done),
                    None if !started => {
                        let needs_fetch = state
                            .entries
                            .get(key)
                            .map_or(true, |slot| slot.needs_fetch(&self.inner.config));
                        if needs_fetch {
                            self.start_fetch(&mut state, key)
                        } else {
                            None
                        }
                    }
                    None => None,
                }
            };

            match pending {
                Some(done) => {
                    started = true;
                    done.await;
                }
                None => return self.peek(key),
            }
        }
    }

    /// Populate `key` ahead of any observer needing it.
    pub async fn prefetch(&self, key: &K) {
        debug!(key = %key, "Prefetching");
        let _ = self.fetch(key).await;
    }

    /// Register an observer for `key` for as long as the guard lives.
    pub fn observe(&self, key: K) -> Observer<K, V> {
        {
            let mut state = self.lock();
            let slot = state.entries.entry(key.clone()).or_insert_with(Slot::new);
            slot.observers += 1;
            slot.eviction = None;
            debug!(key = %key, observers = slot.observers, "Observer added");
        }
        let observer = Observer {
            store: self.clone(),
            key,
        };
        let _ = observer.entry();
        observer
    }

    // ===== Mutations =====

    /// Replace the data for `key` and mark it fresh.
    pub fn write(&self, key: &K, value: V) {
        {
            let mut state = self.lock();
            let slot = state.entries.entry(key.clone()).or_insert_with(Slot::new);
            slot.store(value);
            if slot.observers == 0 {
                self.schedule_eviction(slot, key);
            }
        }
        debug!(key = %key, "Cache write");
        self.emit(CacheEvent::Updated(key.clone()));
    }

    /// Mark matching entries stale; observed ones are refetched right away.
    pub fn invalidate(&self, filter: &KeyFilter<K>) {
        let mut events = Vec::new();
        {
            let mut state = self.lock();
            let keys: Vec<K> = state
                .entries
                .keys()
                .filter(|key| filter.matches(key))
                .cloned()
                .collect();

            for key in keys {
                let observed = match state.entries.get_mut(&key) {
                    Some(slot) => {
                        slot.invalidated = true;
                        if slot.observers > 0 {
                            slot.abort_fetch();
                        }
                        slot.observers > 0
                    }
                    None => continue,
                };
                if observed {
                    self.start_fetch(&mut state, &key);
                }
                debug!(key = %key, refetching = observed, "Invalidated");
                events.push(CacheEvent::Invalidated(key));
            }
        }
        for event in events {
            self.emit(event);
        }
    }

    /// Abort in-flight fetches for matching keys and discard their results.
    pub fn cancel(&self, filter: &KeyFilter<K>) {
        let mut state = self.lock();
        for (key, slot) in state.entries.iter_mut() {
            if filter.matches(key) && slot.abort_fetch() {
                debug!(key = %key, "Cancelled in-flight fetch");
            }
        }
    }

    /// Drop the data of matching entries.
    ///
    /// Unobserved entries disappear; observed ones are reset to empty but keep
    /// their observer count, so they are refetched on the next read.
    pub fn remove(&self, filter: &KeyFilter<K>) {
        let removed: Vec<K> = {
            let mut state = self.lock();
            let keys: Vec<K> = state
                .entries
                .keys()
                .filter(|key| filter.matches(key))
                .cloned()
                .collect();
            for key in &keys {
                let Some(slot) = state.entries.get_mut(key) else {
                    continue;
                };
                slot.abort_fetch();
                if slot.observers > 0 {
                    let observers = slot.observers;
                    *slot = Slot::new();
                    slot.observers = observers;
                } else {
                    state.entries.remove(key);
                }
            }
            keys
        };
        for key in removed {
            debug!(key = %key, "Removed");
            self.emit(CacheEvent::Removed(key));
        }
    }

    // ===== Activity counters =====

    /// Number of fetches currently in flight.
    pub fn is_fetching(&self) -> usize {
        self.lock()
            .entries
            .values()
            .filter(|slot| slot.fetch.is_some())
            .count()
    }

    /// Number of mutations currently running.
    pub fn is_mutating(&self) -> usize {
        self.inner.mutations.load(Ordering::SeqCst)
    }

    /// Count a mutation as running until the guard is dropped.
    pub fn begin_mutation(&self) -> MutationGuard {
        self.inner.mutations.fetch_add(1, Ordering::SeqCst);
        MutationGuard {
            counter: Arc::clone(&self.inner.mutations),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ===== Internals =====

    fn lock(&self) -> MutexGuard<'_, State<K, V>> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self, state: &State<K, V>, key: &K) -> CacheEntry<V> {
        match state.entries.get(key) {
            Some(slot) => slot.snapshot(&self.inner.config),
            None => CacheEntry::missing(&self.inner.config),
        }
    }

    fn fetcher_for(&self, key: &K) -> Option<Arc<dyn Fetcher<K, V>>> {
        self.inner
            .fetchers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key.entity())
            .cloned()
    }

    fn emit(&self, event: CacheEvent<K>) {
        // No receivers is fine
        let _ = self.inner.events.send(event);
    }

    /// Start a fetch for `key` unless one is already running.
    ///
    /// The fetcher itself is invoked inside the spawned task so that it may
    /// read the store without contending for the lock held here.
    fn start_fetch(
        &self,
        state: &mut State<K, V>,
        key: &K,
    ) -> Option<Shared<BoxFuture<'static, ()>>> {
        if let Some(in_flight) = state.entries.get(key).and_then(|slot| slot.fetch.as_ref()) {
            return Some(in_flight.done.clone());
        }

        let Some(fetcher) = self.fetcher_for(key) else {
            warn!(key = %key, entity = key.entity(), "No fetcher registered");
            return None;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(key = %key, "No async runtime available; fetch skipped");
            return None;
        };

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (abort, registration) = AbortHandle::new_pair();
        let fetch_key = key.clone();
        let request = Abortable::new(async move { fetcher.fetch(fetch_key).await }, registration);

        let store = self.clone();
        let settle_key = key.clone();
        let task = runtime.spawn(async move {
            let result = match request.await {
                Ok(result) => result,
                Err(_aborted) => Err(ApiError::Cancelled),
            };
            store.settle(&settle_key, generation, result);
        });
        let done = async move {
            let _ = task.await;
        }
        .boxed()
        .shared();

        let slot = state.entries.entry(key.clone()).or_insert_with(Slot::new);
        if slot.data.is_none() {
            slot.status = QueryStatus::Loading;
        }
        slot.fetch = Some(InFlight {
            generation,
            abort,
            done: done.clone(),
        });
        debug!(key = %key, generation, "Fetch started");
        Some(done)
    }

    /// Apply the result of fetch `generation`, unless it has been superseded.
    fn settle(&self, key: &K, generation: u64, result: Result<V, ApiError>) {
        let event = {
            let mut state = self.lock();
            let Some(slot) = state.entries.get_mut(key) else {
                debug!(key = %key, generation, "Entry gone before fetch settled");
                return;
            };
            match &slot.fetch {
                Some(in_flight) if in_flight.generation == generation => {}
                _ => {
                    debug!(key = %key, generation, "Discarding result of superseded fetch");
                    return;
                }
            }
            slot.fetch = None;

            let event = match result {
                Ok(value) => {
                    slot.store(value);
                    debug!(key = %key, generation, "Fetch succeeded");
                    Some(CacheEvent::Updated(key.clone()))
                }
                Err(e) if e.is_cancelled() => {
                    slot.status = if slot.data.is_some() {
                        QueryStatus::Success
                    } else {
                        QueryStatus::Idle
                    };
                    None
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Fetch failed; keeping last data");
                    let error = Arc::new(e);
                    slot.status = QueryStatus::Error;
                    slot.error = Some(Arc::clone(&error));
                    Some(CacheEvent::FetchFailed {
                        key: key.clone(),
                        error,
                    })
                }
            };

            if slot.observers == 0 {
                self.schedule_eviction(slot, key);
            }
            event
        };

        if let Some(event) = event {
            self.emit(event);
        }
    }

    fn schedule_eviction(&self, slot: &mut Slot<V>, key: &K) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let ticket = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        slot.eviction = Some(ticket);

        let store = self.downgrade();
        let key = key.clone();
        let delay = self.inner.config.cache_time;
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(store) = store.upgrade() {
                store.evict_if_unobserved(&key, ticket);
            }
        });
    }

    fn evict_if_unobserved(&self, key: &K, ticket: u64) {
        let evicted = {
            let mut state = self.lock();
            let evictable = state.entries.get(key).is_some_and(|slot| {
                slot.observers == 0 && slot.eviction == Some(ticket) && slot.fetch.is_none()
            });
            if evictable {
                state.entries.remove(key);
            }
            evictable
        };
        if evicted {
            debug!(key = %key, "Evicted unobserved entry");
            self.emit(CacheEvent::Evicted(key.clone()));
        }
    }

    fn release(&self, key: &K) {
        let mut state = self.lock();
        if let Some(slot) = state.entries.get_mut(key) {
            slot.observers = slot.observers.saturating_sub(1);
            debug!(key = %key, observers = slot.observers, "Observer released");
            if slot.observers == 0 {
                self.schedule_eviction(slot, key);
            }
        }
    }
}

/// Keeps one key observed. Dropping it deregisters the observer.
pub struct Observer<K, V>
where
    K: CacheKey,
    V: Clone + Send + Sync + 'static,
{
    store: CacheStore<K, V>,
    key: K,
}

impl<K, V> Observer<K, V>
where
    K: CacheKey,
    V: Clone + Send + Sync + 'static,
{
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Current entry, refetching in the background when stale.
    pub fn entry(&self) -> CacheEntry<V> {
        self.store.read(&self.key)
    }

    pub fn data(&self) -> Option<V> {
        self.entry().data
    }
}

impl<K, V> Drop for Observer<K, V>
where
    K: CacheKey,
    V: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.store.release(&self.key);
    }
}

/// Marks a mutation as running; see [`CacheStore::is_mutating`].
pub struct MutationGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for MutationGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}
