//! In-memory request cache with TTL expiry and in-flight de-duplication
//!
//! [`RequestCache`] maps string keys to either a settled value or the single
//! computation currently producing it:
//!
//! 1. A fresh entry is returned without calling the fetcher.
//! 2. A computation already in flight for the key is shared: later callers
//!    await the same result instead of starting a second fetch.
//! 3. Otherwise the fetcher is spawned on the tokio runtime. Success is
//!    cached for the TTL; failure is handed to every waiter and not cached.
//!
//! A computation only writes back into the map while its own pending slot
//! is still there, so invalidating a key while its fetch is in flight keeps
//! the late result out of the cache.

mod entry;
mod stats;
pub mod sweeper;

use std::future::Future;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

pub use stats::CacheStatsSnapshot;

use self::entry::{CacheEntry, CachedValue, FetchChannel, FetchOutcome, PendingRequest, Slot};
use self::stats::CacheStats;
use crate::config::CacheConfig;
use crate::error::SharedFetchError;
use crate::namespace::Namespace;
use crate::{Error, Result};

/// TTL applied when the caller does not pass one (5 minutes).
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Shared, thread-safe request cache.
///
/// Cloning is cheap: all clones operate on the same store, so one cache is
/// built at startup and handed to every consumer.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use fetch_cache::RequestCache;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> fetch_cache::Result<()> {
/// let cache = RequestCache::new();
///
/// let employees: Vec<String> = cache
///     .get_or_fetch("employees:all", || async { Ok(vec!["ada".to_string()]) })
///     .await?;
/// assert_eq!(employees.len(), 1);
///
/// // Served from cache, the fetcher is not called again
/// assert_eq!(cache.peek::<Vec<String>>("employees:all"), Some(employees));
///
/// cache.set("notices:latest", 42_u32, Duration::from_secs(60));
/// assert!(cache.invalidate("notices:latest"));
/// assert_eq!(cache.peek::<u32>("notices:latest"), None);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RequestCache {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    slots: DashMap<String, Slot>,
    stats: CacheStats,
    default_ttl: Duration,
    next_generation: AtomicU64,
}

/// Result of the synchronous lookup step of `get_or_fetch`.
enum Lookup {
    Hit(CachedValue),
    Wait(FetchChannel),
    Fetch(FetchTicket),
}

/// Everything a freshly registered computation needs to report back.
struct FetchTicket {
    channel: FetchChannel,
    sender: oneshot::Sender<FetchOutcome>,
    guard: PendingGuard,
}

impl RequestCache {
    /// Create an empty cache using [`DEFAULT_TTL`]
    #[must_use]
    pub fn new() -> Self {
        Self::with_default_ttl(DEFAULT_TTL)
    }

    /// Create an empty cache with a custom default TTL
    #[must_use]
    pub fn with_default_ttl(default_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: DashMap::new(),
                stats: CacheStats::default(),
                default_ttl,
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Create an empty cache from configuration
    #[must_use]
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::with_default_ttl(config.default_ttl)
    }

    /// TTL used by [`get_or_fetch`](Self::get_or_fetch)
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.inner.default_ttl
    }

    /// Create a view that prefixes every key with `"<name>:"`
    #[must_use]
    pub fn namespace(&self, name: impl Into<String>) -> Namespace {
        Namespace::new(self.clone(), name.into())
    }

    /// Return the cached value for `key`, fetching it with the default TTL on a miss.
    ///
    /// See [`get_or_fetch_with_ttl`](Self::get_or_fetch_with_ttl).
    pub async fn get_or_fetch<T, F, Fut>(&self, key: &str, fetcher: F) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.get_or_fetch_with_ttl(key, self.inner.default_ttl, fetcher)
            .await
    }

    /// Return the cached value for `key`, fetching it on a miss.
    ///
    /// Concurrent calls for the same key while a fetch is in flight share that
    /// fetch: `fetcher` is only invoked when there is neither a fresh entry nor
    /// a pending computation. The fetch runs as its own tokio task, so it
    /// completes even if every caller stops waiting.
    ///
    /// `fetcher` is called synchronously to build the future; keep it cheap.
    ///
    /// # Errors
    ///
    /// - [`Error::Fetch`] with the fetcher's error, shared by all waiters.
    /// - [`Error::TypeMismatch`] if the key holds a value of another type.
    /// - [`Error::Abandoned`] if the computation panicked.
    pub async fn get_or_fetch_with_ttl<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        fetcher: F,
    ) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let channel = match self.lookup(key) {
            Lookup::Hit(value) => return downcast(key, &value),
            Lookup::Wait(channel) => channel,
            Lookup::Fetch(ticket) => {
                let channel = ticket.channel.clone();
                spawn_fetch(ticket, ttl, fetcher());
                channel
            }
        };

        match channel.await {
            Ok(Ok(value)) => downcast(key, &value),
            Ok(Err(err)) => Err(Error::Fetch(err)),
            Err(_) => Err(Error::Abandoned(format!(
                "computation for key {key} ended without a result"
            ))),
        }
    }

    /// Decide between hit, shared wait and new fetch. Never awaits.
    fn lookup(&self, key: &str) -> Lookup {
        let inner = &self.inner;

        // Fast path under the shard read lock
        if let Some(slot) = inner.slots.get(key) {
            if let Some(value) = slot.fresh_value(Instant::now()) {
                inner.stats.record_hit();
                return Lookup::Hit(Arc::clone(value));
            }
        }

        match inner.slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                match occupied.get() {
                    Slot::Pending(pending) => {
                        inner.stats.record_coalesced();
                        debug!(key, generation = pending.generation, "Joining in-flight fetch");
                        return Lookup::Wait(pending.channel.clone());
                    }
                    Slot::Ready(entry) => {
                        if !entry.is_expired_at(Instant::now()) {
                            // Refreshed between the fast path and taking the write lock
                            inner.stats.record_hit();
                            return Lookup::Hit(Arc::clone(&entry.value));
                        }
                        inner.stats.record_evictions(1);
                        let age_ms = u64::try_from(entry.created_at.elapsed().as_millis())
                            .unwrap_or(u64::MAX);
                        debug!(key, age_ms, "Cached entry expired, refetching");
                    }
                }
                let (pending, ticket) = self.register(key);
                occupied.insert(Slot::Pending(pending));
                Lookup::Fetch(ticket)
            }
            Entry::Vacant(vacant) => {
                debug!(key, "Cache miss, fetching");
                let (pending, ticket) = self.register(key);
                vacant.insert(Slot::Pending(pending));
                Lookup::Fetch(ticket)
            }
        }
    }

    /// Build the pending slot and the ticket of a new computation.
    fn register(&self, key: &str) -> (PendingRequest, FetchTicket) {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        let channel = receiver.shared();
        self.inner.stats.record_fetch();

        let pending = PendingRequest {
            channel: channel.clone(),
            started_at: Instant::now(),
            generation,
        };
        let ticket = FetchTicket {
            channel,
            sender,
            guard: PendingGuard {
                inner: Arc::downgrade(&self.inner),
                key: key.to_string(),
                generation,
                settled: false,
            },
        };
        (pending, ticket)
    }

    /// Install a value directly, replacing whatever `key` held.
    ///
    /// A fetch in flight for `key` still delivers to its waiters but no
    /// longer writes into the cache.
    pub fn set<T>(&self, key: &str, value: T, ttl: Duration)
    where
        T: Send + Sync + 'static,
    {
        let entry = CacheEntry::new(Arc::new(value), ttl);
        self.inner.slots.insert(key.to_string(), Slot::Ready(entry));
    }

    /// Return the cached value if present, fresh and of type `T`.
    ///
    /// Never fetches and never modifies the cache.
    #[must_use]
    pub fn peek<T>(&self, key: &str) -> Option<T>
    where
        T: Clone + 'static,
    {
        let slot = self.inner.slots.get(key)?;
        let value = slot.fresh_value(Instant::now())?;
        (**value).downcast_ref::<T>().cloned()
    }

    /// Return `true` while a computation for `key` is in flight
    #[must_use]
    pub fn is_pending(&self, key: &str) -> bool {
        self.inner
            .slots
            .get(key)
            .is_some_and(|slot| matches!(*slot, Slot::Pending(_)))
    }

    /// Remove the entry and any pending request for `key`.
    ///
    /// Returns `true` when something was removed. An in-flight fetch is not
    /// aborted; its result is just not cached.
    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self.inner.slots.remove(key).is_some();
        if removed {
            self.inner.stats.record_invalidations(1);
            debug!(key, "Invalidated cache key");
        }
        removed
    }

    /// Remove every key starting with `prefix`, returning how many were removed.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut removed = 0_usize;
        self.inner.slots.retain(|key, _| {
            let keep = !key.starts_with(prefix);
            if !keep {
                removed += 1;
            }
            keep
        });

        self.inner.stats.record_invalidations(removed as u64);
        debug!(prefix, removed, "Invalidated cache prefix");
        removed
    }

    /// Remove everything, entries and pending requests alike
    pub fn clear_all(&self) {
        let mut removed = 0_u64;
        self.inner.slots.retain(|_, _| {
            removed += 1;
            false
        });
        self.inner.stats.record_invalidations(removed);
        debug!(removed, "Cleared request cache");
    }

    /// Remove expired entries, returning how many were removed.
    ///
    /// Pending requests are left alone.
    pub fn evict_expired(&self) -> usize {
        self.inner.evict_expired()
    }

    /// Number of tracked keys (entries and pending requests)
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.slots.len()
    }

    /// Return `true` when nothing is tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.slots.is_empty()
    }

    /// Get cache statistics
    #[must_use]
    pub fn stats(&self) -> CacheStatsSnapshot {
        let mut size = 0;
        let mut pending = 0;
        for slot in &self.inner.slots {
            size += 1;
            if matches!(slot.value(), Slot::Pending(_)) {
                pending += 1;
            }
        }
        self.inner.stats.snapshot(size, pending)
    }

    pub(crate) fn downgrade(&self) -> Weak<Inner> {
        Arc::downgrade(&self.inner)
    }
}

impl Default for RequestCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RequestCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCache")
            .field("default_ttl", &self.inner.default_ttl)
            .field("len", &self.inner.slots.len())
            .finish_non_exhaustive()
    }
}

impl Inner {
    pub(crate) fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0_usize;
        self.slots.retain(|_, slot| match slot {
            Slot::Ready(entry) if entry.is_expired_at(now) => {
                removed += 1;
                false
            }
            _ => true,
        });

        self.stats.record_evictions(removed as u64);
        if removed > 0 {
            debug!(removed, "Evicted expired cache entries");
        }
        removed
    }
}

/// Run the fetcher's future as its own task and report the outcome.
fn spawn_fetch<T, Fut>(ticket: FetchTicket, ttl: Duration, future: Fut)
where
    T: Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    let FetchTicket {
        sender, mut guard, ..
    } = ticket;

    tokio::spawn(async move {
        let outcome: FetchOutcome = match future.await {
            Ok(value) => Ok(Arc::new(value)),
            Err(err) => Err(SharedFetchError::new(err)),
        };
        // Settle the slot before waking waiters, so anyone arriving after
        // the wake-up finds either the entry or an empty slot.
        guard.settle(&outcome, ttl);
        sender.send(outcome).ok();
    });
}

/// Clears a computation's pending slot however the computation ends.
///
/// Holds the store weakly, so a hung fetch does not keep a dropped cache
/// (or its sweeper) alive.
struct PendingGuard {
    inner: Weak<Inner>,
    key: String,
    generation: u64,
    settled: bool,
}

impl PendingGuard {
    fn settle(&mut self, outcome: &FetchOutcome, ttl: Duration) {
        self.settled = true;
        let key = self.key.as_str();
        let generation = self.generation;
        let Some(inner) = self.inner.upgrade() else {
            debug!(key, generation, "Fetch finished after cache was dropped");
            return;
        };

        match outcome {
            Ok(value) => {
                let Some(mut slot) = inner.slots.get_mut(key) else {
                    debug!(key, generation, "Fetch finished after invalidation, not caching");
                    return;
                };
                let Slot::Pending(pending) = &*slot else {
                    debug!(key, generation, "Fetch finished after key was overwritten");
                    return;
                };
                if pending.generation != generation {
                    debug!(key, generation, "Fetch superseded, not caching");
                    return;
                }
                let elapsed_ms =
                    u64::try_from(pending.started_at.elapsed().as_millis()).unwrap_or(u64::MAX);
                *slot = Slot::Ready(CacheEntry::new(Arc::clone(value), ttl));
                debug!(key, generation, elapsed_ms, "Fetch cached");
            }
            Err(err) => {
                inner.stats.record_failure();
                remove_pending_slot(&inner, key, generation);
                warn!(key, generation, error = %err, "Fetch failed, not caching");
            }
        }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(inner) = self.inner.upgrade() {
            inner.stats.record_failure();
            remove_pending_slot(&inner, &self.key, self.generation);
        }
        warn!(
            key = %self.key,
            generation = self.generation,
            "Fetch ended without a result"
        );
    }
}

/// Remove `key` only while it is still the pending slot of `generation`.
fn remove_pending_slot(inner: &Inner, key: &str, generation: u64) {
    inner
        .slots
        .remove_if(key, |_, slot| slot.is_pending_generation(generation));
}

fn downcast<T>(key: &str, value: &CachedValue) -> Result<T>
where
    T: Clone + 'static,
{
    (**value)
        .downcast_ref::<T>()
        .cloned()
        .ok_or_else(|| Error::TypeMismatch {
            key: key.to_string(),
            expected: std::any::type_name::<T>(),
        })
}
