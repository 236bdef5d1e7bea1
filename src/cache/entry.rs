//! Slot types stored in the request cache map
//!
//! Every key maps to exactly one [`Slot`]: either a settled [`CacheEntry`]
//! or the [`PendingRequest`] of the single computation currently producing
//! its value. A key that is not in the map is absent.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use futures::future::Shared;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::SharedFetchError;

/// Type-erased cached value; the concrete type is checked at the call boundary.
pub(crate) type CachedValue = Arc<dyn Any + Send + Sync>;

/// What a computation hands to its waiters.
pub(crate) type FetchOutcome = std::result::Result<CachedValue, SharedFetchError>;

/// Clonable receiver every waiter of one computation awaits.
pub(crate) type FetchChannel = Shared<oneshot::Receiver<FetchOutcome>>;

/// Upper bound on a TTL that would otherwise overflow `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// Value slot for a single key.
pub(crate) enum Slot {
    /// Settled value with expiry metadata.
    Ready(CacheEntry),
    /// A fetch is in flight.
    Pending(PendingRequest),
}

impl Slot {
    /// Return `true` when this slot is the pending request of `generation`.
    pub(crate) fn is_pending_generation(&self, generation: u64) -> bool {
        matches!(self, Self::Pending(pending) if pending.generation == generation)
    }

    /// Return the value if this is a fresh entry.
    pub(crate) fn fresh_value(&self, now: Instant) -> Option<&CachedValue> {
        match self {
            Self::Ready(entry) if !entry.is_expired_at(now) => Some(&entry.value),
            _ => None,
        }
    }
}

/// A cached value with TTL metadata
pub(crate) struct CacheEntry {
    pub(crate) value: CachedValue,
    pub(crate) created_at: Instant,
    pub(crate) expires_at: Instant,
}

impl CacheEntry {
    pub(crate) fn new(value: CachedValue, ttl: Duration) -> Self {
        let created_at = Instant::now();
        let expires_at = created_at
            .checked_add(ttl)
            .unwrap_or_else(|| created_at + FAR_FUTURE);
        Self {
            value,
            created_at,
            expires_at,
        }
    }

    /// An entry is expired once `now` reaches its expiry instant.
    pub(crate) fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// The one in-flight computation for a key
pub(crate) struct PendingRequest {
    pub(crate) channel: FetchChannel,
    pub(crate) started_at: Instant,
    pub(crate) generation: u64,
}
