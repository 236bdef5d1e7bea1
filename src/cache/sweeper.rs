//! Background removal of expired entries
//!
//! Expired entries are otherwise only dropped when their key is fetched
//! again, so a long-lived cache with many one-off keys keeps growing.
//! The sweeper bounds that growth by time; there is no capacity bound.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use super::RequestCache;

/// Spawn a tokio task that calls [`RequestCache::evict_expired`] every `interval`.
///
/// The task only holds a weak reference and exits once every
/// [`RequestCache`] handle has been dropped. Abort the returned handle to
/// stop it earlier.
pub fn spawn_sweep_task(cache: &RequestCache, interval: Duration) -> JoinHandle<()> {
    let weak = cache.downgrade();
    let interval = interval.max(Duration::from_millis(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else {
                debug!("Request cache dropped, stopping sweeper");
                break;
            };
            inner.evict_expired();
        }
    })
}
