//! Fetch Cache Library
//!
//! In-memory request cache for asynchronous lookups.
//!
//! # Features
//!
//! - **TTL expiry**: entries are served until their expiry instant, then refetched
//! - **De-duplication**: concurrent requests for one key share a single fetch
//! - **No negative caching**: failures reach every waiter and are never stored
//! - **Namespaces**: `"<namespace>:<key>"` prefixes with group invalidation
//! - **Sweeper**: optional background removal of expired entries

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod namespace;

pub use cache::sweeper::spawn_sweep_task;
pub use cache::{CacheStatsSnapshot, DEFAULT_TTL, RequestCache};
pub use error::{Error, Result, SharedFetchError};
pub use namespace::Namespace;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to install subscriber: {e}")))?,
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to install subscriber: {e}")))?,
    }

    Ok(())
}
