//! Namespaced views over a shared [`RequestCache`]
//!
//! A [`Namespace`] prefixes every key as `"<name>:<key>"` so unrelated
//! resource types can share one store and be invalidated as a group.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::cache::RequestCache;
use crate::Result;

/// Key-prefixing view over a [`RequestCache`]
#[derive(Clone, Debug)]
pub struct Namespace {
    cache: RequestCache,
    /// Namespace name followed by `:`
    prefix: String,
}

impl Namespace {
    pub(crate) fn new(cache: RequestCache, mut name: String) -> Self {
        name.push(':');
        Self {
            cache,
            prefix: name,
        }
    }

    /// Namespace name without the trailing separator
    #[must_use]
    pub fn name(&self) -> &str {
        &self.prefix[..self.prefix.len() - 1]
    }

    /// The underlying shared cache
    #[must_use]
    pub fn cache(&self) -> &RequestCache {
        &self.cache
    }

    /// Full cache key for `key` in this namespace
    #[must_use]
    pub fn key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    /// [`RequestCache::get_or_fetch`] within this namespace
    pub async fn get_or_fetch<T, F, Fut>(&self, key: &str, fetcher: F) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.cache.get_or_fetch(&self.key(key), fetcher).await
    }

    /// [`RequestCache::get_or_fetch_with_ttl`] within this namespace
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
        self.cache
            .get_or_fetch_with_ttl(&self.key(key), ttl, fetcher)
            .await
    }

    /// [`RequestCache::set`] within this namespace
    pub fn set<T>(&self, key: &str, value: T, ttl: Duration)
    where
        T: Send + Sync + 'static,
    {
        self.cache.set(&self.key(key), value, ttl);
    }

    /// [`RequestCache::peek`] within this namespace
    #[must_use]
    pub fn peek<T>(&self, key: &str) -> Option<T>
    where
        T: Clone + 'static,
    {
        self.cache.peek(&self.key(key))
    }

    /// [`RequestCache::invalidate`] within this namespace
    pub fn invalidate(&self, key: &str) -> bool {
        self.cache.invalidate(&self.key(key))
    }

    /// Invalidate every key in this namespace
    pub fn invalidate_all(&self) -> usize {
        self.cache.invalidate_prefix(&self.prefix)
    }

    /// Derive a stable key from request parameters.
    ///
    /// The key is the hex-encoded SHA-256 digest of the JSON form of
    /// `params`. Object keys are serialized sorted, so `{"a":1,"b":2}` and
    /// `{"b":2,"a":1}` yield the same key.
    pub fn params_key<P>(params: &P) -> Result<String>
    where
        P: Serialize + ?Sized,
    {
        let canonical = serde_json::to_value(params)?;
        let bytes = serde_json::to_vec(&canonical)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }
}
