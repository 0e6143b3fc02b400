//! Caching layer for contract sources.
//!
//! Resolving a contract by name may be expensive for real sources (reading
//! and joining files, compiling). Resolutions are memoised in an LRU cache
//! keyed by contract name.
use crate::contracts::{ContractArtifact, ContractSource};
use crate::error::ChainError;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Hit/miss counters for a cache.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub capacity: usize,
}

/// A [`ContractSource`] that remembers the artifacts its inner source resolved.
pub struct CachedSource<S: ContractSource> {
    inner: S,
    // LruCache::get promotes entries, so even reads need exclusive access.
    cache: Mutex<LruCache<String, ContractArtifact>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<S: ContractSource> CachedSource<S> {
    pub const DEFAULT_CAPACITY: usize = 64;

    pub fn new(inner: S, capacity: usize) -> Self {
        // Zero is mapped to the smallest legal capacity.
        let capacity_nz = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity_nz)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> CacheStats {
        let cache = self.cache.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: cache.len(),
            capacity: cache.cap().get(),
        }
    }

    /// Drop every cached artifact, e.g. after contract sources changed on disk.
    pub fn invalidate_all(&self) {
        self.cache.lock().clear();
    }

    pub fn invalidate(&self, name: &str) -> Option<ContractArtifact> {
        self.cache.lock().pop(name)
    }
}

impl<S: ContractSource> ContractSource for CachedSource<S> {
    fn resolve(&self, name: &str) -> Result<ContractArtifact, ChainError> {
        if let Some(artifact) = self.cache.lock().get(name) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(artifact.clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let artifact = self.inner.resolve(name)?;
        debug!(contract = name, "cached contract source");
        self.cache.lock().put(name.to_string(), artifact.clone());
        Ok(artifact)
    }
}
