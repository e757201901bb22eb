//! Volatile cache tier.
//!
//! No durability guarantee: any key may vanish at any time, so every
//! caller must be able to rebuild a value from the [`Store`](crate::Store).
//! Operations are infallible; a backend that cannot answer reports a miss.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use moka::ops::compute::Op;
use moka::sync::Cache;

/// What a [`CacheTier::compute`] step does to its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOp {
    Keep,
    Put(Bytes),
    Remove,
}

/// Compute step for [`CacheTier::compute`]. Receives the cached value, if any.
pub type CacheComputeFn<'a> = Box<dyn FnOnce(Option<&[u8]>) -> CacheOp + Send + 'a>;

#[async_trait]
pub trait CacheTier: Send + Sync + Debug + 'static {
    async fn get(&self, key: &str) -> Option<Bytes>;

    async fn set(&self, key: &str, value: Bytes);

    async fn invalidate(&self, key: &str);

    /// Run `f` on `key` and apply its result atomically. Compute steps on
    /// one key never interleave with each other.
    async fn compute<'a>(&self, key: &str, f: CacheComputeFn<'a>);
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_entries: u64,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 100_000,
            ttl_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entry_count: u64,
    pub max_entries: u64,
    pub ttl_secs: u64,
}

/// In-process cache backed by moka.
#[derive(Clone)]
pub struct MokaCache {
    inner: Cache<String, Bytes>,
    config: CacheConfig,
}

impl MokaCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Cache::builder()
                .time_to_live(Duration::from_secs(config.ttl_secs))
                .max_capacity(config.max_entries)
                .build(),
            config,
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.run_pending_tasks();
        CacheStats {
            entry_count: self.inner.entry_count(),
            max_entries: self.config.max_entries,
            ttl_secs: self.config.ttl_secs,
        }
    }

    pub fn clear(&self) {
        self.inner.invalidate_all();
    }
}

impl Default for MokaCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl Debug for MokaCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaCache")
            .field("config", &self.config)
            .finish()
    }
}

#[async_trait]
impl CacheTier for MokaCache {
    async fn get(&self, key: &str) -> Option<Bytes> {
        self.inner.get(key)
    }

    async fn set(&self, key: &str, value: Bytes) {
        self.inner.insert(key.to_string(), value);
    }

    async fn invalidate(&self, key: &str) {
        self.inner.invalidate(key);
    }

    async fn compute<'a>(&self, key: &str, f: CacheComputeFn<'a>) {
        self.inner
            .entry(key.to_string())
            .and_compute_with(|existing| {
                match f(existing.as_ref().map(|entry| &entry.value()[..])) {
                    CacheOp::Keep => Op::Nop,
                    CacheOp::Put(value) => Op::Put(value),
                    CacheOp::Remove => Op::Remove,
                }
            });
    }
}
