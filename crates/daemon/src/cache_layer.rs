//! Typed adapter over the volatile [`CacheTier`].
//!
//! Values are bincode-encoded. A value that fails to decode is dropped and
//! reported as a miss, so a format change never wedges a key.
//!
//! A value read from the store is only cached if no write to its key began
//! or finished while it was being read. Keys hash onto [`STRIPES`] slots,
//! each holding a generation and a count of writes in flight. Fillers take
//! a [`FillTicket`] before reading the store, and [`CacheLayer::fill`]
//! drops the value if the slot moved since. Invalidation bumps the
//! generation. Writers that patch a cached value in place hold a
//! [`WriteGuard`] across their store write.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use common::entry::FileId;
use common::gateway::GatewayId;
use common::user::OwnerId;
use common::volume::VolumeId;
use metadata_store::{CacheOp, CacheTier};

use crate::error::Result;

pub const STRIPES: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Volume(VolumeId),
    VolumeName(String),
    Gateway(GatewayId),
    GatewayName(String),
    User(OwnerId),
    UserName(String),
    CertBundle(VolumeId),
    /// The persisted entry record, before aggregate merging.
    Entry(VolumeId, FileId),
    ShardSummary(String),
    ShardConfig(String),
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Volume(id) => write!(f, "volume:{}", id),
            CacheKey::VolumeName(name) => write!(f, "volume-name:{}", name),
            CacheKey::Gateway(id) => write!(f, "gateway:{}", id),
            CacheKey::GatewayName(name) => write!(f, "gateway-name:{}", name),
            CacheKey::User(id) => write!(f, "user:{}", id),
            CacheKey::UserName(name) => write!(f, "user-name:{}", name),
            CacheKey::CertBundle(id) => write!(f, "cert-bundle:{}", id),
            CacheKey::Entry(volume, file) => write!(f, "entry:{}:{:016x}", volume, file),
            CacheKey::ShardSummary(name) => write!(f, "shard-summary:{}", name),
            CacheKey::ShardConfig(name) => write!(f, "shard-config:{}", name),
        }
    }
}

#[derive(Debug, Default)]
struct Stripe {
    generation: AtomicU64,
    writers: AtomicU64,
}

/// Snapshot of a key's stripe, taken before reading the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillTicket {
    stripe: usize,
    generation: u64,
    quiet: bool,
}

/// Marks a write to a key as in flight. Dropping it ends the write.
#[derive(Debug)]
pub struct WriteGuard<'a> {
    stripe: &'a Stripe,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.stripe.generation.fetch_add(1, Ordering::SeqCst);
        self.stripe.writers.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct CacheLayer {
    tier: Arc<dyn CacheTier>,
    stripes: Arc<[Stripe]>,
}

fn stripe_index(key: &str) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % STRIPES as u64) as usize
}

impl CacheLayer {
    pub fn new(tier: Arc<dyn CacheTier>) -> Self {
        Self {
            tier,
            stripes: (0..STRIPES).map(|_| Stripe::default()).collect(),
        }
    }

    fn stripe(&self, key: &str) -> &Stripe {
        &self.stripes[stripe_index(key)]
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let raw = self.tier.get(&key.to_string()).await?;
        match bincode::deserialize(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(%key, error = %e, "dropping undecodable cache value");
                self.invalidate(key).await;
                None
            }
        }
    }

    pub fn ticket(&self, key: &CacheKey) -> FillTicket {
        let index = stripe_index(&key.to_string());
        let stripe = &self.stripes[index];
        FillTicket {
            stripe: index,
            generation: stripe.generation.load(Ordering::SeqCst),
            quiet: stripe.writers.load(Ordering::SeqCst) == 0,
        }
    }

    /// Cache `value` read under `ticket`, unless a write to the key has
    /// happened since. Returns whether the value was cached.
    pub async fn fill<T: Serialize>(&self, key: &CacheKey, ticket: FillTicket, value: &T) -> bool {
        let raw = match bincode::serialize(value) {
            Ok(raw) => Bytes::from(raw),
            Err(e) => {
                tracing::warn!(%key, error = %e, "failed to encode cache value");
                return false;
            }
        };
        let stripe = &self.stripes[ticket.stripe];
        let mut filled = false;
        self.tier
            .compute(
                &key.to_string(),
                Box::new(|_: Option<&[u8]>| {
                    let unchanged = ticket.quiet
                        && stripe.writers.load(Ordering::SeqCst) == 0
                        && stripe.generation.load(Ordering::SeqCst) == ticket.generation;
                    if unchanged {
                        filled = true;
                        CacheOp::Put(raw)
                    } else {
                        CacheOp::Keep
                    }
                }),
            )
            .await;
        filled
    }

    /// Held across a store write whose effect is then patched into the
    /// cached value with [`CacheLayer::update_if_present`].
    pub fn write_guard(&self, key: &CacheKey) -> WriteGuard<'_> {
        let stripe = self.stripe(&key.to_string());
        stripe.writers.fetch_add(1, Ordering::SeqCst);
        WriteGuard { stripe }
    }

    /// Drop `key`. Call after the store write it reflects.
    pub async fn invalidate(&self, key: &CacheKey) {
        let key = key.to_string();
        let stripe = self.stripe(&key);
        self.tier
            .compute(
                &key,
                Box::new(move |_: Option<&[u8]>| {
                    stripe.generation.fetch_add(1, Ordering::SeqCst);
                    CacheOp::Remove
                }),
            )
            .await;
    }

    pub async fn invalidate_many(&self, keys: &[CacheKey]) {
        futures::future::join_all(keys.iter().map(|key| self.invalidate(key))).await;
    }

    /// A volume mutation also stales the cert bundle that embeds it.
    pub async fn invalidate_volume(&self, volume_id: VolumeId) {
        self.invalidate_many(&[CacheKey::Volume(volume_id), CacheKey::CertBundle(volume_id)])
            .await;
    }

    /// A gateway mutation also stales its volume's cert bundle.
    pub async fn invalidate_gateway(&self, gateway_id: GatewayId, volume_id: VolumeId) {
        self.invalidate_many(&[
            CacheKey::Gateway(gateway_id),
            CacheKey::CertBundle(volume_id),
        ])
        .await;
    }

    /// Cache lookup, then `fetch` on a miss; a found value is filled back.
    pub async fn read_through<T, F, Fut>(&self, key: &CacheKey, fetch: F) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Option<T>>>,
    {
        if let Some(hit) = self.get(key).await {
            return Ok(Some(hit));
        }
        let ticket = self.ticket(key);
        let fetched = fetch().await?;
        if let Some(value) = &fetched {
            self.fill(key, ticket, value).await;
        }
        Ok(fetched)
    }

    /// Atomically rewrite a cached value if (and only if) it is present.
    pub async fn update_if_present<T, F>(&self, key: &CacheKey, f: F) -> bool
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(T) -> T + Send,
    {
        let mut present = false;
        self.tier
            .compute(
                &key.to_string(),
                Box::new(|current: Option<&[u8]>| {
                    let Some(raw) = current else {
                        return CacheOp::Keep;
                    };
                    present = true;
                    let next = bincode::deserialize::<T>(raw)
                        .ok()
                        .and_then(|value| bincode::serialize(&f(value)).ok());
                    match next {
                        Some(next) => CacheOp::Put(Bytes::from(next)),
                        None => CacheOp::Remove,
                    }
                }),
            )
            .await;
        present
    }
}
