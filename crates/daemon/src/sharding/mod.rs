//! Sharded values: one logical aggregate spread over N shard records.
//!
//! A write touches exactly one randomly chosen shard and then nudges the
//! cached summary in place (if one is cached). A read returns the cached
//! summary or fetches every shard concurrently, merges them and caches the
//! result. Two specializations exist: [`counter`] (sum of `i64` deltas) and
//! [`max_tracker`] (running maximum of [`MaxStamp`]s).
//!
//! The per-aggregate shard count lives in a [`ShardConfig`] record. It is
//! pinned on first use and may only grow; see [`ShardEngine::increase_shards`].

pub mod counter;
pub mod max_tracker;

pub use max_tracker::MaxStamp;

use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use metadata_store::{StoreExt, Table, Write};

use crate::cache_layer::CacheKey;
use crate::error::Result;
use crate::fanout;
use crate::service_state::State;

/// A value that can be split across shards and merged back.
pub trait ShardValue: Serialize + DeserializeOwned + Copy + Send + Sync + 'static {
    /// Prefix of this kind's shard record keys.
    const KIND: &'static str;

    fn identity() -> Self;

    /// Associative, commutative merge with [`ShardValue::identity`] as unit.
    fn merge(self, other: Self) -> Self;
}

/// Persisted shard count of one aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardConfig {
    pub name: String,
    pub num_shards: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct ShardEngine<'a> {
    state: &'a State,
}

fn shard_key(kind: &str, name: &str, index: u32) -> String {
    format!("{}-{}-{}", kind, name, index)
}

fn summary_key<V: ShardValue>(name: &str) -> CacheKey {
    CacheKey::ShardSummary(format!("{}-{}", V::KIND, name))
}

impl<'a> ShardEngine<'a> {
    pub fn new(state: &'a State) -> Self {
        Self { state }
    }

    /// Shard count of `name`, pinning the configured default on first use.
    pub async fn num_shards(&self, name: &str) -> Result<u32> {
        let store = self.state.store();
        let pinned = ShardConfig {
            name: name.to_string(),
            num_shards: self.state.config().default_num_shards.max(1),
        };
        let default = pinned.num_shards;
        let config: Option<ShardConfig> = self
            .state
            .cache()
            .read_through(&CacheKey::ShardConfig(name.to_string()), || async move {
                if let Some(config) = store
                    .get_record::<ShardConfig>(Table::ShardConfigs, name)
                    .await?
                {
                    return Ok(Some(config));
                }
                store
                    .insert_record_if_absent(Table::ShardConfigs, name, &pinned)
                    .await?;
                // Another writer may have pinned or grown it first.
                let config: Option<ShardConfig> =
                    store.get_record(Table::ShardConfigs, name).await?;
                Ok(Some(config.unwrap_or(pinned)))
            })
            .await?;
        Ok(config.map(|c| c.num_shards).unwrap_or(default))
    }

    /// Raise the shard count of `name` to at least `num_shards`.
    ///
    /// Applied as one atomic read-modify-write on the config record, so two
    /// concurrent callers can never disagree on the result, and a smaller
    /// request than the current count is a no-op. Returns the count after.
    pub async fn increase_shards(&self, name: &str, num_shards: u32) -> Result<u32> {
        let default = self.state.config().default_num_shards.max(1);
        let owned = name.to_string();
        let updated: Option<ShardConfig> = self
            .state
            .store()
            .update_record(Table::ShardConfigs, name, move |current: Option<ShardConfig>| {
                let existing = current.as_ref().map(|c| c.num_shards);
                let target = existing.unwrap_or(default).max(num_shards);
                if existing == Some(target) {
                    None
                } else {
                    Some(ShardConfig {
                        name: owned,
                        num_shards: target,
                    })
                }
            })
            .await?;
        self.state
            .cache()
            .invalidate(&CacheKey::ShardConfig(name.to_string()))
            .await;

        let count = updated.map(|c| c.num_shards).unwrap_or(default);
        tracing::debug!(name, count, "shard count");
        Ok(count)
    }

    /// Fold `value` into one random shard of `name`.
    pub(crate) async fn contribute<V: ShardValue>(&self, name: &str, value: V) -> Result<()> {
        let num_shards = self.num_shards(name).await?;
        let index = rand::rng().random_range(0..num_shards);
        let key = shard_key(V::KIND, name, index);
        let cache = self.state.cache();
        let summary = summary_key::<V>(name);

        // Summaries read while this write is in flight are not cached.
        let _writing = cache.write_guard(&summary);
        self.state
            .store()
            .update_record(Table::Shards, &key, move |current: Option<V>| {
                Some(current.unwrap_or_else(V::identity).merge(value))
            })
            .await?;
        cache
            .update_if_present(&summary, move |total: V| total.merge(value))
            .await;
        Ok(())
    }

    /// Merged value of every shard of `name`.
    pub(crate) async fn summarize<V: ShardValue>(&self, name: &str) -> Result<V> {
        let cache = self.state.cache();
        let cache_key = summary_key::<V>(name);
        if let Some(summary) = cache.get::<V>(&cache_key).await {
            return Ok(summary);
        }

        let ticket = cache.ticket(&cache_key);
        let num_shards = self.num_shards(name).await?;
        let store = self.state.store();
        let parts = fanout::join_all(
            "shard aggregate",
            self.state.config().fetch_timeout(),
            (0..num_shards).map(|index| {
                let key = shard_key(V::KIND, name, index);
                async move { Ok(store.get_record::<V>(Table::Shards, &key).await?) }
            }),
        )
        .await?;

        let total = parts.into_iter().flatten().fold(V::identity(), V::merge);
        cache.fill(&cache_key, ticket, &total).await;
        Ok(total)
    }

    /// Drop every shard and the shard config of `name`.
    pub(crate) async fn clear<V: ShardValue>(&self, name: &str) -> Result<()> {
        let num_shards = self.num_shards(name).await?;
        let mut writes: Vec<Write> = (0..num_shards)
            .map(|index| Write::delete(Table::Shards, shard_key(V::KIND, name, index)))
            .collect();
        writes.push(Write::delete(Table::ShardConfigs, name));
        self.state.store().transact(writes).await?;

        self.state
            .cache()
            .invalidate_many(&[
                summary_key::<V>(name),
                CacheKey::ShardConfig(name.to_string()),
            ])
            .await;
        Ok(())
    }
}
