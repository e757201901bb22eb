//! Sharded counters: the aggregate is the sum of all shard deltas.

use super::{ShardEngine, ShardValue};
use crate::error::Result;

impl ShardValue for i64 {
    const KIND: &'static str = "shardcounter";

    fn identity() -> Self {
        0
    }

    fn merge(self, other: Self) -> Self {
        self.wrapping_add(other)
    }
}

impl ShardEngine<'_> {
    /// Add `delta` to one shard of the counter `name`.
    pub async fn increment(&self, name: &str, delta: i64) -> Result<()> {
        self.contribute(name, delta).await
    }

    pub async fn count(&self, name: &str) -> Result<i64> {
        self.summarize::<i64>(name).await
    }
}
