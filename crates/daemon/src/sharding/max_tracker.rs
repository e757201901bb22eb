//! Sharded max-trackers: the aggregate is the greatest stamp in any shard.

use serde::{Deserialize, Serialize};

use common::entry::write_nonce_at;
use common::time::Timestamp;

use super::{ShardEngine, ShardValue};
use crate::error::Result;

/// A time stamp plus the write nonce minted with it.
///
/// The nonce is derived from `time`, so ordering by `time` first and the
/// nonce second orders both the same way.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct MaxStamp {
    pub time: Timestamp,
    pub nonce: i64,
}

impl MaxStamp {
    pub fn at(time: Timestamp) -> Self {
        Self {
            time,
            nonce: write_nonce_at(time),
        }
    }

    pub fn is_unset(&self) -> bool {
        *self == MaxStamp::default()
    }
}

impl ShardValue for MaxStamp {
    const KIND: &'static str = "shard";

    fn identity() -> Self {
        MaxStamp::default()
    }

    fn merge(self, other: Self) -> Self {
        self.max(other)
    }
}

impl ShardEngine<'_> {
    /// Record `stamp` in one shard of the tracker `name`.
    pub async fn set_max(&self, name: &str, stamp: MaxStamp) -> Result<()> {
        self.contribute(name, stamp).await
    }

    /// Greatest stamp ever set on `name`, or the unset stamp.
    pub async fn max(&self, name: &str) -> Result<MaxStamp> {
        self.summarize::<MaxStamp>(name).await
    }
}
