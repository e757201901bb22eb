//! Storage collaborators of the metadata service.
//!
//! Two tiers, both behind traits so the service never names a backend:
//!
//! - **[`Store`]**: the durable record store. Records are opaque byte
//!   values keyed by `(Table, key)`. Backends: [`SqliteStore`] (sqlx) and
//!   [`MemoryStore`] (tests, ephemeral deployments).
//! - **[`CacheTier`]**: a volatile key/value cache with no durability
//!   guarantee. Backend: [`MokaCache`].
//!
//! [`StoreExt`] layers bincode-typed helpers over any [`Store`].

mod cache;
mod database;
mod error;
mod memory;
mod store;
mod table;

pub use cache::{CacheComputeFn, CacheConfig, CacheOp, CacheStats, CacheTier, MokaCache};
pub use database::SqliteStore;
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use store::{Store, StoreExt, UpdateFn, Write};
pub use table::Table;
