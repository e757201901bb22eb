use std::sync::Arc;

use metadata_store::{CacheTier, MemoryStore, MokaCache, SqliteStore, Store, StoreError};

use crate::cache_layer::CacheLayer;
use crate::catalog::Catalog;
use crate::entry_store::EntryStore;
use crate::service_config::Config;
use crate::sharding::ShardEngine;

/// Explicit service context handed to every component.
///
/// Holds the durable store, the cache tier and the loaded configuration.
/// Cheap to clone; components borrow it through the view accessors
/// ([`State::shards`], [`State::entries`], [`State::catalog`]).
#[derive(Debug, Clone)]
pub struct State {
    store: Arc<dyn Store>,
    cache: CacheLayer,
    config: Arc<Config>,
}

#[derive(Debug, thiserror::Error)]
pub enum StateSetupError {
    #[error("Database path does not exist: {0}")]
    DatabasePathDoesNotExist(String),
    #[error("Store setup error: {0}")]
    Store(#[from] StoreError),
}

impl State {
    pub fn new(store: Arc<dyn Store>, cache: Arc<dyn CacheTier>, config: Config) -> Self {
        Self {
            store,
            cache: CacheLayer::new(cache),
            config: Arc::new(config),
        }
    }

    /// Memory-backed state for tests and throwaway deployments.
    pub fn ephemeral(config: Config) -> Self {
        let cache = MokaCache::new(config.cache_config());
        Self::new(Arc::new(MemoryStore::new()), Arc::new(cache), config)
    }

    pub async fn from_config(config: &Config) -> Result<Self, StateSetupError> {
        let store = match config.sqlite_path {
            Some(ref path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        return Err(StateSetupError::DatabasePathDoesNotExist(
                            parent.display().to_string(),
                        ));
                    }
                }
                tracing::info!("Metadata store: {:?}", path);
                SqliteStore::new(path).await?
            }
            None => {
                tracing::warn!("No sqlite_path configured, metadata is kept in memory");
                SqliteStore::in_memory().await?
            }
        };

        let cache = MokaCache::new(config.cache_config());
        tracing::info!(
            max_entries = config.cache_max_entries,
            ttl_secs = config.cache_ttl_secs,
            "cache tier ready"
        );

        Ok(Self::new(Arc::new(store), Arc::new(cache), config.clone()))
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn cache(&self) -> &CacheLayer {
        &self.cache
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn shards(&self) -> ShardEngine<'_> {
        ShardEngine::new(self)
    }

    pub fn entries(&self) -> EntryStore<'_> {
        EntryStore::new(self)
    }

    pub fn catalog(&self) -> Catalog<'_> {
        Catalog::new(self)
    }
}
