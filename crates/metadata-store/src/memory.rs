use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Result, StoreError};
use crate::store::{Store, UpdateFn, Write};
use crate::table::Table;

type Records = BTreeMap<(Table, String), Vec<u8>>;

/// Process-local store.
///
/// Besides serving tests it can simulate an unavailable or slow backend
/// via [`MemoryStore::set_available`] and [`MemoryStore::set_latency`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<Records>>,
    unavailable: Arc<AtomicBool>,
    latency: Arc<Mutex<Option<Duration>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Delay every operation by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn enter(&self) -> Result<()> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>> {
        self.enter().await?;
        Ok(self.records.lock().get(&(table, key.to_string())).cloned())
    }

    async fn put(&self, table: Table, key: &str, value: Vec<u8>) -> Result<()> {
        self.enter().await?;
        self.records.lock().insert((table, key.to_string()), value);
        Ok(())
    }

    async fn delete(&self, table: Table, key: &str) -> Result<bool> {
        self.enter().await?;
        Ok(self
            .records
            .lock()
            .remove(&(table, key.to_string()))
            .is_some())
    }

    async fn insert_if_absent(&self, table: Table, key: &str, value: Vec<u8>) -> Result<bool> {
        self.enter().await?;
        let mut records = self.records.lock();
        let slot = (table, key.to_string());
        if records.contains_key(&slot) {
            return Ok(false);
        }
        records.insert(slot, value);
        Ok(true)
    }

    async fn update<'a>(
        &self,
        table: Table,
        key: &str,
        f: UpdateFn<'a>,
    ) -> Result<Option<Vec<u8>>> {
        self.enter().await?;
        let mut records = self.records.lock();
        let slot = (table, key.to_string());
        let current = records.get(&slot).cloned();
        match f(current.clone()) {
            Some(next) => {
                records.insert(slot, next.clone());
                Ok(Some(next))
            }
            None => Ok(current),
        }
    }

    async fn scan_prefix(&self, table: Table, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        self.enter().await?;
        let records = self.records.lock();
        Ok(records
            .range((table, prefix.to_string())..)
            .take_while(|((t, k), _)| *t == table && k.starts_with(prefix))
            .map(|((_, k), v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn transact(&self, writes: Vec<Write>) -> Result<()> {
        self.enter().await?;
        let mut records = self.records.lock();
        for write in writes {
            match write {
                Write::Put { table, key, value } => {
                    records.insert((table, key), value);
                }
                Write::Delete { table, key } => {
                    records.remove(&(table, key));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreExt;

    #[tokio::test]
    async fn test_scan_prefix_stays_in_table() {
        let store = MemoryStore::new();
        store.put(Table::Shards, "a-1", vec![1]).await.unwrap();
        store.put(Table::Shards, "a-0", vec![0]).await.unwrap();
        store.put(Table::Shards, "b-0", vec![9]).await.unwrap();
        store.put(Table::ShardConfigs, "a-9", vec![9]).await.unwrap();

        let keys: Vec<String> = store
            .scan_prefix(Table::Shards, "a-")
            .await
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["a-0", "a-1"]);
    }

    #[tokio::test]
    async fn test_unavailable_store_is_transient() {
        let store = MemoryStore::new();
        store.set_available(false);
        let err = store.get(Table::Volumes, "1").await.unwrap_err();
        assert!(err.is_transient());

        store.set_available(true);
        assert!(store.get(Table::Volumes, "1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_record_rejects_garbage() {
        let store = MemoryStore::new();
        store.put(Table::Volumes, "1", vec![1]).await.unwrap();
        let err = store
            .update_record::<String, _>(Table::Volumes, "1", |cur| cur)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Codec(_)));
        assert!(!err.is_transient());
    }
}
