use std::fmt::Debug;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::table::Table;

/// Read-modify-write step applied atomically by [`Store::update`].
///
/// Receives the current value (if any). Returning `Some(bytes)` replaces
/// the record; returning `None` leaves it untouched.
pub type UpdateFn<'a> = Box<dyn FnOnce(Option<Vec<u8>>) -> Option<Vec<u8>> + Send + 'a>;

/// One write inside a [`Store::transact`] batch.
#[derive(Debug, Clone)]
pub enum Write {
    Put {
        table: Table,
        key: String,
        value: Vec<u8>,
    },
    Delete {
        table: Table,
        key: String,
    },
}

impl Write {
    pub fn put<T: Serialize>(table: Table, key: impl Into<String>, value: &T) -> Result<Self> {
        Ok(Write::Put {
            table,
            key: key.into(),
            value: bincode::serialize(value)?,
        })
    }

    pub fn delete(table: Table, key: impl Into<String>) -> Self {
        Write::Delete {
            table,
            key: key.into(),
        }
    }
}

/// Durable record store.
///
/// Every method is a suspension point. Single-record operations are
/// atomic; [`Store::transact`] applies a batch all-or-nothing.
#[async_trait]
pub trait Store: Send + Sync + Debug + 'static {
    async fn get(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>>;

    async fn put(&self, table: Table, key: &str, value: Vec<u8>) -> Result<()>;

    /// Returns whether a record was removed.
    async fn delete(&self, table: Table, key: &str) -> Result<bool>;

    /// Insert unless the key exists. Returns whether the insert happened.
    async fn insert_if_absent(&self, table: Table, key: &str, value: Vec<u8>) -> Result<bool>;

    /// Atomically apply `f` to the record and return the value afterwards.
    async fn update<'a>(
        &self,
        table: Table,
        key: &str,
        f: UpdateFn<'a>,
    ) -> Result<Option<Vec<u8>>>;

    /// All records in `table` whose key starts with `prefix`, ordered by key.
    async fn scan_prefix(&self, table: Table, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;

    async fn transact(&self, writes: Vec<Write>) -> Result<()>;
}

/// bincode-typed access to any [`Store`].
#[async_trait]
pub trait StoreExt: Store {
    async fn get_record<T>(&self, table: Table, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(table, key).await? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn put_record<T>(&self, table: Table, key: &str, value: &T) -> Result<()>
    where
        T: Serialize + Sync,
    {
        self.put(table, key, bincode::serialize(value)?).await
    }

    async fn insert_record_if_absent<T>(&self, table: Table, key: &str, value: &T) -> Result<bool>
    where
        T: Serialize + Sync,
    {
        self.insert_if_absent(table, key, bincode::serialize(value)?)
            .await
    }

    /// Typed [`Store::update`]. A record that fails to decode is treated as
    /// absent by `f` but reported as an error afterwards.
    async fn update_record<T, F>(&self, table: Table, key: &str, f: F) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce(Option<T>) -> Option<T> + Send,
    {
        let mut decode_error = None;
        let raw = self
            .update(
                table,
                key,
                Box::new(|current| {
                    let current = match current.map(|b| bincode::deserialize::<T>(&b)) {
                        Some(Ok(value)) => Some(value),
                        Some(Err(e)) => {
                            decode_error = Some(e);
                            return None;
                        }
                        None => None,
                    };
                    f(current).and_then(|next| bincode::serialize(&next).ok())
                }),
            )
            .await?;
        if let Some(e) = decode_error {
            return Err(e.into());
        }
        match raw {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn scan_records<T>(&self, table: Table, prefix: &str) -> Result<Vec<(String, T)>>
    where
        T: DeserializeOwned + Send,
    {
        self.scan_prefix(table, prefix)
            .await?
            .into_iter()
            .map(|(key, bytes)| Ok((key, bincode::deserialize(&bytes)?)))
            .collect()
    }
}

impl<S: Store + ?Sized> StoreExt for S {}
