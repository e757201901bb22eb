//! SQLite-backed record store.
//!
//! All tables share one `records` relation keyed by `(tbl, key)`. Writes
//! that read first (`update`, `insert_if_absent`, `transact`) run inside a
//! transaction and are serialized through a write gate so concurrent
//! read-modify-write cycles never interleave on the same connection pool.

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::{Result, StoreError};
use crate::store::{Store, UpdateFn, Write};
use crate::table::Table;

#[derive(Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
    write_gate: Mutex<()>,
}

impl std::ops::Deref for SqliteStore {
    type Target = SqlitePool;

    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}

impl SqliteStore {
    /// Open (creating if needed) a file-backed store and run migrations.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Setup(format!("Failed to create database directory: {}", e))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            write_gate: Mutex::new(()),
        };
        store.run_migrations().await?;

        info!("Metadata store initialized at {:?}", path);
        Ok(store)
    }

    /// In-memory store. A single connection, since every SQLite memory
    /// connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            write_gate: Mutex::new(()),
        };
        store.run_migrations().await?;

        info!("Metadata store initialized in-memory");
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                tbl TEXT NOT NULL,
                key TEXT NOT NULL,
                value BLOB NOT NULL,
                PRIMARY KEY (tbl, key)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn record_count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM records")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("count"))
    }
}

const UPSERT: &str = r#"
    INSERT INTO records (tbl, key, value) VALUES (?, ?, ?)
    ON CONFLICT(tbl, key) DO UPDATE SET value = excluded.value
"#;

#[async_trait]
impl Store for SqliteStore {
    async fn get(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT value FROM records WHERE tbl = ? AND key = ?")
            .bind(table.as_str())
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<Vec<u8>, _>("value")))
    }

    async fn put(&self, table: Table, key: &str, value: Vec<u8>) -> Result<()> {
        sqlx::query(UPSERT)
            .bind(table.as_str())
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, table: Table, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM records WHERE tbl = ? AND key = ?")
            .bind(table.as_str())
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_if_absent(&self, table: Table, key: &str, value: Vec<u8>) -> Result<bool> {
        let _gate = self.write_gate.lock().await;
        let result =
            sqlx::query("INSERT OR IGNORE INTO records (tbl, key, value) VALUES (?, ?, ?)")
                .bind(table.as_str())
                .bind(key)
                .bind(value)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update<'a>(
        &self,
        table: Table,
        key: &str,
        f: UpdateFn<'a>,
    ) -> Result<Option<Vec<u8>>> {
        let _gate = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query("SELECT value FROM records WHERE tbl = ? AND key = ?")
            .bind(table.as_str())
            .bind(key)
            .fetch_optional(&mut *tx)
            .await?
            .map(|r| r.get::<Vec<u8>, _>("value"));

        let result = match f(current.clone()) {
            Some(next) => {
                sqlx::query(UPSERT)
                    .bind(table.as_str())
                    .bind(key)
                    .bind(next.clone())
                    .execute(&mut *tx)
                    .await?;
                Some(next)
            }
            None => current,
        };

        tx.commit().await?;
        Ok(result)
    }

    async fn scan_prefix(&self, table: Table, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let rows = sqlx::query(
            "SELECT key, value FROM records WHERE tbl = ? AND substr(key, 1, length(?)) = ? ORDER BY key",
        )
        .bind(table.as_str())
        .bind(prefix)
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get::<String, _>("key"), r.get::<Vec<u8>, _>("value")))
            .collect())
    }

    async fn transact(&self, writes: Vec<Write>) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await?;
        for write in writes {
            match write {
                Write::Put { table, key, value } => {
                    sqlx::query(UPSERT)
                        .bind(table.as_str())
                        .bind(key)
                        .bind(value)
                        .execute(&mut *tx)
                        .await?;
                }
                Write::Delete { table, key } => {
                    sqlx::query("DELETE FROM records WHERE tbl = ? AND key = ?")
                        .bind(table.as_str())
                        .bind(key)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }
        tx.commit().await?;
        Ok(())
    }
}
