//! The one fan-out/fan-in primitive used for independent reads.
//!
//! Every RPC that needs several reads issues them together through
//! [`join`] (heterogeneous, via `tokio::try_join!`) or [`join_all`]
//! (homogeneous) and waits for all of them under a deadline. Missing the
//! deadline fails the whole RPC with a transient error; there is no
//! partial result.
//!
//! Multi-record writes go through [`detached`] instead: they run on their
//! own task with no deadline, so a caller that gives up cannot leave them
//! half applied.

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

/// Await `fut` (usually a `tokio::try_join!` of independent reads) under `limit`.
pub async fn join<T, F>(what: &'static str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(what, ?limit, "fan-out timed out");
            Err(Error::Timeout(what))
        }
    }
}

/// Run every future concurrently; fail fast on the first error.
pub async fn join_all<T, I>(what: &'static str, limit: Duration, futs: I) -> Result<Vec<T>>
where
    I: IntoIterator,
    I::Item: Future<Output = Result<T>>,
{
    join(what, limit, futures::future::try_join_all(futs)).await
}

/// Run `fut` to completion on its own task, even if the caller is dropped.
pub async fn detached<T, F>(what: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(fut).await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(what, error = %e, "detached write failed to finish");
            Err(Error::Internal(format!("{}: {}", what, e)))
        }
    }
}
