//! Shared store port.
//!
//! The store is the single source of truth for everything that must survive
//! a crash: open-batch state, work queues and dead-letter queues. The
//! contract is deliberately narrow — atomic single-key set, all-or-nothing
//! multi-key create, atomic list append, per-key TTL and a publish/subscribe
//! primitive — so that a Redis adapter and the in-memory adapter behave
//! identically.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;

use argus_domain::PipelineError;

#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Set `key` to `value`, optionally with a TTL, overwriting any
    /// previous value.
    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), PipelineError>;

    /// Set `key` only if absent. Returns whether the key was created.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, PipelineError>;

    /// Create all `entries` as a unit with a shared TTL, or none of them if
    /// any key already exists. No observer may see a partial write.
    async fn set_nx_many(
        &self,
        entries: &[(String, String)],
        ttl: Duration,
    ) -> Result<bool, PipelineError>;

    async fn get(&self, key: &str) -> Result<Option<String>, PipelineError>;

    async fn delete_many(&self, keys: &[String]) -> Result<(), PipelineError>;

    /// Append to the list at `key`, atomically under concurrent writers
    /// across process instances. Returns the new list length.
    async fn list_append(&self, key: &str, value: &str) -> Result<usize, PipelineError>;

    /// Full contents of the list at `key`, in append order.
    async fn list_all(&self, key: &str) -> Result<Vec<String>, PipelineError>;

    async fn list_len(&self, key: &str) -> Result<usize, PipelineError>;

    /// Refresh the TTL of an existing key. A missing key is not an error.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), PipelineError>;

    /// Keys starting with `prefix` that are still live.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, PipelineError>;

    // Pub/sub ------------------------------------------------------------

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), PipelineError>;

    /// Subscribe to `channel`. The stream ends when the adapter's
    /// subscription dies, which the caller treats as a listener crash.
    async fn subscribe(&self, channel: &str)
        -> Result<BoxStream<'static, String>, PipelineError>;

    // Queues ---------------------------------------------------------------

    /// Append to the tail of `queue`.
    async fn queue_push(&self, queue: &str, payload: &str) -> Result<(), PipelineError>;

    /// Pop the head of `queue`, blocking up to `timeout`. `None` on timeout,
    /// which is how shutdown signals get observed promptly by pull loops.
    async fn queue_pop(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<String>, PipelineError>;

    async fn queue_len(&self, queue: &str) -> Result<usize, PipelineError>;

    /// Oldest-first window of `queue` without consuming, for DLQ listings.
    async fn queue_range(
        &self,
        queue: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<String>, PipelineError>;

    /// Drop every item in `queue`, returning how many were removed.
    async fn queue_clear(&self, queue: &str) -> Result<usize, PipelineError>;
}
