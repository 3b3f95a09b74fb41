//! In-memory shared store.
//!
//! Key/value state sits behind one mutex so compound operations
//! (`set_nx_many`) are genuinely all-or-nothing; queues get their own
//! per-queue state with a `Notify` so a blocking pop wakes promptly on push;
//! pub/sub fans out through a `tokio::sync::broadcast` channel per topic.
//! Expiry is lazy on access, with a janitor sweep keeping the map bounded.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::{broadcast, watch, Notify};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info};

use argus_application::ports::SharedStore;
use argus_domain::PipelineError;

const CHANNEL_CAPACITY: usize = 1_024;

#[derive(Debug, Clone)]
enum StoredValue {
    Text(String),
    List(Vec<String>),
}

#[derive(Debug, Clone)]
struct ValueEntry {
    value: StoredValue,
    expires_at: Option<Instant>,
}

impl ValueEntry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    items: Mutex<VecDeque<String>>,
    notify: Notify,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, ValueEntry>>,
    queues: DashMap<String, Arc<QueueState>>,
    channels: DashMap<String, broadcast::Sender<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue_state(&self, queue: &str) -> Arc<QueueState> {
        self.queues
            .entry(queue.to_string())
            .or_insert_with(|| Arc::new(QueueState::default()))
            .clone()
    }

    fn channel(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    fn ttl_deadline(ttl: Duration) -> Option<Instant> {
        Some(Instant::now() + ttl)
    }

    /// Drop expired entries. Expiry is already lazy on every access; this
    /// sweep only keeps the map from accumulating dead keys.
    pub fn sweep_expired(&self) -> usize {
        let mut values = self.values.lock().unwrap();
        let before = values.len();
        values.retain(|_, entry| !entry.expired());
        before - values.len()
    }

    /// Periodic expiry sweep, suitable for supervisor registration.
    pub async fn run_janitor(
        &self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), PipelineError> {
        let mut ticker = tokio::time::interval(interval);
        info!(interval_ms = interval.as_millis() as u64, "store janitor started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.sweep_expired();
                    if removed > 0 {
                        debug!(removed, "expired keys swept");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("store janitor stopped");
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn wrong_type(key: &str) -> PipelineError {
    PipelineError::Store(format!("key `{key}` holds the wrong value type"))
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), PipelineError> {
        let mut values = self.values.lock().unwrap();
        values.insert(
            key.to_string(),
            ValueEntry {
                value: StoredValue::Text(value.to_string()),
                expires_at: ttl.and_then(Self::ttl_deadline),
            },
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, PipelineError> {
        let mut values = self.values.lock().unwrap();
        let occupied = values.get(key).is_some_and(|entry| !entry.expired());
        if occupied {
            return Ok(false);
        }
        values.insert(
            key.to_string(),
            ValueEntry {
                value: StoredValue::Text(value.to_string()),
                expires_at: Self::ttl_deadline(ttl),
            },
        );
        Ok(true)
    }

    async fn set_nx_many(
        &self,
        entries: &[(String, String)],
        ttl: Duration,
    ) -> Result<bool, PipelineError> {
        let mut values = self.values.lock().unwrap();
        let any_occupied = entries
            .iter()
            .any(|(key, _)| values.get(key).is_some_and(|entry| !entry.expired()));
        if any_occupied {
            return Ok(false);
        }
        let expires_at = Self::ttl_deadline(ttl);
        for (key, value) in entries {
            values.insert(
                key.clone(),
                ValueEntry {
                    value: StoredValue::Text(value.clone()),
                    expires_at,
                },
            );
        }
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, PipelineError> {
        let mut values = self.values.lock().unwrap();
        match values.get(key) {
            Some(entry) if entry.expired() => {
                values.remove(key);
                Ok(None)
            }
            Some(entry) => match &entry.value {
                StoredValue::Text(text) => Ok(Some(text.clone())),
                StoredValue::List(_) => Err(wrong_type(key)),
            },
            None => Ok(None),
        }
    }

    async fn delete_many(&self, keys: &[String]) -> Result<(), PipelineError> {
        let mut values = self.values.lock().unwrap();
        for key in keys {
            values.remove(key);
        }
        Ok(())
    }

    async fn list_append(&self, key: &str, value: &str) -> Result<usize, PipelineError> {
        let mut values = self.values.lock().unwrap();
        if values.get(key).is_some_and(|entry| entry.expired()) {
            values.remove(key);
        }
        let entry = values.entry(key.to_string()).or_insert_with(|| ValueEntry {
            value: StoredValue::List(Vec::new()),
            expires_at: None,
        });
        match &mut entry.value {
            StoredValue::List(items) => {
                items.push(value.to_string());
                Ok(items.len())
            }
            StoredValue::Text(_) => Err(wrong_type(key)),
        }
    }

    async fn list_all(&self, key: &str) -> Result<Vec<String>, PipelineError> {
        let mut values = self.values.lock().unwrap();
        match values.get(key) {
            Some(entry) if entry.expired() => {
                values.remove(key);
                Ok(Vec::new())
            }
            Some(entry) => match &entry.value {
                StoredValue::List(items) => Ok(items.clone()),
                StoredValue::Text(_) => Err(wrong_type(key)),
            },
            None => Ok(Vec::new()),
        }
    }

    async fn list_len(&self, key: &str) -> Result<usize, PipelineError> {
        Ok(self.list_all(key).await?.len())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), PipelineError> {
        let mut values = self.values.lock().unwrap();
        if let Some(entry) = values.get_mut(key) {
            if !entry.expired() {
                entry.expires_at = Self::ttl_deadline(ttl);
            }
        }
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, PipelineError> {
        let mut values = self.values.lock().unwrap();
        values.retain(|_, entry| !entry.expired());
        let mut keys: Vec<String> = values
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), PipelineError> {
        // A send without subscribers is not an error: pub/sub drops.
        let _ = self.channel(channel).send(payload.to_string());
        Ok(())
    }

    async fn subscribe(
        &self,
        channel: &str,
    ) -> Result<BoxStream<'static, String>, PipelineError> {
        let receiver = self.channel(channel).subscribe();
        // Lagged receivers skip what they missed; gap recovery is the
        // broadcaster's replay buffer, not the transport's.
        let stream = BroadcastStream::new(receiver).filter_map(|item| async move { item.ok() });
        Ok(stream.boxed())
    }

    async fn queue_push(&self, queue: &str, payload: &str) -> Result<(), PipelineError> {
        let state = self.queue_state(queue);
        state.items.lock().unwrap().push_back(payload.to_string());
        state.notify.notify_one();
        Ok(())
    }

    async fn queue_pop(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<String>, PipelineError> {
        let state = self.queue_state(queue);
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(item) = state.items.lock().unwrap().pop_front() {
                return Ok(Some(item));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            tokio::select! {
                _ = state.notify.notified() => {}
                _ = tokio::time::sleep(remaining) => return Ok(None),
            }
        }
    }

    async fn queue_len(&self, queue: &str) -> Result<usize, PipelineError> {
        Ok(self.queue_state(queue).items.lock().unwrap().len())
    }

    async fn queue_range(
        &self,
        queue: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<String>, PipelineError> {
        let state = self.queue_state(queue);
        let items = state.items.lock().unwrap();
        Ok(items.iter().skip(offset).take(limit).cloned().collect())
    }

    async fn queue_clear(&self, queue: &str) -> Result<usize, PipelineError> {
        let state = self.queue_state(queue);
        let mut items = state.items.lock().unwrap();
        let removed = items.len();
        items.clear();
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_nx_many_is_all_or_nothing() {
        let store = MemoryStore::new();
        store
            .set("batch:active:cam", "existing", None)
            .await
            .unwrap();

        let entries = vec![
            ("batch:active:cam".to_string(), "new".to_string()),
            ("batch:abc:meta".to_string(), "{}".to_string()),
        ];
        let created = store
            .set_nx_many(&entries, Duration::from_secs(60))
            .await
            .unwrap();

        assert!(!created);
        assert_eq!(
            store.get("batch:active:cam").await.unwrap().as_deref(),
            Some("existing")
        );
        assert_eq!(store.get("batch:abc:meta").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_keys_vanish_on_read_and_scan() {
        let store = MemoryStore::new();
        store
            .set("batch:active:cam", "id", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(store.get("batch:active:cam").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.get("batch:active:cam").await.unwrap(), None);
        assert!(store.scan_prefix("batch:").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn set_nx_succeeds_over_an_expired_key() {
        let store = MemoryStore::new();
        store
            .set("marker", "old", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store
            .set_nx("marker", "new", Duration::from_secs(60))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn list_append_returns_the_new_length() {
        let store = MemoryStore::new();
        assert_eq!(store.list_append("ids", "1").await.unwrap(), 1);
        assert_eq!(store.list_append("ids", "2").await.unwrap(), 2);
        assert_eq!(store.list_all("ids").await.unwrap(), vec!["1", "2"]);
    }

    #[tokio::test]
    async fn queue_pop_blocks_until_a_push_arrives() {
        let store = Arc::new(MemoryStore::new());

        let popper = {
            let store = store.clone();
            tokio::spawn(async move { store.queue_pop("q", Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        store.queue_push("q", "item").await.unwrap();

        let popped = popper.await.unwrap().unwrap();
        assert_eq!(popped.as_deref(), Some("item"));
    }

    #[tokio::test]
    async fn queue_pop_times_out_empty() {
        let store = MemoryStore::new();
        let started = Instant::now();
        let popped = store
            .queue_pop("q", Duration::from_millis(30))
            .await
            .unwrap();
        assert_eq!(popped, None);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn pubsub_delivers_to_subscribers() {
        let store = MemoryStore::new();
        let mut stream = store.subscribe("argus.events").await.unwrap();
        store.publish("argus.events", "hello").await.unwrap();
        assert_eq!(stream.next().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn janitor_sweep_drops_expired_entries() {
        let store = MemoryStore::new();
        store
            .set("a", "1", Some(Duration::from_millis(5)))
            .await
            .unwrap();
        store.set("b", "2", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.sweep_expired(), 1);
        assert_eq!(store.get("b").await.unwrap().as_deref(), Some("2"));
    }
}
