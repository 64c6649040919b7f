//! Directory of live streams.
//!
//! The [`Registrar`] maps stream ids to their [`Hub`]. Hubs are created lazily
//! on first use by a publisher and torn down by an explicit
//! [`close`](Registrar::close). All access goes through one `RwLock`: lookups
//! share it, creation and deletion take it exclusively, which guarantees at
//! most one hub per stream id even under concurrent callers.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::hub::Hub;
use crate::queue::DEFAULT_QUEUE_CAPACITY;

/// Registrar record for one live stream.
#[derive(Debug, Clone, Serialize)]
pub struct Stream {
    /// Caller-supplied stream id.
    pub id: String,

    /// When the stream was created.
    pub created: DateTime<Utc>,

    #[serde(skip)]
    hub: Hub,
}

impl Stream {
    pub fn hub(&self) -> &Hub {
        &self.hub
    }
}

/// Thread-safe stream id -> hub directory.
#[derive(Debug)]
pub struct Registrar {
    streams: RwLock<HashMap<String, Stream>>,
    queue_capacity: usize,
}

impl Default for Registrar {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl Registrar {
    /// Creates an empty registrar whose hubs use `queue_capacity` frames per
    /// subscriber.
    #[must_use]
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            queue_capacity,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Stream>> {
        self.streams.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Stream>> {
        self.streams.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the hub for `stream_id` without creating one.
    #[must_use]
    pub fn get_existing_hub(&self, stream_id: &str) -> Option<Hub> {
        self.read().get(stream_id).map(|stream| stream.hub.clone())
    }

    /// Returns the hub for `stream_id`, starting a new one if needed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn get_or_create_hub(&self, stream_id: &str) -> Hub {
        if let Some(hub) = self.get_existing_hub(stream_id) {
            return hub;
        }

        let mut streams = self.write();
        let stream = streams.entry(stream_id.to_string()).or_insert_with(|| {
            info!(stream = stream_id, "Creating stream");
            Stream {
                id: stream_id.to_string(),
                created: Utc::now(),
                hub: Hub::spawn(stream_id, self.queue_capacity),
            }
        });
        stream.hub.clone()
    }

    /// Snapshot of every live stream.
    #[must_use]
    pub fn list_streams(&self) -> Vec<Stream> {
        self.read().values().cloned().collect()
    }

    /// Removes `stream_id` and shuts its hub down.
    ///
    /// Returns whether the stream existed.
    pub fn close(&self, stream_id: &str) -> bool {
        match self.write().remove(stream_id) {
            Some(stream) => {
                stream.hub.request_shutdown();
                info!(stream = stream_id, "Stream closed");
                true
            }
            None => {
                debug!(stream = stream_id, "Close requested for unknown stream");
                false
            }
        }
    }

    /// Closes every live stream. Returns the ids that were closed.
    pub fn close_all(&self) -> Vec<String> {
        let drained: Vec<Stream> = self.write().drain().map(|(_, stream)| stream).collect();
        for stream in &drained {
            stream.hub.request_shutdown();
        }
        info!(count = drained.len(), "Closed all streams");
        drained.into_iter().map(|stream| stream.id).collect()
    }

    /// Number of live streams.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::time::timeout;

    use crate::connection::Connection;
    use crate::tokens::{Token, TokenManager};

    const WAIT: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn get_existing_hub_never_creates() {
        let registrar = Registrar::default();
        assert!(registrar.get_existing_hub("s1").is_none());
        assert!(registrar.is_empty());
    }

    #[tokio::test]
    async fn get_or_create_returns_same_hub() {
        let registrar = Registrar::default();
        let first = registrar.get_or_create_hub("s1");
        let second = registrar.get_or_create_hub("s1");
        let existing = registrar.get_existing_hub("s1").unwrap();

        assert!(first.same_hub(&second));
        assert!(first.same_hub(&existing));
        assert_eq!(registrar.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_get_or_create_yields_one_hub() {
        let registrar = Arc::new(Registrar::default());

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let registrar = Arc::clone(&registrar);
                tokio::spawn(async move { registrar.get_or_create_hub("contended") })
            })
            .collect();

        let mut hubs = Vec::new();
        for handle in handles {
            hubs.push(handle.await.unwrap());
        }

        assert_eq!(registrar.len(), 1);
        assert!(hubs.iter().all(|hub| hub.same_hub(&hubs[0])));
    }

    #[tokio::test]
    async fn different_ids_get_different_hubs() {
        let registrar = Registrar::default();
        let a = registrar.get_or_create_hub("a");
        let b = registrar.get_or_create_hub("b");
        assert!(!a.same_hub(&b));
    }

    #[tokio::test]
    async fn list_streams_is_a_snapshot() {
        let registrar = Registrar::default();
        registrar.get_or_create_hub("a");
        registrar.get_or_create_hub("b");

        let mut ids: Vec<String> = registrar
            .list_streams()
            .into_iter()
            .map(|stream| stream.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);

        let snapshot = registrar.list_streams();
        registrar.close("a");
        assert_eq!(snapshot.len(), 2);
        assert_eq!(registrar.len(), 1);
    }

    #[tokio::test]
    async fn stream_serializes_without_hub() {
        let registrar = Registrar::default();
        registrar.get_or_create_hub("s1");
        let stream = registrar.list_streams().pop().unwrap();

        let json = serde_json::to_value(&stream).unwrap();
        assert_eq!(json["id"], "s1");
        assert!(json.get("created").is_some());
        assert!(json.get("hub").is_none());
    }

    #[tokio::test]
    async fn close_removes_stream_and_terminates_hub() {
        let registrar = Registrar::default();
        let hub = registrar.get_or_create_hub("s1");

        assert!(registrar.close("s1"));
        assert!(registrar.get_existing_hub("s1").is_none());
        timeout(WAIT, hub.terminated()).await.expect("hub should terminate");

        assert!(!registrar.close("s1"));
    }

    #[tokio::test]
    async fn recreate_after_close_starts_fresh_hub() {
        let registrar = Registrar::default();
        let old = registrar.get_or_create_hub("s1");
        registrar.close("s1");

        let new = registrar.get_or_create_hub("s1");
        assert!(!old.same_hub(&new));
        timeout(WAIT, old.terminated()).await.expect("old hub should terminate");
        assert!(!new.is_terminated());
    }

    #[tokio::test]
    async fn close_all_shuts_every_hub() {
        let registrar = Registrar::default();
        let a = registrar.get_or_create_hub("a");
        let b = registrar.get_or_create_hub("b");

        let mut closed = registrar.close_all();
        closed.sort();
        assert_eq!(closed, vec!["a".to_string(), "b".to_string()]);
        assert!(registrar.is_empty());

        timeout(WAIT, a.terminated()).await.expect("hub a should terminate");
        timeout(WAIT, b.terminated()).await.expect("hub b should terminate");
    }

    #[tokio::test]
    async fn stream_close_cascades_to_connections_and_tokens() {
        let registrar = Registrar::default();
        let tokens = TokenManager::new();
        let token = Token::random();
        tokens.issue("s1", token);

        let hub = registrar.get_or_create_hub("s1");
        let subscriber = Connection::new(Some(token), DEFAULT_QUEUE_CAPACITY);
        assert!(hub.register(subscriber.clone()));

        assert!(registrar.close("s1"));
        assert_eq!(tokens.revoke_all_for_stream("s1"), vec![token]);

        timeout(WAIT, hub.terminated()).await.expect("hub should terminate");
        assert!(subscriber.queue().is_closed());
        assert!(!tokens.validate("s1", token));
    }
}
