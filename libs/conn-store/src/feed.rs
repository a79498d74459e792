//! Buffered persister worker (§4.F "Feed handler").
//!
//! The feed carries handles to live, mutably-shared connection objects
//! rather than snapshots: the worker locks each one just long enough to
//! clone its current state before saving, so the sender can keep mutating
//! the connection (e.g. on `ended`) without racing the persister.

use crate::store::Store;
use intel_model::connection::Connection;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Channel capacity (§4.F: "capacity ~1000").
const FEED_CAPACITY: usize = 1000;

/// Log cadence (§4.F: "Every 20 persisted rows are logged").
const LOG_EVERY: u64 = 20;

pub type ConnectionHandle = Arc<parking_lot::Mutex<Connection>>;

#[derive(Clone)]
pub struct FeedSender {
    sender: tokio::sync::mpsc::Sender<ConnectionHandle>,
}

impl FeedSender {
    /// Non-blocking submission; a full feed drops the update rather than
    /// stalling the caller, matching a best-effort telemetry feed.
    pub fn submit(&self, connection: ConnectionHandle) {
        if self.sender.try_send(connection).is_err() {
            tracing::warn!("connection feed is full, dropping update");
        }
    }
}

pub struct FeedWorker {
    receiver: tokio::sync::mpsc::Receiver<ConnectionHandle>,
    store: Arc<Store>,
}

/// Builds the channel and its worker half. The caller spawns
/// [`FeedWorker::run`] and distributes [`FeedSender`] clones to producers.
pub fn channel(store: Arc<Store>) -> (FeedSender, FeedWorker) {
    let (sender, receiver) = tokio::sync::mpsc::channel(FEED_CAPACITY);
    (FeedSender { sender }, FeedWorker { receiver, store })
}

impl FeedWorker {
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut persisted = 0u64;

        loop {
            let handle = tokio::select! {
                _ = cancel.cancelled() => return,
                message = self.receiver.recv() => match message {
                    Some(handle) => handle,
                    None => return,
                },
            };

            let snapshot = handle.lock().clone();
            if let Err(error) = self.store.save(&snapshot).await {
                tracing::warn!(%error, id = %snapshot.id, "failed to persist connection");
                continue;
            }

            persisted += 1;
            if persisted % LOG_EVERY == 0 {
                tracing::info!(persisted, "persisted connection rows");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ConnStoreConfig;
    use intel_model::connection::{ConnectionType, IpScope, Verdict};
    use std::net::IpAddr;

    fn sample(id: &str) -> Connection {
        Connection {
            id: id.to_string(),
            kind: ConnectionType::Ip,
            ip_version: 4,
            protocol: 6,
            local_ip: "10.0.0.2".parse::<IpAddr>().unwrap(),
            local_port: 443,
            remote_ip: "1.1.1.1".parse::<IpAddr>().unwrap(),
            remote_port: 443,
            domain: None,
            country: None,
            asn: None,
            as_owner: None,
            latitude: None,
            longitude: None,
            scope: IpScope::Global,
            verdict: Verdict::Accept,
            started: 1_000,
            ended: None,
            tunneled: false,
            encrypted: true,
            internal: false,
            inbound: false,
            extra_data: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn submitted_connections_are_persisted() {
        let store = Store::connect(ConnStoreConfig::default()).await.unwrap();
        let (sender, worker) = channel(store.clone());
        let cancel = CancellationToken::new();

        let handle = Arc::new(parking_lot::Mutex::new(sample("fed-1")));
        sender.submit(handle.clone());

        let worker_cancel = cancel.clone();
        let task = tokio::spawn(worker.run(worker_cancel));

        let mut subscriber = store.subscribe();
        let id = tokio::time::timeout(std::time::Duration::from_secs(1), subscriber.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(id, "fed-1");

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn snapshot_reflects_state_at_processing_time_not_submission_time() {
        let store = Store::connect(ConnStoreConfig::default()).await.unwrap();
        let (sender, worker) = channel(store.clone());
        let cancel = CancellationToken::new();

        let handle = Arc::new(parking_lot::Mutex::new(sample("fed-2")));
        sender.submit(handle.clone());
        handle.lock().ended = Some(2_000);

        let worker_cancel = cancel.clone();
        let task = tokio::spawn(worker.run(worker_cancel));

        let mut subscriber = store.subscribe();
        subscriber.recv().await.unwrap();
        cancel.cancel();
        task.await.unwrap();

        let (ended,): (Option<i64>,) =
            sqlx::query_as("SELECT ended FROM connections WHERE id = ?")
                .bind("fed-2")
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(ended, Some(2_000));
    }
}
