//! Periodic row cleaner (§4.F "Cleanup").

use crate::store::Store;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

pub struct Cleanup {
    store: Arc<Store>,
    interval: Duration,
    retention: Duration,
}

impl Cleanup {
    pub fn new(store: Arc<Store>, interval: Duration, retention: Duration) -> Self {
        Self {
            store,
            interval,
            retention,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.interval) => {}
            }

            let threshold = unix_now() - self.retention.as_secs() as i64;
            match self.store.cleanup(threshold).await {
                Ok(removed) if removed > 0 => {
                    tracing::debug!(removed, threshold, "swept ended connections");
                }
                Ok(_) => {}
                Err(error) => tracing::warn!(%error, "connection cleanup sweep failed"),
            }
        }
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ConnStoreConfig;
    use intel_model::connection::{Connection, ConnectionType, IpScope, Verdict};
    use std::net::IpAddr;

    fn ended_at(id: &str, ended: i64) -> Connection {
        Connection {
            id: id.to_string(),
            kind: ConnectionType::Dns,
            ip_version: 4,
            protocol: 17,
            local_ip: "127.0.0.1".parse::<IpAddr>().unwrap(),
            local_port: 1,
            remote_ip: "127.0.0.1".parse::<IpAddr>().unwrap(),
            remote_port: 1,
            domain: None,
            country: None,
            asn: None,
            as_owner: None,
            latitude: None,
            longitude: None,
            scope: IpScope::Loopback,
            verdict: Verdict::Accept,
            started: 0,
            ended: Some(ended),
            tunneled: false,
            encrypted: false,
            internal: true,
            inbound: false,
            extra_data: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn run_sweeps_on_its_interval_until_cancelled() {
        let store = Store::connect(ConnStoreConfig::default()).await.unwrap();
        store.save(&ended_at("old", 1)).await.unwrap();

        let worker = Cleanup::new(store.clone(), Duration::from_millis(20), Duration::ZERO);
        let cancel = CancellationToken::new();
        let worker_cancel = cancel.clone();
        let task = tokio::spawn(worker.run(worker_cancel));

        tokio::time::sleep(Duration::from_millis(80)).await;
        cancel.cancel();
        task.await.unwrap();

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM connections")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }
}
