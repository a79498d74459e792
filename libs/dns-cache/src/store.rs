use intel_model::{NameRecord, RecordType};
use moka::future::Cache;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Internal hot-cache capacity (§4.B: "internal cache size ~256").
const HOT_CACHE_CAPACITY: u64 = 256;

/// Interval the batched-write worker wakes on even without an explicit
/// "flush now" nudge (§4.B: "delayed writes batched behind a named tag").
const FLUSH_INTERVAL: Duration = Duration::from_millis(500);

pub struct StoreConfig {
    pub sqlite_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sqlite_path: "sqlite::memory:".to_string(),
        }
    }
}

/// Persistent answer cache keyed by `(fqdn, qtype)` (§4.B).
///
/// `hot` is a read-through `moka` cache; `pending` holds writes not yet
/// flushed to `pool`. A `save` updates both `hot` (so a subsequent `get`
/// observes it immediately) and `pending` (so it reaches disk on the next
/// flush tick), matching the teacher's "batched behind a named tag" delayed
/// write pattern without ever serving a stale-relative-to-itself read.
pub struct Store {
    pool: SqlitePool,
    hot: Cache<String, NameRecord>,
    pending: parking_lot::Mutex<HashMap<String, PendingWrite>>,
    flush_tag: Notify,
}

enum PendingWrite {
    Save(NameRecord),
    Delete,
}

impl Store {
    pub async fn connect(config: StoreConfig) -> anyhow::Result<Arc<Self>> {
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&config.sqlite_path)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS name_records (
                key TEXT PRIMARY KEY,
                domain TEXT NOT NULL,
                qtype INTEGER NOT NULL,
                expires INTEGER NOT NULL,
                data TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        Ok(Arc::new(Self {
            pool,
            hot: Cache::new(HOT_CACHE_CAPACITY),
            pending: parking_lot::Mutex::new(HashMap::new()),
            flush_tag: Notify::new(),
        }))
    }

    /// `Get(fqdn,qtype) → (NameRecord, ok)` (§4.B). Records missing a
    /// resolver descriptor are forward-compatibility invalid and treated
    /// as a miss.
    pub async fn get(&self, fqdn: &str, qtype: RecordType) -> Option<NameRecord> {
        let key = NameRecord::key(fqdn, qtype);

        if let Some(record) = self.hot.get(&key).await {
            return record.is_valid().then_some(record);
        }

        let row: Option<(String,)> = sqlx::query_as("SELECT data FROM name_records WHERE key = ?")
            .bind(&key)
            .fetch_optional(&self.pool)
            .await
            .inspect_err(|error| tracing::warn!(%error, %key, "dns cache read failed"))
            .ok()
            .flatten();

        let record: NameRecord = match row {
            Some((data,)) => match serde_json::from_str(&data) {
                Ok(record) => record,
                Err(error) => {
                    tracing::warn!(%error, %key, "dropping unparseable cached name record");
                    return None;
                }
            },
            None => return None,
        };

        if !record.is_valid() {
            return None;
        }

        self.hot.insert(key, record.clone()).await;
        Some(record)
    }

    /// `Save(NameRecord)` (§4.B): updates the hot cache immediately and
    /// queues the durable write for the next flush tick.
    pub async fn save(&self, record: NameRecord) {
        let key = record.own_key();
        self.hot.insert(key.clone(), record.clone()).await;
        self.pending.lock().insert(key, PendingWrite::Save(record));
        self.flush_tag.notify_one();
    }

    /// `Delete(fqdn,qtype)` (§4.B).
    pub async fn delete(&self, fqdn: &str, qtype: RecordType) {
        let key = NameRecord::key(fqdn, qtype);
        self.hot.invalidate(&key).await;
        self.pending.lock().insert(key, PendingWrite::Delete);
        self.flush_tag.notify_one();
    }

    /// `PurgePrefix` (§4.B, event `clear name cache`): drops every entry
    /// whose key starts with `prefix` from both layers.
    pub async fn purge_prefix(&self, prefix: &str) -> anyhow::Result<()> {
        let prefix = prefix.to_string();
        self.hot
            .invalidate_entries_if(move |key, _| key.starts_with(&prefix))?;

        let like_pattern = format!("{}%", prefix.replace('%', "\\%"));
        sqlx::query("DELETE FROM name_records WHERE key LIKE ? ESCAPE '\\'")
            .bind(like_pattern)
            .execute(&self.pool)
            .await?;

        self.pending
            .lock()
            .retain(|key, _| !key.starts_with(&prefix));

        Ok(())
    }

    async fn flush_pending(&self) {
        let batch: HashMap<String, PendingWrite> = std::mem::take(&mut *self.pending.lock());
        if batch.is_empty() {
            return;
        }

        let mut saved = 0usize;
        for (key, write) in batch {
            let result = match write {
                PendingWrite::Save(record) => self.persist_one(&key, &record).await,
                PendingWrite::Delete => sqlx::query("DELETE FROM name_records WHERE key = ?")
                    .bind(&key)
                    .execute(&self.pool)
                    .await
                    .map(|_| ()),
            };

            match result {
                Ok(()) => saved += 1,
                Err(error) => tracing::warn!(%error, %key, "dns cache flush failed"),
            }
        }

        tracing::debug!(count = saved, "flushed dns cache writes");
    }

    async fn persist_one(&self, key: &str, record: &NameRecord) -> Result<(), sqlx::Error> {
        let data = serde_json::to_string(record).unwrap_or_default();
        let qtype: i64 = record
            .question
            .parse::<u16>()
            .map(i64::from)
            .unwrap_or_default();

        sqlx::query(
            "INSERT INTO name_records (key, domain, qtype, expires, data)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET
                domain = excluded.domain,
                qtype = excluded.qtype,
                expires = excluded.expires,
                data = excluded.data",
        )
        .bind(key)
        .bind(&record.domain)
        .bind(qtype)
        .bind(record.expires as i64)
        .bind(data)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Background flush worker: wakes on an explicit `save`/`delete` nudge
    /// or on [`FLUSH_INTERVAL`], whichever comes first.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.flush_pending().await;
                    return;
                }
                _ = self.flush_tag.notified() => {}
                _ = tokio::time::sleep(FLUSH_INTERVAL) => {}
            }

            self.flush_pending().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intel_model::resolver::{ResolverDescriptor, ResolverId, ResolverScheme};

    fn sample_record(domain: &str) -> NameRecord {
        NameRecord {
            domain: domain.to_string(),
            question: "1".to_string(),
            rcode: "NOERROR".to_string(),
            answer: vec![format!("{domain} 300 IN A 93.184.216.34")],
            ns: vec![],
            extra: vec![],
            expires: 9_999_999_999,
            resolver: ResolverDescriptor {
                id: ResolverId(1),
                scheme: ResolverScheme::Dns,
                scope: None,
                name: "test-resolver".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn save_then_get_round_trips_through_the_hot_cache() {
        let store = Store::connect(StoreConfig::default()).await.unwrap();
        let record = sample_record("example.com.");
        store.save(record.clone()).await;

        let fetched = store.get("example.com.", RecordType::A).await.unwrap();
        assert_eq!(fetched, record);
    }

    #[tokio::test]
    async fn get_misses_after_flush_and_delete() {
        let store = Store::connect(StoreConfig::default()).await.unwrap();
        store.save(sample_record("example.com.")).await;
        store.flush_pending().await;

        store.delete("example.com.", RecordType::A).await;
        store.flush_pending().await;

        assert!(store.get("example.com.", RecordType::A).await.is_none());
    }

    #[tokio::test]
    async fn purge_prefix_removes_matching_entries() {
        let store = Store::connect(StoreConfig::default()).await.unwrap();
        store.save(sample_record("a.example.com.")).await;
        store.save(sample_record("b.other.com.")).await;
        store.flush_pending().await;

        store
            .purge_prefix("cache:intel/nameRecord/a.example.com.")
            .await
            .unwrap();

        assert!(store.get("a.example.com.", RecordType::A).await.is_none());
        assert!(store.get("b.other.com.", RecordType::A).await.is_some());
    }
}
