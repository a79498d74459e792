use crate::schema::{self, CONNECTIONS_TABLE, CONNECTION_COLUMNS};
use intel_model::connection::Connection;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

/// Dynamically-typed bind value (§4.F: "Time values encode as either integer
/// unix-seconds... zero-time encodes as NULL on both read and write"). The
/// value encoder used by `Save` is the same one the query engine (§4.G) uses
/// for generated WHERE-clause parameters.
#[derive(Debug, Clone)]
pub enum SqlValue {
    Integer(i64),
    Real(f64),
    Text(String),
    Null,
}

pub struct ConnStoreConfig {
    pub sqlite_path: String,
    pub cleanup_interval: std::time::Duration,
    pub retention: std::time::Duration,
}

impl Default for ConnStoreConfig {
    fn default() -> Self {
        Self {
            sqlite_path: "sqlite::memory:".to_string(),
            cleanup_interval: std::time::Duration::from_secs(10),
            retention: std::time::Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Persistent store for the `connections` table (§3, §4.F).
///
/// Writes serialize on `write_lock`: the spec calls out that the underlying
/// engine (sqlite) is not assumed concurrency-safe for this usage, so every
/// `save`/`cleanup` holds it for the duration of its statement.
pub struct Store {
    pool: SqlitePool,
    write_lock: tokio::sync::Mutex<()>,
    events: tokio::sync::broadcast::Sender<String>,
}

impl Store {
    pub async fn connect(config: ConnStoreConfig) -> anyhow::Result<std::sync::Arc<Self>> {
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&config.sqlite_path)
            .await?;

        sqlx::query(&schema::create_table_sql(CONNECTIONS_TABLE, CONNECTION_COLUMNS))
            .execute(&pool)
            .await?;

        let (events, _) = tokio::sync::broadcast::channel(256);

        Ok(std::sync::Arc::new(Self {
            pool,
            write_lock: tokio::sync::Mutex::new(()),
            events,
        }))
    }

    /// The underlying pool, shared with the query engine (§4.G) so chart and
    /// ad-hoc queries run against the same database the feed writes to.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Runtime-push subscription for external subscribers keyed by
    /// connection id, emitted after every successful `save` (§4.F "Feed
    /// handler").
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<String> {
        self.events.subscribe()
    }

    /// Upsert on primary key (§4.F "Save").
    pub async fn save(&self, connection: &Connection) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;

        let sql = schema::upsert_sql(CONNECTIONS_TABLE, CONNECTION_COLUMNS);
        let values = encode(connection);

        let mut query = sqlx::query(&sql);
        for value in &values {
            query = match value {
                SqlValue::Integer(v) => query.bind(*v),
                SqlValue::Real(v) => query.bind(*v),
                SqlValue::Text(v) => query.bind(v.clone()),
                SqlValue::Null => query.bind(None::<String>),
            };
        }
        query.execute(&self.pool).await?;

        let _ = self.events.send(connection.id.clone());
        Ok(())
    }

    /// Deletes every row with `ended IS NOT NULL AND ended < threshold`
    /// (§4.F "Cleanup"). Returns the number of rows removed.
    pub async fn cleanup(&self, threshold_unix_secs: i64) -> anyhow::Result<u64> {
        let _guard = self.write_lock.lock().await;

        let result = sqlx::query(
            "DELETE FROM connections WHERE ended IS NOT NULL AND ended < ?",
        )
        .bind(threshold_unix_secs)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

/// Encodes a [`Connection`] into [`CONNECTION_COLUMNS`] order. Any future
/// drift between the two must be caught by the column-count assertion in
/// tests, not at runtime.
fn encode(connection: &Connection) -> Vec<SqlValue> {
    let optional_text = |value: &Option<String>| match value {
        Some(text) => SqlValue::Text(text.clone()),
        None => SqlValue::Null,
    };

    vec![
        SqlValue::Text(connection.id.clone()),
        SqlValue::Text(connection.kind.as_str().to_string()),
        SqlValue::Integer(connection.ip_version as i64),
        SqlValue::Integer(connection.protocol as i64),
        SqlValue::Text(connection.local_ip.to_string()),
        SqlValue::Integer(connection.local_port as i64),
        SqlValue::Text(connection.remote_ip.to_string()),
        SqlValue::Integer(connection.remote_port as i64),
        optional_text(&connection.domain),
        optional_text(&connection.country),
        connection
            .asn
            .map(|asn| SqlValue::Integer(asn as i64))
            .unwrap_or(SqlValue::Null),
        optional_text(&connection.as_owner),
        connection
            .latitude
            .map(SqlValue::Real)
            .unwrap_or(SqlValue::Null),
        connection
            .longitude
            .map(SqlValue::Real)
            .unwrap_or(SqlValue::Null),
        SqlValue::Text(connection.scope.as_str().to_string()),
        SqlValue::Text(connection.verdict.as_str().to_string()),
        SqlValue::Integer(connection.started),
        connection.ended.map(SqlValue::Integer).unwrap_or(SqlValue::Null),
        SqlValue::Integer(connection.tunneled as i64),
        SqlValue::Integer(connection.encrypted as i64),
        SqlValue::Integer(connection.internal as i64),
        SqlValue::Integer(connection.inbound as i64),
        SqlValue::Text(
            serde_json::to_string(&connection.extra_data).unwrap_or_else(|_| "{}".to_string()),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use intel_model::connection::{ConnectionType, IpScope, Verdict};
    use std::net::IpAddr;

    fn sample(id: &str, started: i64, ended: Option<i64>) -> Connection {
        Connection {
            id: id.to_string(),
            kind: ConnectionType::Dns,
            ip_version: 4,
            protocol: 17,
            local_ip: "10.0.0.1".parse::<IpAddr>().unwrap(),
            local_port: 53123,
            remote_ip: "93.184.216.34".parse::<IpAddr>().unwrap(),
            remote_port: 53,
            domain: Some("example.com.".to_string()),
            country: Some("US".to_string()),
            asn: Some(15133),
            as_owner: Some("Example Networks".to_string()),
            latitude: Some(37.4),
            longitude: Some(-122.1),
            scope: IpScope::Global,
            verdict: Verdict::Accept,
            started,
            ended,
            tunneled: true,
            encrypted: true,
            internal: false,
            inbound: false,
            extra_data: serde_json::json!({"rtt_ms": 12}),
        }
    }

    #[test]
    fn encode_matches_column_count() {
        let row = encode(&sample("a", 0, None));
        assert_eq!(row.len(), CONNECTION_COLUMNS.len());
    }

    #[tokio::test]
    async fn save_is_an_upsert_on_id() {
        let store = Store::connect(ConnStoreConfig::default()).await.unwrap();

        let mut connection = sample("conn-1", 1_000, None);
        store.save(&connection).await.unwrap();

        connection.ended = Some(1_100);
        connection.verdict = Verdict::Drop;
        store.save(&connection).await.unwrap();

        let row: (Option<i64>, String) =
            sqlx::query_as("SELECT ended, verdict FROM connections WHERE id = ?")
                .bind("conn-1")
                .fetch_one(store.pool())
                .await
                .unwrap();

        assert_eq!(row.0, Some(1_100));
        assert_eq!(row.1, "drop");

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM connections")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }

    #[tokio::test]
    async fn save_emits_a_subscriber_event_keyed_by_id() {
        let store = Store::connect(ConnStoreConfig::default()).await.unwrap();
        let mut subscriber = store.subscribe();

        store.save(&sample("conn-2", 1_000, None)).await.unwrap();

        let id = subscriber.recv().await.unwrap();
        assert_eq!(id, "conn-2");
    }

    #[tokio::test]
    async fn cleanup_removes_only_ended_rows_past_the_threshold() {
        let store = Store::connect(ConnStoreConfig::default()).await.unwrap();

        store.save(&sample("still-active", 1_000, None)).await.unwrap();
        store.save(&sample("ended-recent", 1_000, Some(5_000))).await.unwrap();
        store.save(&sample("ended-old", 1_000, Some(1_500))).await.unwrap();

        let removed = store.cleanup(2_000).await.unwrap();
        assert_eq!(removed, 1);

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM connections")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count.0, 2);
    }
}
