//! Time-series chart aggregation (§4.G "Chart handler").

use crate::language::FilterDocument;
use crate::sql::{self, QueryError};
use conn_store::schema::Column;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

/// Window/bucket sizing (§4.G: "recursive CTE... over the last 600 seconds...
/// groups into 10-second buckets").
pub const WINDOW_SECS: i64 = 600;
pub const BUCKET_SECS: i64 = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct ChartPoint {
    pub bucket: i64,
    pub count: i64,
}

/// Runs the chart query: one row per second over the trailing
/// [`WINDOW_SECS`], left-joined against `connections` on
/// `started <= t AND (ended IS NULL OR ended > t)`, grouped into
/// [`BUCKET_SECS`]-wide buckets. An optional filter narrows which
/// connections are counted without shrinking the bucket coverage: the
/// filter's clauses are folded into the join condition, not a trailing
/// `WHERE`, so seconds with no matching connection still emit a
/// zero-count bucket (§8: "returns exactly 60 buckets... each value ≥ 0").
pub async fn run(
    pool: &SqlitePool,
    columns: &[Column],
    filter: Option<&FilterDocument>,
    table: &str,
) -> Result<Vec<ChartPoint>, QueryError> {
    let (join_clauses, params) = match filter {
        Some(filter) => sql::build_clauses(columns, &filter.query)?,
        None => (Vec::new(), Vec::new()),
    };

    let mut join_condition = format!(
        "{table}.started <= seconds.t AND ({table}.ended IS NULL OR {table}.ended > seconds.t)"
    );
    for clause in &join_clauses {
        join_condition.push_str(" AND ");
        join_condition.push_str(clause);
    }

    let sql = format!(
        "WITH RECURSIVE seconds(t) AS ( \
            SELECT (CAST(strftime('%s','now') AS INTEGER) - {offset}) \
            UNION ALL \
            SELECT t + 1 FROM seconds WHERE t < CAST(strftime('%s','now') AS INTEGER) \
        ) \
        SELECT CAST(round(seconds.t / {bucket}.0, 0) * {bucket} AS INTEGER) AS bucket, \
               COUNT({table}.id) AS count \
        FROM seconds \
        LEFT JOIN {table} ON {join_condition} \
        GROUP BY bucket \
        ORDER BY bucket",
        offset = WINDOW_SECS - 1,
        bucket = BUCKET_SECS,
    );

    let mut query = sqlx::query(&sql);
    for (_, value) in &params {
        query = match value {
            conn_store::SqlValue::Integer(v) => query.bind(*v),
            conn_store::SqlValue::Real(v) => query.bind(*v),
            conn_store::SqlValue::Text(v) => query.bind(v.clone()),
            conn_store::SqlValue::Null => query.bind(None::<String>),
        };
    }

    let rows = query
        .fetch_all(pool)
        .await
        .map_err(|error| QueryError::Malformed(error.to_string()))?;

    Ok(rows
        .into_iter()
        .map(|row| ChartPoint {
            bucket: row.get::<i64, _>("bucket"),
            count: row.get::<i64, _>("count"),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use conn_store::schema::CONNECTION_COLUMNS;
    use conn_store::{ConnStoreConfig, Store};
    use intel_model::connection::{Connection, ConnectionType, IpScope, Verdict};
    use std::net::IpAddr;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unix_now() -> i64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64
    }

    fn sample(id: &str, started: i64, ended: Option<i64>) -> Connection {
        Connection {
            id: id.to_string(),
            kind: ConnectionType::Ip,
            ip_version: 4,
            protocol: 6,
            local_ip: "10.0.0.1".parse::<IpAddr>().unwrap(),
            local_port: 1,
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
            started,
            ended,
            tunneled: false,
            encrypted: true,
            internal: false,
            inbound: false,
            extra_data: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn empty_filter_returns_sixty_non_negative_buckets() {
        let store = Store::connect(ConnStoreConfig::default()).await.unwrap();

        let points = run(store.pool(), CONNECTION_COLUMNS, None, "connections")
            .await
            .unwrap();

        assert_eq!(points.len(), 60);
        assert!(points.iter().all(|p| p.count >= 0));
    }

    #[tokio::test]
    async fn an_active_connection_is_counted_in_every_covered_bucket() {
        let store = Store::connect(ConnStoreConfig::default()).await.unwrap();
        let now = unix_now();
        store.save(&sample("c1", now - 550, None)).await.unwrap();

        let points = run(store.pool(), CONNECTION_COLUMNS, None, "connections")
            .await
            .unwrap();

        assert_eq!(points.len(), 60);
        assert!(points.iter().any(|p| p.count > 0));
    }

    #[tokio::test]
    async fn filter_narrows_counts_without_dropping_buckets() {
        let store = Store::connect(ConnStoreConfig::default()).await.unwrap();
        let now = unix_now();
        store.save(&sample("c1", now - 550, None)).await.unwrap();

        let filter: FilterDocument =
            serde_json::from_str(r#"{"query":{"id":{"$eq":"does-not-exist"}}}"#).unwrap();

        let points = run(store.pool(), CONNECTION_COLUMNS, Some(&filter), "connections")
            .await
            .unwrap();

        assert_eq!(points.len(), 60);
        assert!(points.iter().all(|p| p.count == 0));
    }
}
