//! HTTP transport boundary (§4.G "Transport").
//!
//! Grounded on the teacher's `bin-shared::http_health_check`/
//! `relay::control_endpoint` handlers: a small `axum::Router` built from a
//! shared `State`, with extractors doing the request-shape work instead of
//! hand-rolled parsing.

use crate::chart;
use crate::language::{FilterDocument, QueryDocument};
use crate::sql::{self, GeneratedQuery, QueryError};
use axum::extract::{Query as QueryParam, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::post;
use axum::Router;
use conn_store::schema::{CONNECTIONS_TABLE, CONNECTION_COLUMNS};
use serde::Deserialize;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Column as _, Row, ValueRef};
use std::time::Instant;

#[derive(Clone)]
pub struct QueryApiState {
    pool: SqlitePool,
    /// Dev mode includes the generated SQL and timings in the response
    /// (§4.G "Transport").
    dev_mode: bool,
}

impl QueryApiState {
    pub fn new(pool: SqlitePool, dev_mode: bool) -> Self {
        Self { pool, dev_mode }
    }
}

pub fn router(state: QueryApiState) -> Router {
    Router::new()
        .route(
            "/query",
            post(handle_query_body).put(handle_query_body).get(handle_query_param),
        )
        .route("/chart", post(handle_chart_body).get(handle_chart_param))
        .with_state(state)
}

#[derive(Debug, Deserialize, Default)]
struct RawParam {
    q: Option<String>,
}

async fn handle_query_body(State(state): State<QueryApiState>, body: axum::body::Bytes) -> Response {
    if body.is_empty() {
        return bad_request("request body is empty".to_string());
    }
    match serde_json::from_slice::<QueryDocument>(&body) {
        Ok(doc) => respond_to_query(&state, doc).await,
        Err(error) => bad_request(error.to_string()),
    }
}

async fn handle_query_param(
    State(state): State<QueryApiState>,
    QueryParam(params): QueryParam<RawParam>,
) -> Response {
    let Some(raw) = params.q else {
        return bad_request("missing \"q\" query parameter".to_string());
    };
    match serde_json::from_str::<QueryDocument>(&raw) {
        Ok(doc) => respond_to_query(&state, doc).await,
        Err(error) => bad_request(error.to_string()),
    }
}

async fn handle_chart_body(State(state): State<QueryApiState>, body: axum::body::Bytes) -> Response {
    if body.is_empty() {
        return respond_to_chart(&state, None).await;
    }
    match serde_json::from_slice::<FilterDocument>(&body) {
        Ok(filter) => respond_to_chart(&state, Some(filter)).await,
        Err(error) => bad_request(error.to_string()),
    }
}

async fn handle_chart_param(
    State(state): State<QueryApiState>,
    QueryParam(params): QueryParam<RawParam>,
) -> Response {
    let filter = match params.q {
        Some(raw) => match serde_json::from_str::<FilterDocument>(&raw) {
            Ok(filter) => Some(filter),
            Err(error) => return bad_request(error.to_string()),
        },
        None => None,
    };
    respond_to_chart(&state, filter).await
}

async fn respond_to_query(state: &QueryApiState, doc: QueryDocument) -> Response {
    let generated = match sql::generate_query(CONNECTIONS_TABLE, CONNECTION_COLUMNS, &doc) {
        Ok(generated) => generated,
        Err(error) => return bad_request(error.to_string()),
    };

    let started = Instant::now();
    let rows = match run_select(&state.pool, &generated).await {
        Ok(rows) => rows,
        Err(error) => return bad_request(error.to_string()),
    };
    let elapsed = started.elapsed();

    let mut body = serde_json::json!({ "rows": rows });
    if state.dev_mode {
        body["sql"] = serde_json::Value::String(generated.sql.clone());
        body["elapsedMs"] = serde_json::json!(elapsed.as_secs_f64() * 1000.0);
    }

    (StatusCode::OK, Json(body)).into_response()
}

async fn respond_to_chart(state: &QueryApiState, filter: Option<FilterDocument>) -> Response {
    let started = Instant::now();
    let points = match chart::run(&state.pool, CONNECTION_COLUMNS, filter.as_ref(), CONNECTIONS_TABLE).await {
        Ok(points) => points,
        Err(error) => return bad_request(error.to_string()),
    };
    let elapsed = started.elapsed();

    let points_json: Vec<_> = points
        .into_iter()
        .map(|point| serde_json::json!({"bucket": point.bucket, "count": point.count}))
        .collect();

    let mut body = serde_json::json!({ "points": points_json });
    if state.dev_mode {
        body["elapsedMs"] = serde_json::json!(elapsed.as_secs_f64() * 1000.0);
    }

    (StatusCode::OK, Json(body)).into_response()
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": message }))).into_response()
}

async fn run_select(
    pool: &SqlitePool,
    generated: &GeneratedQuery,
) -> Result<Vec<serde_json::Value>, QueryError> {
    let mut query = sqlx::query(&generated.sql);
    for (_, value) in &generated.params {
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

    Ok(rows.iter().map(row_to_json).collect())
}

/// Converts a row with a statically-unknown (query-dependent) column set
/// into a JSON object, falling back through the storage classes sqlite
/// actually uses (§4.F "Schema generation": INTEGER, REAL, TEXT, BLOB).
fn row_to_json(row: &SqliteRow) -> serde_json::Value {
    let mut map = serde_json::Map::new();

    for (index, column) in row.columns().iter().enumerate() {
        let value = match row.try_get_raw(index) {
            Ok(raw) if raw.is_null() => serde_json::Value::Null,
            _ => {
                if let Ok(v) = row.try_get::<i64, _>(index) {
                    serde_json::json!(v)
                } else if let Ok(v) = row.try_get::<f64, _>(index) {
                    serde_json::json!(v)
                } else if let Ok(v) = row.try_get::<String, _>(index) {
                    serde_json::json!(v)
                } else {
                    serde_json::Value::Null
                }
            }
        };
        map.insert(column.name().to_string(), value);
    }

    serde_json::Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use conn_store::{ConnStoreConfig, Store};

    #[tokio::test]
    async fn empty_body_on_query_is_a_400() {
        let store = Store::connect(ConnStoreConfig::default()).await.unwrap();
        let state = QueryApiState::new(store.pool().clone(), false);
        let response = handle_query_body(State(state), axum::body::Bytes::new()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_field_in_query_body_is_a_400() {
        let store = Store::connect(ConnStoreConfig::default()).await.unwrap();
        let state = QueryApiState::new(store.pool().clone(), false);
        let body = axum::body::Bytes::from(r#"{"selectt":["domain"]}"#);
        let response = handle_query_body(State(state), body).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_q_param_on_query_get_is_a_400() {
        let store = Store::connect(ConnStoreConfig::default()).await.unwrap();
        let state = QueryApiState::new(store.pool().clone(), false);
        let response = handle_query_param(State(state), QueryParam(RawParam::default())).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn chart_without_a_filter_succeeds() {
        let store = Store::connect(ConnStoreConfig::default()).await.unwrap();
        let state = QueryApiState::new(store.pool().clone(), true);
        let response = handle_chart_body(State(state), axum::body::Bytes::new()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
