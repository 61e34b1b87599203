use crate::error::DataSourceError;
use crate::prometheus::PrometheusDataSource;
use crate::sql::SqlDataSource;
use crate::{DataSource, DataSourceRegistry, DataSourcesConfig, PrometheusConfig, SqlSourceConfig};
use axum::extract::Query;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, TimeZone, Utc};
use dashmon_common::types::{DataSourceStatus, QueryRequest, QueryResult, ResultKind};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn request_for(datasource: &str, metric: &str) -> QueryRequest {
    QueryRequest {
        datasource: Some(datasource.to_string()),
        metric: Some(metric.to_string()),
        ..QueryRequest::default()
    }
}

/// Reachable source whose queries always fail.
struct FailingSource {
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl DataSource for FailingSource {
    fn name(&self) -> &str {
        "broken"
    }

    async fn test_connection(&self) -> bool {
        true
    }

    async fn query(
        &self,
        _request: &QueryRequest,
        _now: DateTime<Utc>,
    ) -> crate::Result<QueryResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(DataSourceError::InvalidQuery("backend exploded".to_string()))
    }

    async fn list_metrics(&self) -> crate::Result<Vec<String>> {
        Err(DataSourceError::Unsupported("metrics".to_string()))
    }
}

/// Reachable source whose queries never finish.
struct HangingSource;

#[async_trait::async_trait]
impl DataSource for HangingSource {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn test_connection(&self) -> bool {
        true
    }

    async fn query(
        &self,
        _request: &QueryRequest,
        _now: DateTime<Utc>,
    ) -> crate::Result<QueryResult> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(QueryResult::Single { data: vec![] })
    }

    async fn list_metrics(&self) -> crate::Result<Vec<String>> {
        Ok(vec!["slow_metric".to_string()])
    }
}

/// Source that refuses its liveness probe.
struct DownSource;

#[async_trait::async_trait]
impl DataSource for DownSource {
    fn name(&self) -> &str {
        "down"
    }

    async fn test_connection(&self) -> bool {
        false
    }

    async fn query(
        &self,
        _request: &QueryRequest,
        _now: DateTime<Utc>,
    ) -> crate::Result<QueryResult> {
        Ok(QueryResult::Single { data: vec![] })
    }

    async fn list_metrics(&self) -> crate::Result<Vec<String>> {
        Ok(vec![])
    }
}

#[tokio::test]
async fn registry_without_datasource_serves_synthetic_data() {
    let registry = DataSourceRegistry::new(Duration::from_secs(5));
    let result = registry.query_at(&QueryRequest::default(), fixed_now()).await;
    assert_eq!(result.kind(), ResultKind::Mock);
    assert_eq!(result.primary_series().unwrap().len(), 61);
}

#[tokio::test]
async fn registry_unknown_datasource_serves_synthetic_data() {
    let registry = DataSourceRegistry::new(Duration::from_secs(5));
    let result = registry.query_at(&request_for("influx", "cpu"), fixed_now()).await;
    assert!(result.is_synthetic());
}

#[tokio::test]
async fn registry_falls_back_when_adapter_fails() {
    let mut registry = DataSourceRegistry::new(Duration::from_secs(5));
    let source = Arc::new(FailingSource {
        calls: AtomicUsize::new(0),
    });
    assert!(registry.register_if_reachable(source.clone()).await);

    let result = registry.query_at(&request_for("broken", "cpu"), fixed_now()).await;
    assert_eq!(result.kind(), ResultKind::Mock);
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    for point in result.primary_series().unwrap() {
        assert!((0.0..=100.0).contains(&point.value));
    }
}

#[tokio::test(start_paused = true)]
async fn registry_falls_back_when_adapter_hangs() {
    let mut registry = DataSourceRegistry::new(Duration::from_secs(2));
    assert!(registry.register_if_reachable(Arc::new(HangingSource)).await);

    let result = registry.query_at(&request_for("hanging", "cpu"), fixed_now()).await;
    assert!(result.is_synthetic());
}

#[tokio::test]
async fn unreachable_source_is_not_registered_but_listed() {
    let mut registry = DataSourceRegistry::new(Duration::from_secs(5));
    assert!(!registry.register_if_reachable(Arc::new(DownSource)).await);
    assert!(!registry.has_source("down"));

    let infos = registry.list_data_sources().await;
    assert_eq!(infos.len(), 2);
    assert_eq!(infos[0].id, "mock");
    assert_eq!(infos[0].status, DataSourceStatus::Connected);
    assert_eq!(infos[1].id, "down");
    assert_eq!(infos[1].status, DataSourceStatus::Unavailable);

    assert_eq!(registry.test_connection("down").await, Some(false));
    assert_eq!(registry.test_connection("mock").await, Some(true));
    assert_eq!(registry.test_connection("nope").await, None);
}

#[tokio::test]
async fn list_available_metrics_degrades_per_source() {
    let mut registry = DataSourceRegistry::new(Duration::from_secs(5));
    registry
        .register_if_reachable(Arc::new(FailingSource {
            calls: AtomicUsize::new(0),
        }))
        .await;
    registry.register_if_reachable(Arc::new(HangingSource)).await;

    let metrics = registry.list_available_metrics().await;
    assert_eq!(
        metrics["mock"],
        vec!["cpu_usage", "memory_usage", "disk_io", "network_traffic"]
    );
    assert!(metrics["broken"].is_empty());
    assert_eq!(metrics["hanging"], vec!["slow_metric"]);
    assert!(registry.list_metrics("unknown").await.is_empty());
}

#[tokio::test]
async fn test_connections_is_idempotent() {
    let mut registry = DataSourceRegistry::new(Duration::from_secs(5));
    registry.register_if_reachable(Arc::new(HangingSource)).await;

    let first = registry.test_connections().await;
    let second = registry.test_connections().await;
    assert_eq!(first, second);
    assert_eq!(first.get("hanging"), Some(&true));
}

#[tokio::test]
async fn initialize_without_configuration_registers_nothing() {
    let mut registry = DataSourceRegistry::new(Duration::from_secs(5));
    registry.initialize(&DataSourcesConfig::default()).await;
    registry.initialize(&DataSourcesConfig::default()).await;
    assert!(registry.test_connections().await.is_empty());
    assert_eq!(registry.list_data_sources().await.len(), 1);
    registry.close().await;
}

#[tokio::test]
async fn initialize_skips_unreachable_prometheus() {
    let config = DataSourcesConfig {
        prometheus: PrometheusConfig {
            url: Some("http://127.0.0.1:1".to_string()),
            timeout_secs: 1,
            ..PrometheusConfig::default()
        },
        ..DataSourcesConfig::default()
    };
    let mut registry = DataSourceRegistry::new(Duration::from_secs(2));
    registry.initialize(&config).await;

    assert!(!registry.has_source("prometheus"));
    let result = registry.query_at(&request_for("prometheus", "up"), fixed_now()).await;
    assert!(result.is_synthetic());
}

// --- Prometheus adapter against an in-process stub ---

async fn spawn_stub(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

async fn query_range_stub(
    Query(params): Query<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    let query = params.get("query").cloned().unwrap_or_default();
    let result = if query.starts_with("avg by (instance)") {
        json!([
            {"metric": {"instance": "a"}, "values": [[1714564740, "10"], [1714564800, "20"]]},
            {"metric": {"instance": "b"}, "values": [[1714564800, "30"]]}
        ])
    } else {
        let step = params.get("step").cloned().unwrap_or_default();
        json!([
            {"metric": {}, "values": [[1714564740, "1.5"], [1714564800, step]]}
        ])
    };
    Json(json!({"status": "success", "data": {"resultType": "matrix", "result": result}}))
}

fn prometheus_stub() -> Router {
    Router::new()
        .route("/-/healthy", get(|| async { "Prometheus Server is Healthy.\n" }))
        .route("/api/v1/query_range", get(query_range_stub))
        .route(
            "/api/v1/label/__name__/values",
            get(|| async { Json(json!({"status": "success", "data": ["up", "node_load1"]})) }),
        )
}

fn prometheus_source(base: &str) -> PrometheusDataSource {
    PrometheusDataSource::new(
        "prometheus",
        &PrometheusConfig {
            url: Some(format!("{base}/")),
            ..PrometheusConfig::default()
        },
    )
    .unwrap()
}

#[tokio::test]
async fn prometheus_single_series_query() {
    let base = spawn_stub(prometheus_stub()).await;
    let source = prometheus_source(&base);
    assert!(source.test_connection().await);

    let result = source.query(&request_for("prometheus", "up"), fixed_now()).await.unwrap();
    match result {
        QueryResult::Single { data } => {
            assert_eq!(data.len(), 2);
            assert_eq!(data[0].value, 1.5);
            // one hour over 250 samples is below the 15s floor
            assert_eq!(data[1].value, 15.0);
        }
        other => panic!("expected single, got {other:?}"),
    }
}

#[tokio::test]
async fn prometheus_grouped_query_and_metric_list() {
    let base = spawn_stub(prometheus_stub()).await;
    let source = prometheus_source(&base);

    let request = QueryRequest {
        group_by: vec!["instance".to_string()],
        ..request_for("prometheus", "node_load1")
    };
    let result = source.query(&request, fixed_now()).await.unwrap();
    match result {
        QueryResult::Grouped { series } => {
            assert_eq!(series.len(), 2);
            assert_eq!(series[0].name, "instance=a");
            assert_eq!(series[0].points.len(), 2);
        }
        other => panic!("expected grouped, got {other:?}"),
    }

    assert_eq!(source.list_metrics().await.unwrap(), vec!["up", "node_load1"]);
}

#[tokio::test]
async fn prometheus_error_payload_is_an_adapter_error() {
    let router = Router::new().route(
        "/api/v1/query_range",
        get(|| async {
            Json(json!({"status": "error", "errorType": "bad_data", "error": "parse error"}))
        }),
    );
    let base = spawn_stub(router).await;
    let source = prometheus_source(&base);

    let err = source
        .query(&request_for("prometheus", "up"), fixed_now())
        .await
        .unwrap_err();
    assert!(matches!(err, DataSourceError::Api { ref error_type, .. } if error_type == "bad_data"));
    assert!(!source.test_connection().await);
}

#[tokio::test]
async fn prometheus_http_failure_falls_back_through_registry() {
    let router = Router::new()
        .route("/-/healthy", get(|| async { "ok" }))
        .route(
            "/api/v1/query_range",
            get(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "overloaded") }),
        );
    let base = spawn_stub(router).await;
    let source = prometheus_source(&base);

    let err = source
        .query(&request_for("prometheus", "up"), fixed_now())
        .await
        .unwrap_err();
    assert!(matches!(err, DataSourceError::HttpStatus { status: 503, .. }));

    let mut registry = DataSourceRegistry::new(Duration::from_secs(5));
    assert!(registry.register_if_reachable(Arc::new(source)).await);
    let result = registry.query_at(&request_for("prometheus", "up"), fixed_now()).await;
    assert!(result.is_synthetic());
}

// --- SQL adapter against in-memory SQLite ---

async fn metrics_db() -> DatabaseConnection {
    let mut options = ConnectOptions::new("sqlite::memory:".to_string());
    options.max_connections(1).sqlx_logging(false);
    let db = Database::connect(options).await.unwrap();
    db.execute_unprepared(
        "CREATE TABLE metrics (
            timestamp TEXT NOT NULL,
            metric_name TEXT NOT NULL,
            host TEXT,
            value REAL
        )",
    )
    .await
    .unwrap();
    db.execute_unprepared(
        "INSERT INTO metrics (timestamp, metric_name, host, value) VALUES
            ('2024-05-01T11:58:10Z', 'cpu_usage', 'a', 10.0),
            ('2024-05-01T11:58:40Z', 'cpu_usage', 'a', 20.0),
            ('2024-05-01T11:59:05Z', 'cpu_usage', 'b', 90.0),
            ('2024-05-01T11:59:30Z', 'cpu_usage', 'a', NULL),
            ('2024-05-01T11:59:50Z', 'mem_usage', 'a', 55.0),
            ('2024-05-01T10:00:00Z', 'cpu_usage', 'a', 99.0)",
    )
    .await
    .unwrap();
    db
}

#[tokio::test]
async fn sql_query_aggregates_per_minute() {
    let source =
        SqlDataSource::from_connection("postgres", metrics_db().await, &SqlSourceConfig::default())
            .unwrap();
    assert!(source.test_connection().await);

    let request = QueryRequest {
        from: "now-5m".to_string(),
        ..request_for("postgres", "cpu_usage")
    };
    let result = source.query(&request, fixed_now()).await.unwrap();
    match result {
        QueryResult::Timeseries { data } => {
            assert_eq!(data.len(), 2);
            assert_eq!(data[0].timestamp, Utc.with_ymd_and_hms(2024, 5, 1, 11, 58, 0).unwrap());
            assert_eq!(data[0].value, 15.0);
            assert_eq!(data[1].value, 90.0);
        }
        other => panic!("expected timeseries, got {other:?}"),
    }
}

#[tokio::test]
async fn sql_query_groups_by_column() {
    let source =
        SqlDataSource::from_connection("postgres", metrics_db().await, &SqlSourceConfig::default())
            .unwrap();

    let request = QueryRequest {
        from: "now-5m".to_string(),
        aggregation: "max".to_string(),
        group_by: vec!["host".to_string()],
        ..request_for("postgres", "cpu_usage")
    };
    match source.query(&request, fixed_now()).await.unwrap() {
        QueryResult::Grouped { series } => {
            assert_eq!(series.len(), 2);
            assert_eq!(series[0].name, "host=a");
            assert_eq!(series[0].points.len(), 1);
            assert_eq!(series[0].points[0].value, 20.0);
            assert_eq!(series[1].name, "host=b");
        }
        other => panic!("expected grouped, got {other:?}"),
    }
}

#[tokio::test]
async fn sql_rejects_unsafe_identifiers_and_aggregations() {
    let source =
        SqlDataSource::from_connection("postgres", metrics_db().await, &SqlSourceConfig::default())
            .unwrap();

    let request = QueryRequest {
        group_by: vec!["host; DROP TABLE metrics".to_string()],
        ..request_for("postgres", "cpu_usage")
    };
    assert!(matches!(
        source.query(&request, fixed_now()).await,
        Err(DataSourceError::InvalidIdentifier(_))
    ));

    let request = QueryRequest {
        aggregation: "median".to_string(),
        ..request_for("postgres", "cpu_usage")
    };
    assert!(matches!(
        source.query(&request, fixed_now()).await,
        Err(DataSourceError::InvalidQuery(_))
    ));

    let bad_table = SqlSourceConfig {
        table: "metrics x".to_string(),
        ..SqlSourceConfig::default()
    };
    assert!(SqlDataSource::from_connection("postgres", metrics_db().await, &bad_table).is_err());
}

#[tokio::test]
async fn sql_metric_filter_is_bound() {
    let source =
        SqlDataSource::from_connection("postgres", metrics_db().await, &SqlSourceConfig::default())
            .unwrap();
    let compiled = source
        .compile(Some("x' OR '1'='1"), "avg", &[], fixed_now(), fixed_now())
        .unwrap();
    assert!(!compiled.sql.contains("OR '1'"));
    assert_eq!(compiled.values.len(), 3);
    assert!(compiled.sql.ends_with("ORDER BY bucket ASC"));
}

#[tokio::test]
async fn sql_lists_distinct_metrics() {
    let source =
        SqlDataSource::from_connection("postgres", metrics_db().await, &SqlSourceConfig::default())
            .unwrap();
    assert_eq!(source.list_metrics().await.unwrap(), vec!["cpu_usage", "mem_usage"]);
    source.close().await.unwrap();
}
