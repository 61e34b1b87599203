#![allow(dead_code)]

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use chrono::{DateTime, TimeZone, Utc};
use dashmon_common::types::{QueryRequest, QueryResult, SeriesPoint};
use dashmon_datasource::{DataSource, DataSourceRegistry};
use dashmon_server::alerting::AlertScheduler;
use dashmon_server::app;
use dashmon_server::clock::{Clock, ManualClock};
use dashmon_server::config::{AlertingConfig, ServerConfig};
use dashmon_server::service::DashboardService;
use dashmon_server::state::AppState;
use dashmon_storage::AlertStore;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::util::ServiceExt;

/// A reachable backend whose latest value is set by the test.
pub struct ScriptedSource {
    name: String,
    value: Mutex<Option<f64>>,
}

impl ScriptedSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            value: Mutex::new(None),
        }
    }

    pub fn set_value(&self, value: Option<f64>) {
        *self.value.lock().unwrap() = value;
    }
}

#[async_trait::async_trait]
impl DataSource for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn test_connection(&self) -> bool {
        true
    }

    async fn query(
        &self,
        _request: &QueryRequest,
        now: DateTime<Utc>,
    ) -> dashmon_datasource::Result<QueryResult> {
        let data = self
            .value
            .lock()
            .unwrap()
            .map(|value| vec![SeriesPoint { timestamp: now, value }])
            .unwrap_or_default();
        Ok(QueryResult::Single { data })
    }

    async fn list_metrics(&self) -> dashmon_datasource::Result<Vec<String>> {
        Ok(vec!["cpu_usage".to_string(), "mem_usage".to_string()])
    }
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

pub struct TestContext {
    pub state: AppState,
    pub app: axum::Router,
    pub store: Arc<AlertStore>,
    /// Second handle on the store's database, for edits the API refuses.
    pub db: DatabaseConnection,
    pub registry: Arc<DataSourceRegistry>,
    pub clock: Arc<ManualClock>,
    pub source: Arc<ScriptedSource>,
}

impl TestContext {
    pub fn scheduler(&self, alerting: &AlertingConfig) -> AlertScheduler {
        let clock: Arc<dyn Clock> = self.clock.clone();
        AlertScheduler::new(self.store.clone(), self.registry.clone(), clock, alerting)
    }

    pub async fn execute_sql(&self, sql: &str) {
        self.db
            .execute_unprepared(sql)
            .await
            .expect("statement should run");
    }
}

pub async fn build_test_context() -> Result<TestContext> {
    dashmon_common::id::init(1, 1);

    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).sqlx_logging(false);
    let db = Database::connect(options).await?;
    let store = Arc::new(AlertStore::from_connection(db.clone()).await?);
    let source = Arc::new(ScriptedSource::new("prometheus"));
    let mut registry = DataSourceRegistry::new(Duration::from_secs(1));
    assert!(registry.register_if_reachable(source.clone()).await);
    let registry = Arc::new(registry);

    let clock = Arc::new(ManualClock::new(t0()));
    let dyn_clock: Arc<dyn Clock> = clock.clone();

    let config = ServerConfig::default();
    let service = Arc::new(DashboardService::new(
        store.clone(),
        registry.clone(),
        dyn_clock,
        config.alerting.history_limit,
    ));

    let state = AppState {
        service,
        config: Arc::new(config),
        start_time: Utc::now(),
    };
    let app = app::build_http_app(state.clone());

    Ok(TestContext {
        state,
        app,
        store,
        db,
        registry,
        clock,
        source,
    })
}

pub async fn request_json(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value, Option<String>) {
    let req_body = body.unwrap_or(Value::Null).to_string();
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(req_body))
        .expect("request should build");
    send(app, req).await
}

pub async fn request_no_body(
    app: &axum::Router,
    method: &str,
    uri: &str,
) -> (StatusCode, Value, Option<String>) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");
    send(app, req).await
}

async fn send(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value, Option<String>) {
    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");

    let status = resp.status();
    let trace_id = resp
        .headers()
        .get("x-trace-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice::<Value>(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()))
    };

    (status, json, trace_id)
}

/// Stores a panel whose first target reads `metric` from `datasource`.
pub async fn put_panel(app: &axum::Router, id: &str, datasource: &str, metric: &str) {
    let (status, body, _) = request_json(
        app,
        "PUT",
        &format!("/v1/panels/{id}"),
        Some(json!({
            "id": id,
            "dashboard_id": "dash-1",
            "title": "CPU",
            "datasource": datasource,
            "targets": [{ "metric": metric }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
}

pub fn alert_body(panel_id: &str, threshold: f64) -> Value {
    json!({
        "dashboard_id": "dash-1",
        "panel_id": panel_id,
        "name": "High CPU",
        "message": "CPU above threshold",
        "condition": { "type": "above", "params": [threshold] }
    })
}

/// Creates a rule over HTTP and returns its id.
pub async fn create_alert(app: &axum::Router, body: Value) -> String {
    let (status, resp, _) = request_json(app, "POST", "/v1/alerts", Some(body)).await;
    assert_eq!(status, StatusCode::CREATED, "{resp}");
    assert_eq!(resp["err_code"], 0);
    resp["data"]["id"]
        .as_str()
        .expect("rule id should exist")
        .to_string()
}

pub fn assert_ok(body: &Value) {
    assert_eq!(body["err_code"], 0, "unexpected response: {body}");
}
