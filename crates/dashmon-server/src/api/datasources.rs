use crate::api::{service_error_response, success_response};
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use dashmon_common::types::QueryRequest;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct ConnectionTestResponse {
    pub id: String,
    pub connected: bool,
}

async fn list_datasources(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> Response {
    let sources = state.service.list_data_sources().await;
    success_response(StatusCode::OK, &trace_id, sources)
}

async fn list_datasource_metrics(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    let metrics = state.service.list_metrics(&id).await;
    success_response(StatusCode::OK, &trace_id, metrics)
}

async fn test_datasource(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.service.test_connection(&id).await {
        Ok(connected) => success_response(
            StatusCode::OK,
            &trace_id,
            ConnectionTestResponse { id, connected },
        ),
        Err(e) => service_error_response(&trace_id, &e),
    }
}

/// Metric names of every data source, keyed by source id.
async fn list_all_metrics(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> Response {
    let metrics = state.service.list_all_metrics().await;
    success_response(StatusCode::OK, &trace_id, metrics)
}

/// Runs a query. Unreachable or failing backends answer with synthetic
/// `mock` data instead of an error.
async fn run_query(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Response {
    match state.service.query(&request).await {
        Ok(result) => success_response(StatusCode::OK, &trace_id, result),
        Err(e) => service_error_response(&trace_id, &e),
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/datasources", get(list_datasources))
        .route("/v1/datasources/:id/metrics", get(list_datasource_metrics))
        .route("/v1/datasources/:id/test", get(test_datasource).post(test_datasource))
        .route("/v1/metrics", get(list_all_metrics))
        .route("/v1/query", post(run_query))
}
