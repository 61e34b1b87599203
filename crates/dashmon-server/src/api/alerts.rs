use crate::api::{service_error_response, success_empty_response, success_response};
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use dashmon_common::types::{CreateAlertRequest, UpdateAlertRequest};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct HistoryParams {
    #[serde(default)]
    limit: Option<u64>,
}

async fn list_alerts(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> Response {
    match state.service.list_alerts().await {
        Ok(rules) => success_response(StatusCode::OK, &trace_id, rules),
        Err(e) => service_error_response(&trace_id, &e),
    }
}

async fn create_alert(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Json(request): Json<CreateAlertRequest>,
) -> Response {
    match state.service.create_alert(request).await {
        Ok(rule) => success_response(StatusCode::CREATED, &trace_id, rule),
        Err(e) => service_error_response(&trace_id, &e),
    }
}

async fn get_alert(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.service.get_alert(&id).await {
        Ok(rule) => success_response(StatusCode::OK, &trace_id, rule),
        Err(e) => service_error_response(&trace_id, &e),
    }
}

async fn update_alert(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<UpdateAlertRequest>,
) -> Response {
    match state.service.update_alert(&id, &patch).await {
        Ok(rule) => success_response(StatusCode::OK, &trace_id, rule),
        Err(e) => service_error_response(&trace_id, &e),
    }
}

async fn delete_alert(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.service.delete_alert(&id).await {
        Ok(()) => success_empty_response(StatusCode::OK, &trace_id, "Alert rule deleted"),
        Err(e) => service_error_response(&trace_id, &e),
    }
}

/// Newest-first evaluations of a rule that were `alerting`.
async fn alert_history(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Response {
    match state.service.alert_history(&id, params.limit).await {
        Ok(entries) => success_response(StatusCode::OK, &trace_id, entries),
        Err(e) => service_error_response(&trace_id, &e),
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/alerts", get(list_alerts).post(create_alert))
        .route(
            "/v1/alerts/:id",
            get(get_alert).put(update_alert).delete(delete_alert),
        )
        .route("/v1/alerts/:id/history", get(alert_history))
}
