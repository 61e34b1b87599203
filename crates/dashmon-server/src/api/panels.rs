use crate::api::{error_response, service_error_response, success_response};
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use dashmon_common::types::Panel;

async fn get_panel(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.service.get_panel(&id).await {
        Ok(panel) => success_response(StatusCode::OK, &trace_id, panel),
        Err(e) => service_error_response(&trace_id, &e),
    }
}

/// Creates or replaces the panel view alert rules read their query from.
async fn put_panel(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(panel): Json<Panel>,
) -> Response {
    if panel.id != id {
        return error_response(
            StatusCode::BAD_REQUEST,
            &trace_id,
            "bad_request",
            "Panel id does not match the path",
        );
    }
    match state.service.save_panel(&panel).await {
        Ok(saved) => success_response(StatusCode::OK, &trace_id, saved),
        Err(e) => service_error_response(&trace_id, &e),
    }
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/panels/:id", get(get_panel).put(put_panel))
}
