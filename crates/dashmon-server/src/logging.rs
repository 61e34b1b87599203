use axum::{
    body::Body,
    extract::Request,
    http::{HeaderValue, Method},
    middleware::Next,
    response::Response,
};
use rand::Rng;
use std::fmt::Write;
use std::time::Instant;

/// Trace id of the current request, stored in request extensions.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl std::ops::Deref for TraceId {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

/// 16 hex characters from 8 random bytes.
fn generate_trace_id() -> String {
    let bytes: [u8; 8] = rand::thread_rng().gen();
    bytes.iter().fold(String::with_capacity(16), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

/// Longest request body excerpt written to the log.
const MAX_BODY_LOG_CHARS: usize = 200;

/// Largest request body buffered for logging.
const MAX_BODY_BYTES: usize = 1024 * 1024;

fn body_excerpt(bytes: &[u8]) -> String {
    let Ok(text) = std::str::from_utf8(bytes) else {
        return "<non-utf8 body>".to_string();
    };
    if text.len() <= MAX_BODY_LOG_CHARS {
        return text.to_string();
    }
    let mut end = MAX_BODY_LOG_CHARS;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

/// Logs each request and its outcome under a fresh trace id, which is also
/// returned in the `X-Trace-Id` response header.
pub async fn request_logging(mut req: Request, next: Next) -> Response {
    let trace_id = generate_trace_id();
    req.extensions_mut().insert(TraceId(trace_id.clone()));

    let method = req.method().clone();
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let req = if matches!(method, Method::POST | Method::PUT | Method::PATCH) {
        let (parts, body) = req.into_parts();
        let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
            .await
            .unwrap_or_default();
        tracing::info!(
            trace_id = %trace_id,
            method = %method,
            path = %path,
            body = %body_excerpt(&bytes),
            "--> request"
        );
        Request::from_parts(parts, Body::from(bytes))
    } else {
        tracing::info!(trace_id = %trace_id, method = %method, path = %path, "--> request");
        req
    };

    let start = Instant::now();
    let mut response = next.run(req).await;
    let elapsed_ms = start.elapsed().as_millis() as u64;
    let status = response.status().as_u16();

    if response.status().is_server_error() {
        tracing::error!(trace_id = %trace_id, status, elapsed_ms, "<-- response");
    } else if response.status().is_client_error() {
        tracing::warn!(trace_id = %trace_id, status, elapsed_ms, "<-- response");
    } else {
        tracing::info!(trace_id = %trace_id, status, elapsed_ms, "<-- response");
    }

    if let Ok(val) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert("X-Trace-Id", val);
    }
    response
}
