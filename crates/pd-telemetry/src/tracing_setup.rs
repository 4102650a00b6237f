use axum::body::Body;
use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use tracing::Instrument;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// 32 hex characters, usable as a trace or request id.
pub fn generate_trace_id() -> String {
    Uuid::new_v4().as_simple().to_string()
}

/// Axum middleware that tags each request with an `x-request-id`.
///
/// An incoming id is reused; otherwise one is minted. The handler runs inside
/// an `http_request` span and the id is echoed on the response.
pub async fn request_id_middleware(mut request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(generate_trace_id);

    let header = HeaderValue::from_str(&request_id)
        .unwrap_or_else(|_| HeaderValue::from_static("invalid"));
    request.headers_mut().insert(REQUEST_ID_HEADER, header.clone());

    let span = tracing::info_span!(
        "http_request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    let mut response = next.run(request).instrument(span).await;
    response.headers_mut().insert(REQUEST_ID_HEADER, header);
    response
}

/// Span every collection run executes in, so step logs carry the run id.
pub fn run_span(run_id: &str, range: &impl std::fmt::Display) -> tracing::Span {
    tracing::info_span!("collection_run", run_id = %run_id, range = %range)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
