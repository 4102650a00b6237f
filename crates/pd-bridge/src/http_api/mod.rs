// ---------------------------------------------------------------------------
// HTTP API
// ---------------------------------------------------------------------------
//
// Handlers are grouped by concern; this file owns the router and the
// middleware stack.

mod misc;
mod reports;
mod schedule;
pub mod state;
pub mod types;

pub use state::ApiState;
pub use types::*;

use std::sync::Arc;

use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::get,
    Router,
};
use pd_telemetry::tracing_setup::request_id_middleware;
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Build the API router.
///
/// Browser origins on localhost are always allowed; anything else must be
/// listed in `allowed_origins`.
pub fn api_router(state: Arc<ApiState>, allowed_origins: Vec<String>) -> Router {
    Router::new()
        .route("/", get(misc::index))
        .route("/api/status", get(misc::get_status))
        .route("/api/reports", get(reports::stored_report))
        .route("/api/reports/last-24h", get(reports::last_24h))
        .route("/api/reports/last-7d", get(reports::last_7d))
        .route(
            "/api/config/schedule",
            get(schedule::get_schedule).post(schedule::set_schedule),
        )
        .fallback(misc::not_found)
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors_layer(allowed_origins))
        .with_state(state)
}

fn cors_layer(allowed_origins: Vec<String>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _parts: &axum::http::request::Parts| {
                let Ok(origin) = origin.to_str() else {
                    return false;
                };
                is_local_origin(origin) || allowed_origins.iter().any(|o| o == origin)
            },
        ))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

fn is_local_origin(origin: &str) -> bool {
    ["http://localhost", "http://127.0.0.1", "https://localhost", "https://127.0.0.1"]
        .iter()
        .any(|prefix| {
            origin
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with(':'))
        })
}
