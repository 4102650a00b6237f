use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use pd_core::store::MetricsStore;
use serde_json::{json, Value};

use super::state::ApiState;
use super::types::StatusResponse;
use crate::api_error::ApiError;

/// GET / -- service banner and endpoint listing.
pub(crate) async fn index() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "Pingdom API is running",
        "endpoints": {
            "GET /api/status": "Service status",
            "GET /api/reports/last-24h": "Collect and report on the last day",
            "GET /api/reports/last-7d": "Collect and report on the last 7 days",
            "GET /api/reports?start=YYYY-MM-DD&end=YYYY-MM-DD": "Report on already-stored days",
            "GET /api/config/schedule": "List report schedules",
            "POST /api/config/schedule": "Configure report generation schedule",
        }
    }))
}

/// GET /api/status -- version, uptime, and how many days are stored.
pub(crate) async fn get_status(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<StatusResponse>, ApiError> {
    let stored_days = state.store.count_daily().await?;
    Ok(Json(StatusResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        stored_days,
        pending_runs: state.queue.pending(),
    }))
}

/// Fallback for unknown routes.
pub(crate) async fn not_found() -> ApiError {
    ApiError::NotFound("Resource not found".into())
}
