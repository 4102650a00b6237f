use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use chrono::NaiveDate;
use pd_core::types::DateRange;
use tracing::info;

use super::state::ApiState;
use super::types::{ReportRangeQuery, ReportResponse, RunResponse};
use crate::api_error::ApiError;

/// GET /api/reports/last-24h -- collect yesterday and report on it.
pub(crate) async fn last_24h(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<RunResponse>, ApiError> {
    let range = DateRange::trailing(state.today(), 1)?;
    collect(&state, range, "24h").await
}

/// GET /api/reports/last-7d -- collect the seven days before today.
pub(crate) async fn last_7d(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<RunResponse>, ApiError> {
    let range = DateRange::trailing(state.today(), 7)?;
    collect(&state, range, "7d").await
}

/// Submit a run for `range` and wait for its outcome.
///
/// **Response:** 200 with the report; 502 when the run fails; 503 when no
/// worker takes the run.
async fn collect(state: &ApiState, range: DateRange, label: &str) -> Result<Json<RunResponse>, ApiError> {
    info!(%range, window = label, "report requested");
    let outcome = state.queue.submit(range).await?;
    match outcome.result {
        Ok(report) => Ok(Json(RunResponse {
            status: "success".into(),
            message: format!(
                "Report generated for {range} ({} day(s) collected)",
                outcome.days_completed
            ),
            run_id: outcome.run_id,
            report,
        })),
        Err(e) => Err(ApiError::RunFailed(format!(
            "run {} failed after {} day(s): {e}",
            outcome.run_id, outcome.days_completed
        ))),
    }
}

/// GET /api/reports?start=YYYY-MM-DD&end=YYYY-MM-DD -- aggregate stored days
/// without collecting anything. `end` is exclusive.
pub(crate) async fn stored_report(
    State(state): State<Arc<ApiState>>,
    Query(q): Query<ReportRangeQuery>,
) -> Result<Json<ReportResponse>, ApiError> {
    let start = parse_date("start", q.start.as_deref())?;
    let end = parse_date("end", q.end.as_deref())?;
    let range = DateRange::new(start, end)?;
    let report = state.aggregator.aggregate(&range).await?;
    Ok(Json(ReportResponse {
        status: "success".into(),
        report,
    }))
}

fn parse_date(field: &str, raw: Option<&str>) -> Result<NaiveDate, ApiError> {
    let raw = raw.ok_or_else(|| ApiError::Validation(format!("missing query parameter `{field}`")))?;
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| ApiError::Validation(format!("`{field}` must be YYYY-MM-DD, got {raw:?}")))
}
