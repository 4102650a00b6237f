use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use pd_core::types::{ReportKind, ReportSchedule};
use tracing::info;

use super::state::ApiState;
use super::types::{ScheduleRequest, ScheduleResponse};
use crate::api_error::ApiError;

/// POST /api/config/schedule -- validate and persist report schedules.
///
/// Each present section (`daily_report`, `weekly_report`) replaces the stored
/// schedule of that type. Nothing is written unless every section is valid.
///
/// **Response:** 200 with the stored schedules, 400 on any validation error.
pub(crate) async fn set_schedule(
    State(state): State<Arc<ApiState>>,
    payload: Result<Json<ScheduleRequest>, JsonRejection>,
) -> Result<Json<ScheduleResponse>, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::Validation(e.body_text()))?;
    let schedules = schedules_from_request(&req)?;

    state.store.upsert_schedules(&schedules).await?;
    info!(count = schedules.len(), "report schedules updated");

    Ok(Json(ScheduleResponse {
        status: "success".into(),
        message: "Schedule updated".into(),
        schedules: state.store.list_schedules().await?,
    }))
}

/// GET /api/config/schedule -- list stored schedules.
pub(crate) async fn get_schedule(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<ScheduleResponse>, ApiError> {
    let schedules = state.store.list_schedules().await?;
    Ok(Json(ScheduleResponse {
        status: "success".into(),
        message: format!("{} schedule(s) configured", schedules.len()),
        schedules,
    }))
}

pub(crate) fn schedules_from_request(req: &ScheduleRequest) -> Result<Vec<ReportSchedule>, ApiError> {
    if req.daily_report.is_none() && req.weekly_report.is_none() {
        return Err(ApiError::Validation(
            "expected at least one of daily_report, weekly_report".into(),
        ));
    }

    let mut out = Vec::new();
    if let Some(daily) = &req.daily_report {
        out.push(ReportSchedule::new(
            ReportKind::Daily,
            daily.enabled,
            None,
            &daily.time,
            req.recipients.clone(),
        )?);
    }
    if let Some(weekly) = &req.weekly_report {
        out.push(ReportSchedule::new(
            ReportKind::Weekly,
            weekly.enabled,
            weekly.day.as_deref(),
            &weekly.time,
            req.recipients.clone(),
        )?);
    }
    Ok(out)
}
