use pd_core::types::{Report, ReportSchedule};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Body of a successful collection run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResponse {
    pub status: String,
    pub message: String,
    pub run_id: String,
    pub report: Report,
}

/// Body of a read-only report over already-stored days.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportResponse {
    pub status: String,
    pub report: Report,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReportRangeQuery {
    pub start: Option<String>,
    pub end: Option<String>,
}

// ---------------------------------------------------------------------------
// Schedules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyReportConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyReportConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub day: Option<String>,
    pub time: String,
}

fn default_enabled() -> bool {
    true
}

/// `POST /api/config/schedule` payload. Absent sections are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub daily_report: Option<DailyReportConfig>,
    pub weekly_report: Option<WeeklyReportConfig>,
    #[serde(default)]
    pub recipients: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleResponse {
    pub status: String,
    pub message: String,
    pub schedules: Vec<ReportSchedule>,
}

// ---------------------------------------------------------------------------
// Misc
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub stored_days: u64,
    pub pending_runs: usize,
}
