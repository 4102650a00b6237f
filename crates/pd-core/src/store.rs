use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use crate::types::{CountMap, DailyMetrics, DateRange, ReportKind, ReportSchedule};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write. For daily snapshots this
    /// means the same date was already written.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    /// The value cannot be represented in the store. Retrying cannot help.
    #[error("value out of range: {0}")]
    OutOfRange(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    /// Errors that will fail the same way on every attempt.
    pub fn is_permanent(&self) -> bool {
        matches!(self, StoreError::OutOfRange(_))
    }
}

impl From<tokio_rusqlite::Error> for StoreError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        match err {
            tokio_rusqlite::Error::Rusqlite(inner) => inner.into(),
            other => StoreError::Database(other.to_string()),
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Conflict(err.to_string())
            }
            _ => StoreError::Database(err.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// What a daily write did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// A daily snapshot together with its bookkeeping timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMetrics {
    pub metrics: DailyMetrics,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Durable keyed storage for one [`DailyMetrics`] record per calendar date.
#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// Insert the record for `metrics.date`, or replace the existing one.
    async fn upsert_daily(&self, metrics: &DailyMetrics) -> Result<UpsertOutcome, StoreError>;

    async fn get_daily(&self, date: NaiveDate) -> Result<Option<StoredMetrics>, StoreError>;

    /// All records with `date` in `[range.start, range.end)`, ascending by date.
    async fn list_range(&self, range: &DateRange) -> Result<Vec<DailyMetrics>, StoreError>;

    async fn count_daily(&self) -> Result<u64, StoreError>;
}

// ---------------------------------------------------------------------------
// SqliteStore
// ---------------------------------------------------------------------------

/// Async SQLite-backed store for daily metrics and report schedules.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Connection,
}

const DATE_FMT: &str = "%Y-%m-%d";

impl SqliteStore {
    /// Open (or create) a database at the given file path.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref()).await?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create a purely in-memory database (useful for tests).
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    // -----------------------------------------------------------------------
    // Schema
    // -----------------------------------------------------------------------

    async fn init_schema(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    "
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                    PRAGMA busy_timeout=5000;

                    CREATE TABLE IF NOT EXISTS daily_metrics (
                        id              INTEGER PRIMARY KEY AUTOINCREMENT,
                        date            TEXT NOT NULL UNIQUE,
                        total_requests  INTEGER NOT NULL,
                        bandwidth_bytes INTEGER NOT NULL,
                        top_countries   TEXT NOT NULL,
                        top_pages       TEXT NOT NULL,
                        created_at      TEXT NOT NULL,
                        updated_at      TEXT NOT NULL
                    );

                    CREATE INDEX IF NOT EXISTS idx_metrics_date ON daily_metrics(date);

                    CREATE TABLE IF NOT EXISTS report_schedules (
                        id          INTEGER PRIMARY KEY AUTOINCREMENT,
                        report_type TEXT NOT NULL UNIQUE,
                        enabled     INTEGER NOT NULL DEFAULT 1,
                        day_of_week TEXT,
                        time_of_day TEXT NOT NULL,
                        recipients  TEXT NOT NULL,
                        created_at  TEXT NOT NULL,
                        updated_at  TEXT NOT NULL
                    );
                    ",
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Report schedules
    // -----------------------------------------------------------------------

    pub async fn upsert_schedule(&self, schedule: &ReportSchedule) -> Result<(), StoreError> {
        self.upsert_schedules(std::slice::from_ref(schedule)).await
    }

    /// Write every schedule in one transaction; on error none of them land.
    pub async fn upsert_schedules(&self, schedules: &[ReportSchedule]) -> Result<(), StoreError> {
        let rows = schedules
            .iter()
            .map(|s| {
                let recipients = serde_json::to_string(&s.recipients)
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?;
                Ok((
                    s.report_type.as_str(),
                    s.enabled,
                    s.day_of_week.clone(),
                    s.time_of_day.clone(),
                    recipients,
                ))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        let now = Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                for (report_type, enabled, day_of_week, time_of_day, recipients) in &rows {
                    tx.execute(
                        "INSERT INTO report_schedules (report_type, enabled, day_of_week,
                            time_of_day, recipients, created_at, updated_at)
                         VALUES (?1,?2,?3,?4,?5,?6,?6)
                         ON CONFLICT(report_type) DO UPDATE SET
                            enabled=excluded.enabled, day_of_week=excluded.day_of_week,
                            time_of_day=excluded.time_of_day, recipients=excluded.recipients,
                            updated_at=excluded.updated_at",
                        rusqlite::params![report_type, enabled, day_of_week, time_of_day, recipients, now],
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get_schedule(
        &self,
        kind: ReportKind,
    ) -> Result<Option<ReportSchedule>, StoreError> {
        let kind = kind.as_str();
        let row = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT report_type, enabled, day_of_week, time_of_day, recipients
                         FROM report_schedules WHERE report_type = ?1",
                        rusqlite::params![kind],
                        ScheduleRow::from_row,
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;
        row.map(ScheduleRow::into_schedule).transpose()
    }

    pub async fn list_schedules(&self) -> Result<Vec<ReportSchedule>, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT report_type, enabled, day_of_week, time_of_day, recipients
                     FROM report_schedules ORDER BY report_type",
                )?;
                let rows = stmt
                    .query_map([], ScheduleRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        rows.into_iter().map(ScheduleRow::into_schedule).collect()
    }
}

#[async_trait]
impl MetricsStore for SqliteStore {
    async fn upsert_daily(&self, metrics: &DailyMetrics) -> Result<UpsertOutcome, StoreError> {
        let date = metrics.date.format(DATE_FMT).to_string();
        let total_requests = to_sql_int("total_requests", metrics.total_requests)?;
        let bandwidth_bytes = to_sql_int("bandwidth_bytes", metrics.bandwidth_bytes)?;
        let top_countries = encode_counts(&metrics.top_countries)?;
        let top_pages = encode_counts(&metrics.top_pages)?;
        let now = Utc::now().to_rfc3339();

        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let existed = tx
                    .query_row(
                        "SELECT 1 FROM daily_metrics WHERE date = ?1",
                        rusqlite::params![date],
                        |_| Ok(()),
                    )
                    .optional()?
                    .is_some();
                tx.execute(
                    "INSERT INTO daily_metrics (date, total_requests, bandwidth_bytes,
                        top_countries, top_pages, created_at, updated_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?6)
                     ON CONFLICT(date) DO UPDATE SET
                        total_requests=excluded.total_requests,
                        bandwidth_bytes=excluded.bandwidth_bytes,
                        top_countries=excluded.top_countries,
                        top_pages=excluded.top_pages,
                        updated_at=excluded.updated_at",
                    rusqlite::params![
                        date,
                        total_requests,
                        bandwidth_bytes,
                        top_countries,
                        top_pages,
                        now
                    ],
                )?;
                tx.commit()?;
                Ok(if existed {
                    UpsertOutcome::Updated
                } else {
                    UpsertOutcome::Inserted
                })
            })
            .await?;
        Ok(outcome)
    }

    async fn get_daily(&self, date: NaiveDate) -> Result<Option<StoredMetrics>, StoreError> {
        let date = date.format(DATE_FMT).to_string();
        let row = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT date, total_requests, bandwidth_bytes, top_countries,
                                top_pages, created_at, updated_at
                         FROM daily_metrics WHERE date = ?1",
                        rusqlite::params![date],
                        MetricsRow::from_row,
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;
        row.map(MetricsRow::into_stored).transpose()
    }

    async fn list_range(&self, range: &DateRange) -> Result<Vec<DailyMetrics>, StoreError> {
        let start = range.start().format(DATE_FMT).to_string();
        let end = range.end().format(DATE_FMT).to_string();
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT date, total_requests, bandwidth_bytes, top_countries,
                            top_pages, created_at, updated_at
                     FROM daily_metrics
                     WHERE date >= ?1 AND date < ?2
                     ORDER BY date ASC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![start, end], MetricsRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        rows.into_iter()
            .map(|row| row.into_stored().map(|s| s.metrics))
            .collect()
    }

    async fn count_daily(&self) -> Result<u64, StoreError> {
        let count = self
            .conn
            .call(|conn| {
                let n: u64 =
                    conn.query_row("SELECT COUNT(*) FROM daily_metrics", [], |r| r.get(0))?;
                Ok(n)
            })
            .await?;
        Ok(count)
    }
}

// ---------------------------------------------------------------------------
// Row mapping helpers
// ---------------------------------------------------------------------------

/// SQLite integers are signed 64-bit.
fn to_sql_int(field: &str, value: u64) -> Result<i64, StoreError> {
    i64::try_from(value)
        .map_err(|_| StoreError::OutOfRange(format!("{field} = {value} exceeds {}", i64::MAX)))
}

fn encode_counts(map: &CountMap) -> Result<String, StoreError> {
    serde_json::to_string(map).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn decode_counts(raw: &str) -> Result<CountMap, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Corrupt(format!("count map: {e}")))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp {raw:?}: {e}")))
}

/// Raw column values, decoded outside the connection thread.
struct MetricsRow {
    date: String,
    total_requests: u64,
    bandwidth_bytes: u64,
    top_countries: String,
    top_pages: String,
    created_at: String,
    updated_at: String,
}

impl MetricsRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            date: row.get(0)?,
            total_requests: row.get(1)?,
            bandwidth_bytes: row.get(2)?,
            top_countries: row.get(3)?,
            top_pages: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn into_stored(self) -> Result<StoredMetrics, StoreError> {
        let date = NaiveDate::parse_from_str(&self.date, DATE_FMT)
            .map_err(|e| StoreError::Corrupt(format!("date {:?}: {e}", self.date)))?;
        Ok(StoredMetrics {
            metrics: DailyMetrics {
                date,
                total_requests: self.total_requests,
                bandwidth_bytes: self.bandwidth_bytes,
                top_countries: decode_counts(&self.top_countries)?,
                top_pages: decode_counts(&self.top_pages)?,
            },
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

struct ScheduleRow {
    report_type: String,
    enabled: bool,
    day_of_week: Option<String>,
    time_of_day: String,
    recipients: String,
}

impl ScheduleRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            report_type: row.get(0)?,
            enabled: row.get(1)?,
            day_of_week: row.get(2)?,
            time_of_day: row.get(3)?,
            recipients: row.get(4)?,
        })
    }

    fn into_schedule(self) -> Result<ReportSchedule, StoreError> {
        let report_type = ReportKind::parse(&self.report_type).ok_or_else(|| {
            StoreError::Corrupt(format!("unknown report_type {:?}", self.report_type))
        })?;
        let recipients: Vec<String> = serde_json::from_str(&self.recipients)
            .map_err(|e| StoreError::Corrupt(format!("recipients: {e}")))?;
        Ok(ReportSchedule {
            report_type,
            enabled: self.enabled,
            day_of_week: self.day_of_week,
            time_of_day: self.time_of_day,
            recipients,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
