use std::sync::Arc;

use chrono::NaiveDate;
use pd_core::store::{MetricsStore, StoreError, UpsertOutcome};
use pd_core::types::{DailyMetrics, RawMetrics};
use pd_harness::retry::{run_step, StepFailure, StepOptions};
use pd_integrations::{MetricsSource, SourceError};
use tracing::debug;

// ---------------------------------------------------------------------------
// FetchStep
// ---------------------------------------------------------------------------

/// One read-only call to the metrics source per attempt.
#[derive(Clone)]
pub struct FetchStep {
    source: Arc<dyn MetricsSource>,
    opts: StepOptions,
}

impl FetchStep {
    pub fn new(source: Arc<dyn MetricsSource>, opts: StepOptions) -> Self {
        Self { source, opts }
    }

    pub fn options(&self) -> &StepOptions {
        &self.opts
    }

    pub async fn fetch(&self, date: NaiveDate) -> Result<RawMetrics, StepFailure<SourceError>> {
        let source = &self.source;
        run_step("fetch", &self.opts, |attempt| async move {
            debug!(%date, attempt, source = source.name(), "fetching metrics");
            source.fetch(date).await
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// StoreStep
// ---------------------------------------------------------------------------

/// Result of a successful store step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Inserted,
    Updated,
    /// The store reported a uniqueness conflict: an earlier attempt already
    /// wrote this date.
    AlreadyApplied,
}

impl From<UpsertOutcome> for StoreOutcome {
    fn from(o: UpsertOutcome) -> Self {
        match o {
            UpsertOutcome::Inserted => StoreOutcome::Inserted,
            UpsertOutcome::Updated => StoreOutcome::Updated,
        }
    }
}

/// Idempotent write of one day's snapshot.
#[derive(Clone)]
pub struct StoreStep {
    store: Arc<dyn MetricsStore>,
    opts: StepOptions,
}

impl StoreStep {
    pub fn new(store: Arc<dyn MetricsStore>, opts: StepOptions) -> Self {
        Self { store, opts }
    }

    pub async fn store(
        &self,
        date: NaiveDate,
        data: &RawMetrics,
    ) -> Result<StoreOutcome, StepFailure<StoreError>> {
        let record = DailyMetrics::from_raw(date, data.clone());
        let store = &self.store;
        let record = &record;
        run_step("store", &self.opts, |attempt| async move {
            match store.upsert_daily(record).await {
                Ok(outcome) => Ok(outcome.into()),
                Err(StoreError::Conflict(msg)) => {
                    debug!(%date, attempt, %msg, "conflict on daily write, already applied");
                    Ok(StoreOutcome::AlreadyApplied)
                }
                Err(e) => Err(e),
            }
        })
        .await
    }
}
