use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use pd_core::config::WorkflowConfig;
use pd_core::store::{MetricsStore, StoreError};
use pd_core::types::{DateRange, Report, RunState};
use pd_harness::retry::{run_step, RetryPolicy, StepFailure, StepOptions};
use pd_harness::shutdown::ShutdownSignal;
use pd_integrations::{MetricsSource, SourceError};
use pd_telemetry::tracing_setup::run_span;
use thiserror::Error;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::aggregate::AggregationEngine;
use crate::steps::{FetchStep, StoreStep};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a run ended `Failed`. Days stored before the failure stay stored.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("fetch exhausted for {date}: {source}")]
    FetchExhausted {
        date: NaiveDate,
        #[source]
        source: StepFailure<SourceError>,
    },
    #[error("store exhausted for {date}: {source}")]
    StoreExhausted {
        date: NaiveDate,
        #[source]
        source: StepFailure<StoreError>,
    },
    #[error("aggregation exhausted: {0}")]
    AggregateExhausted(#[source] StepFailure<StoreError>),
    #[error("run cancelled before {date}")]
    Cancelled { date: NaiveDate },
}

impl WorkflowError {
    /// The date the run stopped on, if it stopped inside the collection loop.
    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            WorkflowError::FetchExhausted { date, .. }
            | WorkflowError::StoreExhausted { date, .. }
            | WorkflowError::Cancelled { date } => Some(*date),
            WorkflowError::AggregateExhausted(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// OrchestrationRun
// ---------------------------------------------------------------------------

/// Progress of one collection run. Owned by the orchestrator while it
/// executes; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestrationRun {
    pub id: String,
    pub range: DateRange,
    /// Next date to process. Stays on the failing date when a run fails.
    pub cursor: NaiveDate,
    pub state: RunState,
    pub days_completed: u64,
}

impl OrchestrationRun {
    pub fn new(range: DateRange) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            range,
            cursor: range.start(),
            state: RunState::Running,
            days_completed: 0,
        }
    }

    fn fail(&mut self, err: WorkflowError) -> WorkflowError {
        self.state = RunState::Failed;
        err
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Per-step options for every run an orchestrator executes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowOptions {
    pub fetch: StepOptions,
    pub store: StepOptions,
    /// The final aggregation is retried like a fetch.
    pub aggregate: StepOptions,
}

impl From<&WorkflowConfig> for WorkflowOptions {
    fn from(cfg: &WorkflowConfig) -> Self {
        let timeout = Duration::from_secs(cfg.step_timeout_secs);
        let fetch = StepOptions {
            policy: RetryPolicy::from(&cfg.fetch_retry),
            timeout,
        };
        let store = StepOptions {
            policy: RetryPolicy::from(&cfg.store_retry),
            timeout,
        };
        Self {
            aggregate: fetch.clone(),
            fetch,
            store,
        }
    }
}

// ---------------------------------------------------------------------------
// CollectionOrchestrator
// ---------------------------------------------------------------------------

/// Drives a date range through fetch then store, one day at a time, and
/// aggregates the range once every day is stored.
///
/// The loop never reads the clock: ranges are resolved by the caller, so
/// replaying a run with the same step outcomes takes the same decisions.
#[derive(Clone)]
pub struct CollectionOrchestrator {
    fetch: FetchStep,
    store: StoreStep,
    aggregator: AggregationEngine,
    aggregate_opts: StepOptions,
    shutdown: Option<ShutdownSignal>,
}

impl CollectionOrchestrator {
    pub fn new(
        source: Arc<dyn MetricsSource>,
        store: Arc<dyn MetricsStore>,
        opts: WorkflowOptions,
    ) -> Self {
        Self {
            fetch: FetchStep::new(source, opts.fetch),
            store: StoreStep::new(store.clone(), opts.store),
            aggregator: AggregationEngine::new(store),
            aggregate_opts: opts.aggregate,
            shutdown: None,
        }
    }

    /// Stop runs between dates once `signal` fires.
    pub fn with_shutdown(mut self, signal: ShutdownSignal) -> Self {
        self.shutdown = Some(signal);
        self
    }

    pub fn aggregator(&self) -> &AggregationEngine {
        &self.aggregator
    }

    /// Collect every day of `range`, then aggregate it.
    pub async fn run(&self, range: DateRange) -> Result<Report, WorkflowError> {
        let mut run = OrchestrationRun::new(range);
        self.execute(&mut run).await
    }

    /// Execute `run` from its cursor, updating it in place.
    pub async fn execute(&self, run: &mut OrchestrationRun) -> Result<Report, WorkflowError> {
        let span = run_span(&run.id, &run.range);
        self.drive(run).instrument(span).await
    }

    async fn drive(&self, run: &mut OrchestrationRun) -> Result<Report, WorkflowError> {
        let end = run.range.end();
        run.state = RunState::Running;
        if run.cursor == run.range.start() {
            info!(days = run.range.num_days(), "collection run started");
        } else {
            info!(cursor = %run.cursor, days_completed = run.days_completed, "collection run resumed");
        }

        while run.cursor < end {
            let date = run.cursor;

            if self.shutdown.as_ref().is_some_and(|s| s.is_shutting_down()) {
                warn!(%date, "collection run cancelled");
                return Err(run.fail(WorkflowError::Cancelled { date }));
            }

            let raw = match self.fetch.fetch(date).await {
                Ok(raw) => raw,
                Err(source) => {
                    warn!(%date, error = %source, "fetch exhausted, failing run");
                    return Err(run.fail(WorkflowError::FetchExhausted { date, source }));
                }
            };

            let outcome = match self.store.store(date, &raw).await {
                Ok(outcome) => outcome,
                Err(source) => {
                    warn!(%date, error = %source, "store exhausted, failing run");
                    return Err(run.fail(WorkflowError::StoreExhausted { date, source }));
                }
            };

            info!(%date, ?outcome, total_requests = raw.total_requests, "day collected");
            run.days_completed += 1;
            run.cursor = date.succ_opt().unwrap_or(end);
        }

        let range = run.range;
        let aggregator = &self.aggregator;
        let report = run_step("aggregate", &self.aggregate_opts, |_| async move {
            aggregator.aggregate(&range).await
        })
        .await
        .map_err(|e| {
            warn!(error = %e, "aggregation exhausted, failing run");
            run.fail(WorkflowError::AggregateExhausted(e))
        })?;

        run.state = RunState::Completed;
        info!(
            days_completed = run.days_completed,
            total_requests = report.total_requests,
            "collection run completed"
        );
        Ok(report)
    }
}
