use std::sync::Arc;
use std::time::Instant;

use chrono::{NaiveDate, Utc};
use pd_core::store::SqliteStore;
use pd_workflow::{AggregationEngine, RunQueue};

type TodayFn = dyn Fn() -> NaiveDate + Send + Sync;

/// Shared state behind every handler.
pub struct ApiState {
    pub store: SqliteStore,
    pub queue: RunQueue,
    pub aggregator: AggregationEngine,
    pub start_time: Instant,
    today: Arc<TodayFn>,
}

impl ApiState {
    pub fn new(store: SqliteStore, queue: RunQueue) -> Self {
        let aggregator = AggregationEngine::new(Arc::new(store.clone()));
        Self {
            store,
            queue,
            aggregator,
            start_time: Instant::now(),
            today: Arc::new(|| Utc::now().date_naive()),
        }
    }

    /// Pin "today" so trailing ranges are reproducible.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Arc::new(move || today);
        self
    }

    /// The calendar date trailing windows end on (UTC). Read once per request.
    pub fn today(&self) -> NaiveDate {
        (self.today)()
    }
}
