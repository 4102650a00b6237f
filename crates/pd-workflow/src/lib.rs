//! Daily analytics collection.
//!
//! A [`CollectionOrchestrator`](orchestrator::CollectionOrchestrator) walks a
//! date range one day at a time: fetch from the metrics source, upsert into
//! the store, advance. Each step carries its own retry policy. When every
//! day is stored, the [`AggregationEngine`](aggregate::AggregationEngine)
//! folds the range into a ranked report.
//!
//! Runs are requested through a [`RunQueue`](substrate::RunQueue) and
//! executed by whatever worker is connected to the matching
//! [`Substrate`](substrate::Substrate).

pub mod aggregate;
pub mod orchestrator;
pub mod steps;
pub mod substrate;

pub use aggregate::{fold, top_n, AggregationEngine, TOP_N};
pub use orchestrator::{CollectionOrchestrator, OrchestrationRun, WorkflowError, WorkflowOptions};
pub use steps::{FetchStep, StoreOutcome, StoreStep};
pub use substrate::{
    local_substrate, ConnectivityError, LocalSubstrate, RunOutcome, RunQueue, RunRequest,
    SubmitError, Substrate, SubstrateSession,
};
