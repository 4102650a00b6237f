//! Core data model, configuration, and durable storage for the pingdom
//! analytics service.
//!
//! - [`types`]: date ranges, daily snapshots, reports, and report schedules
//! - [`store`]: the [`store::MetricsStore`] contract and its SQLite backend
//! - [`config`]: TOML configuration with environment overrides

pub mod config;
pub mod store;
pub mod types;
