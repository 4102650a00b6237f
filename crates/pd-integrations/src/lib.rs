//! Metrics providers for the collection workflow.
//!
//! Every provider implements [`MetricsSource`]: given a calendar date it
//! returns that day's raw analytics. Calls are read-only, so the fetch step
//! may retry them freely.

pub mod http;
pub mod source;
pub mod stub;

pub use http::HttpMetricsSource;
pub use source::{source_from_config, MetricsSource, SourceError, SOURCE_TOKEN_ENV};
pub use stub::StaticSource;
