//! Logging and request tracing for the pingdom services.
//!
//! - **Logging**: human-readable or JSON output via `tracing-subscriber`
//! - **Tracing**: request-id middleware for the HTTP surface and the span
//!   every collection run executes in

pub mod logging;
pub mod tracing_setup;
