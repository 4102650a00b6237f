//! HTTP surface for report collection and schedule configuration.
//!
//! Report routes submit a collection run through the [`RunQueue`](pd_workflow::RunQueue)
//! and block until a worker answers. Everything else reads or writes the
//! store directly.

pub mod api_error;
pub mod http_api;

pub use api_error::ApiError;
pub use http_api::{api_router, ApiState};
