//! Harness: reliability primitives shared by the collection workflow and
//! the worker runtime.
//!
//! - [`retry`]: declarative [`retry::RetryPolicy`] data and the step executor
//!   that applies it with per-attempt timeouts
//! - [`shutdown`]: cooperative shutdown and cancellation signalling

pub mod retry;
pub mod shutdown;
