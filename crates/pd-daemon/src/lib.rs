//! Background daemon for daily analytics collection.
//!
//! - **Worker runtime**: pulls run requests from the substrate, executes them,
//!   and reconnects when the substrate goes away
//! - **Daemon**: wires configuration, storage, the metrics source, the worker,
//!   and the HTTP API into one process

pub mod daemon;
pub mod worker;
