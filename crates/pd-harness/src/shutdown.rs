use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// ShutdownSignal: cooperative shutdown and cancellation
// ---------------------------------------------------------------------------

/// Watch-based shutdown flag shared by the daemon, the worker runtime, and
/// running collection runs.
///
/// Long-lived loops `select!` on [`ShutdownSignal::wait`]; the orchestrator
/// polls [`ShutdownSignal::is_shutting_down`] between dates so that a run is
/// never interrupted in the middle of a step.
///
/// ```ignore
/// let shutdown = ShutdownSignal::new();
///
/// tokio::select! {
///     _ = shutdown.wait() => { /* graceful cleanup */ }
///     _ = do_work() => {}
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Check if shutdown has been triggered (non-blocking).
    pub fn is_shutting_down(&self) -> bool {
        *self.rx.borrow()
    }

    /// Trigger shutdown for every clone. Idempotent.
    pub fn trigger(&self) {
        let changed = self.tx.send_if_modified(|flag| {
            if *flag {
                false
            } else {
                *flag = true;
                true
            }
        });
        if changed {
            info!("shutdown signal triggered");
        } else {
            debug!("shutdown already triggered");
        }
    }

    /// Resolve once shutdown has been triggered, including when it already was.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as any clone of `self`, so this only
        // errors if every handle is gone, which cannot happen while we hold one.
        let _ = rx.wait_for(|flag| *flag).await;
    }

    /// A raw receiver for callers that need to embed the flag elsewhere.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.rx.clone()
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
