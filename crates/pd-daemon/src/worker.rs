use std::sync::Arc;
use std::time::Duration;

use pd_core::config::WorkerConfig;
use pd_harness::shutdown::ShutdownSignal;
use pd_workflow::{
    CollectionOrchestrator, ConnectivityError, OrchestrationRun, RunOutcome, RunRequest,
    Substrate, SubstrateSession,
};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("substrate unreachable after {attempts} attempt(s): {last}")]
    ConnectivityExhausted {
        attempts: u32,
        #[source]
        last: ConnectivityError,
    },
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Reconnect and restart timing. Fixed delays, no backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Consecutive failed connects tolerated before `run()` gives up.
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    /// Pause before `supervise()` restarts a failed `run()`.
    pub restart_delay: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from(&WorkerConfig::default())
    }
}

impl From<&WorkerConfig> for WorkerSettings {
    fn from(cfg: &WorkerConfig) -> Self {
        Self {
            reconnect_attempts: cfg.reconnect_attempts.max(1),
            reconnect_delay: Duration::from_secs(cfg.reconnect_delay_secs),
            restart_delay: Duration::from_secs(cfg.restart_delay_secs),
        }
    }
}

/// How a connected session ended.
enum SessionEnd {
    Closed,
    Shutdown,
    Lost(ConnectivityError),
}

// ---------------------------------------------------------------------------
// WorkerRuntime
// ---------------------------------------------------------------------------

/// Hosts collection runs for whatever substrate it is connected to.
///
/// Every request runs in its own task, so runs proceed concurrently while
/// steps inside one run stay sequential.
pub struct WorkerRuntime {
    substrate: Arc<dyn Substrate>,
    orchestrator: CollectionOrchestrator,
    settings: WorkerSettings,
    shutdown: ShutdownSignal,
}

impl WorkerRuntime {
    pub fn new(
        substrate: Arc<dyn Substrate>,
        orchestrator: CollectionOrchestrator,
        settings: WorkerSettings,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            substrate,
            orchestrator,
            settings,
            shutdown,
        }
    }

    /// Connect and serve until the substrate closes or shutdown is triggered.
    ///
    /// A failed connect and a lost session both count as a failed attempt and
    /// are retried after `reconnect_delay`, up to `reconnect_attempts` in a
    /// row. The count resets once a session has handed out at least one run.
    /// In-flight runs are awaited before returning.
    pub async fn run(&self) -> Result<(), WorkerError> {
        let mut inflight = JoinSet::new();
        let result = self.connect_loop(&mut inflight).await;
        if !inflight.is_empty() {
            info!(runs = inflight.len(), "waiting for in-flight runs");
            while let Some(joined) = inflight.join_next().await {
                log_join(joined);
            }
        }
        result
    }

    async fn connect_loop(&self, inflight: &mut JoinSet<()>) -> Result<(), WorkerError> {
        let max = self.settings.reconnect_attempts;
        let mut failures = 0u32;

        loop {
            if self.shutdown.is_shutting_down() {
                return Ok(());
            }

            let connected = tokio::select! {
                _ = self.shutdown.wait() => return Ok(()),
                c = self.substrate.connect() => c,
            };

            let err = match connected {
                Ok(mut session) => {
                    info!(after_failures = failures, "connected to substrate");
                    let (end, served) = self.serve(session.as_mut(), inflight).await;
                    if served > 0 {
                        failures = 0;
                    }
                    match end {
                        SessionEnd::Closed => {
                            info!("substrate closed, worker stopping");
                            return Ok(());
                        }
                        SessionEnd::Shutdown => return Ok(()),
                        SessionEnd::Lost(e) => e,
                    }
                }
                Err(e) => e,
            };

            failures += 1;
            if failures >= max {
                error!(attempts = failures, error = %err, "giving up on substrate");
                return Err(WorkerError::ConnectivityExhausted {
                    attempts: failures,
                    last: err,
                });
            }
            warn!(
                attempt = failures,
                max_attempts = max,
                delay_ms = self.settings.reconnect_delay.as_millis() as u64,
                error = %err,
                "substrate unavailable, retrying"
            );
            tokio::select! {
                _ = self.shutdown.wait() => return Ok(()),
                _ = tokio::time::sleep(self.settings.reconnect_delay) => {}
            }
        }
    }

    /// Serve one session. Returns how it ended and how many runs it handed out.
    async fn serve(
        &self,
        session: &mut dyn SubstrateSession,
        inflight: &mut JoinSet<()>,
    ) -> (SessionEnd, u64) {
        let mut served = 0u64;
        loop {
            tokio::select! {
                _ = self.shutdown.wait() => return (SessionEnd::Shutdown, served),
                Some(joined) = inflight.join_next(), if !inflight.is_empty() => log_join(joined),
                next = session.next_request() => match next {
                    Ok(Some(request)) => {
                        served += 1;
                        self.dispatch(request, inflight);
                    }
                    Ok(None) => return (SessionEnd::Closed, served),
                    Err(e) => {
                        warn!(error = %e, served, "substrate connection lost");
                        return (SessionEnd::Lost(e), served);
                    }
                },
            }
        }
    }

    fn dispatch(&self, request: RunRequest, inflight: &mut JoinSet<()>) {
        let orchestrator = self.orchestrator.clone();
        inflight.spawn(async move {
            let mut run = OrchestrationRun::new(request.range);
            let result = orchestrator.execute(&mut run).await;
            let run_id = run.id.clone();
            let delivered = request.complete(RunOutcome {
                run_id: run.id,
                range: run.range,
                state: run.state,
                days_completed: run.days_completed,
                result,
            });
            if !delivered {
                debug!(%run_id, "submitter stopped waiting for run");
            }
        });
    }

    /// Run `run()` forever, restarting after `restart_delay` whenever it
    /// fails. Returns on shutdown or when the substrate closes.
    pub async fn supervise(&self) {
        loop {
            match self.run().await {
                Ok(()) => {
                    info!("worker stopped");
                    return;
                }
                Err(e) => {
                    error!(
                        error = %e,
                        restart_in_ms = self.settings.restart_delay.as_millis() as u64,
                        "worker failed, restarting"
                    );
                    tokio::select! {
                        _ = self.shutdown.wait() => return,
                        _ = tokio::time::sleep(self.settings.restart_delay) => {}
                    }
                }
            }
        }
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "collection run task panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_follow_config() {
        let settings = WorkerSettings::default();
        assert_eq!(settings.reconnect_attempts, 5);
        assert_eq!(settings.reconnect_delay, Duration::from_secs(5));
        assert_eq!(settings.restart_delay, Duration::from_secs(5));
    }

    #[test]
    fn zero_attempts_is_clamped() {
        let cfg = WorkerConfig {
            reconnect_attempts: 0,
            ..WorkerConfig::default()
        };
        assert_eq!(WorkerSettings::from(&cfg).reconnect_attempts, 1);
    }
}
