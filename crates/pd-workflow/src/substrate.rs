use async_trait::async_trait;
use pd_core::types::{DateRange, Report, RunState};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;

use crate::orchestrator::WorkflowError;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// The orchestration substrate could not be reached, or the connection dropped.
#[derive(Debug, Clone, Error)]
pub enum ConnectivityError {
    #[error("substrate unreachable: {0}")]
    Unreachable(String),
    #[error("substrate connection lost: {0}")]
    Lost(String),
}

/// A run request never produced an outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("no worker is accepting runs")]
    Unavailable,
    #[error("run was dropped before it finished")]
    Abandoned,
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Final state of one run, sent back to whoever submitted it.
#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: String,
    pub range: DateRange,
    pub state: RunState,
    pub days_completed: u64,
    pub result: Result<Report, WorkflowError>,
}

/// A request to collect and aggregate `range`.
#[derive(Debug)]
pub struct RunRequest {
    pub range: DateRange,
    reply: oneshot::Sender<RunOutcome>,
}

impl RunRequest {
    pub fn new(range: DateRange) -> (Self, oneshot::Receiver<RunOutcome>) {
        let (reply, rx) = oneshot::channel();
        (Self { range, reply }, rx)
    }

    /// Deliver the outcome. Returns `false` when the submitter stopped waiting.
    pub fn complete(self, outcome: RunOutcome) -> bool {
        self.reply.send(outcome).is_ok()
    }
}

// ---------------------------------------------------------------------------
// Substrate
// ---------------------------------------------------------------------------

/// Where workers pick up run requests.
#[async_trait]
pub trait Substrate: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn SubstrateSession>, ConnectivityError>;
}

/// One live connection to a substrate.
#[async_trait]
pub trait SubstrateSession: Send {
    /// Next request, or `Ok(None)` once the substrate has closed for good.
    async fn next_request(&mut self) -> Result<Option<RunRequest>, ConnectivityError>;
}

/// Client side of the substrate: submit a range and wait for its outcome.
#[derive(Debug, Clone)]
pub struct RunQueue {
    tx: flume::Sender<RunRequest>,
}

impl RunQueue {
    pub async fn submit(&self, range: DateRange) -> Result<RunOutcome, SubmitError> {
        let (request, reply) = RunRequest::new(range);
        self.tx
            .send_async(request)
            .await
            .map_err(|_| SubmitError::Unavailable)?;
        debug!(%range, "run submitted");
        reply.await.map_err(|_| SubmitError::Abandoned)
    }

    /// Requests waiting for a worker.
    pub fn pending(&self) -> usize {
        self.tx.len()
    }
}

/// In-process substrate over a bounded channel.
#[derive(Debug, Clone)]
pub struct LocalSubstrate {
    rx: flume::Receiver<RunRequest>,
}

/// A connected queue/substrate pair holding at most `capacity` pending requests.
pub fn local_substrate(capacity: usize) -> (RunQueue, LocalSubstrate) {
    let (tx, rx) = flume::bounded(capacity.max(1));
    (RunQueue { tx }, LocalSubstrate { rx })
}

impl LocalSubstrate {
    /// Stop accepting runs: pending requests are dropped, so their submitters
    /// see [`SubmitError::Abandoned`], and later submits fail with
    /// [`SubmitError::Unavailable`] once every clone is closed.
    pub fn close(self) -> usize {
        let dropped = self.rx.drain().count();
        if dropped > 0 {
            debug!(dropped, "dropped pending run requests");
        }
        dropped
    }
}

struct LocalSession {
    rx: flume::Receiver<RunRequest>,
}

#[async_trait]
impl Substrate for LocalSubstrate {
    async fn connect(&self) -> Result<Box<dyn SubstrateSession>, ConnectivityError> {
        Ok(Box::new(LocalSession {
            rx: self.rx.clone(),
        }))
    }
}

#[async_trait]
impl SubstrateSession for LocalSession {
    async fn next_request(&mut self) -> Result<Option<RunRequest>, ConnectivityError> {
        // Disconnected means every RunQueue is gone.
        Ok(self.rx.recv_async().await.ok())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn range() -> DateRange {
        let d = |day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
        DateRange::new(d(1), d(3)).unwrap()
    }

    fn report(range: DateRange) -> Report {
        crate::aggregate::fold(&range, &[])
    }

    #[tokio::test]
    async fn submit_waits_for_reply() {
        let (queue, substrate) = local_substrate(4);
        let mut session = substrate.connect().await.unwrap();

        let submit = tokio::spawn(async move { queue.submit(range()).await });

        let req = session.next_request().await.unwrap().unwrap();
        assert_eq!(req.range, range());
        let r = req.range;
        assert!(req.complete(RunOutcome {
            run_id: "run-1".into(),
            range: r,
            state: RunState::Completed,
            days_completed: 2,
            result: Ok(report(r)),
        }));

        let outcome = submit.await.unwrap().unwrap();
        assert_eq!(outcome.run_id, "run-1");
        assert_eq!(outcome.days_completed, 2);
        assert!(outcome.result.is_ok());
    }

    #[tokio::test]
    async fn dropped_request_is_abandoned() {
        let (queue, substrate) = local_substrate(4);
        let mut session = substrate.connect().await.unwrap();

        let submit = tokio::spawn(async move { queue.submit(range()).await });
        let req = session.next_request().await.unwrap().unwrap();
        drop(req);

        assert_eq!(submit.await.unwrap().unwrap_err(), SubmitError::Abandoned);
    }

    #[tokio::test]
    async fn submit_without_substrate_is_unavailable() {
        let (queue, substrate) = local_substrate(4);
        drop(substrate);
        assert_eq!(queue.submit(range()).await.unwrap_err(), SubmitError::Unavailable);
    }

    #[tokio::test]
    async fn session_ends_when_every_queue_is_dropped() {
        let (queue, substrate) = local_substrate(4);
        let mut session = substrate.connect().await.unwrap();
        drop(queue);
        assert!(session.next_request().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn close_abandons_pending_requests() {
        let (queue, substrate) = local_substrate(4);
        let q = queue.clone();
        let waiter = tokio::spawn(async move { q.submit(range()).await });
        while queue.pending() == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(substrate.close(), 1);
        assert_eq!(waiter.await.unwrap().unwrap_err(), SubmitError::Abandoned);
        assert_eq!(queue.submit(range()).await.unwrap_err(), SubmitError::Unavailable);
    }

    #[tokio::test]
    async fn pending_counts_unclaimed_requests() {
        let (queue, substrate) = local_substrate(4);
        let q = queue.clone();
        let _waiter = tokio::spawn(async move { q.submit(range()).await });
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(queue.pending(), 1);
        drop(substrate);
    }
}
