//! Worker runtime against a scripted substrate, plus one full daemon run on an
//! ephemeral port.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use pd_core::config::Config;
use pd_core::store::{MetricsStore, SqliteStore};
use pd_core::types::{DateRange, RawMetrics, RunState};
use pd_daemon::daemon::Daemon;
use pd_daemon::worker::{WorkerError, WorkerRuntime, WorkerSettings};
use pd_harness::retry::{RetryPolicy, StepOptions};
use pd_harness::shutdown::ShutdownSignal;
use pd_integrations::{MetricsSource, SourceError, StaticSource};
use pd_workflow::{
    CollectionOrchestrator, ConnectivityError, RunOutcome, RunRequest, Substrate,
    SubstrateSession, WorkflowOptions,
};
use tokio::sync::{oneshot, Barrier};

// ===========================================================================
// Scripted substrate
// ===========================================================================

#[derive(Debug, Clone, Copy)]
enum Connect {
    Fail,
    /// Connects, then reports the connection lost on the first read.
    Lost,
    /// Connects, hands out `n` requests, then reports the connection lost.
    LostAfter(u32),
    Serve,
}

/// Plays `script` one connect at a time, serving from `rx` once the script
/// runs out.
struct ScriptedSubstrate {
    script: Mutex<VecDeque<Connect>>,
    connects: AtomicU32,
    rx: flume::Receiver<RunRequest>,
}

impl ScriptedSubstrate {
    fn new(script: &[Connect]) -> (Arc<Self>, flume::Sender<RunRequest>) {
        let (tx, rx) = flume::unbounded();
        let substrate = Arc::new(Self {
            script: Mutex::new(script.iter().copied().collect()),
            connects: AtomicU32::new(0),
            rx,
        });
        (substrate, tx)
    }

    fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

struct ScriptedSession {
    /// Requests left before the connection drops; `None` never drops.
    remaining: Option<u32>,
    rx: flume::Receiver<RunRequest>,
}

#[async_trait]
impl Substrate for ScriptedSubstrate {
    async fn connect(&self) -> Result<Box<dyn SubstrateSession>, ConnectivityError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().unwrap().pop_front().unwrap_or(Connect::Serve);
        let remaining = match step {
            Connect::Fail => return Err(ConnectivityError::Unreachable("scripted".into())),
            Connect::Lost => Some(0),
            Connect::LostAfter(n) => Some(n),
            Connect::Serve => None,
        };
        Ok(Box::new(ScriptedSession {
            remaining,
            rx: self.rx.clone(),
        }))
    }
}

#[async_trait]
impl SubstrateSession for ScriptedSession {
    async fn next_request(&mut self) -> Result<Option<RunRequest>, ConnectivityError> {
        match &mut self.remaining {
            Some(0) => return Err(ConnectivityError::Lost("scripted".into())),
            Some(n) => *n -= 1,
            None => {}
        }
        Ok(self.rx.recv_async().await.ok())
    }
}

/// Fetches block until `parties` of them are in flight at once.
struct RendezvousSource {
    barrier: Barrier,
}

#[async_trait]
impl MetricsSource for RendezvousSource {
    async fn fetch(&self, _date: NaiveDate) -> Result<RawMetrics, SourceError> {
        self.barrier.wait().await;
        Ok(StaticSource::sample())
    }

    fn name(&self) -> &str {
        "rendezvous"
    }
}

// ===========================================================================
// Helpers
// ===========================================================================

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
}

fn one_day(d: u32) -> DateRange {
    DateRange::single(day(d)).unwrap()
}

fn settings(reconnect_attempts: u32) -> WorkerSettings {
    WorkerSettings {
        reconnect_attempts,
        reconnect_delay: Duration::from_millis(1),
        restart_delay: Duration::from_millis(1),
    }
}

fn fast_options() -> WorkflowOptions {
    let step = StepOptions {
        policy: RetryPolicy {
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            ..RetryPolicy::default()
        },
        timeout: Duration::from_secs(5),
    };
    WorkflowOptions {
        fetch: step.clone(),
        store: step.clone(),
        aggregate: step,
    }
}

async fn orchestrator_with(source: Arc<dyn MetricsSource>) -> (CollectionOrchestrator, SqliteStore) {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let orch = CollectionOrchestrator::new(source, Arc::new(store.clone()), fast_options());
    (orch, store)
}

fn submit(
    tx: &flume::Sender<RunRequest>,
    range: DateRange,
) -> oneshot::Receiver<RunOutcome> {
    let (request, reply) = RunRequest::new(range);
    tx.send(request).unwrap();
    reply
}

async fn outcome(reply: oneshot::Receiver<RunOutcome>) -> RunOutcome {
    tokio::time::timeout(Duration::from_secs(5), reply)
        .await
        .expect("run should finish")
        .expect("worker should reply")
}

// ===========================================================================
// Reconnect
// ===========================================================================

#[tokio::test]
async fn unreachable_substrate_exhausts_reconnect_budget() {
    let (substrate, _tx) = ScriptedSubstrate::new(&[Connect::Fail; 10]);
    let (orch, _store) = orchestrator_with(Arc::new(StaticSource::new())).await;
    let worker = WorkerRuntime::new(substrate.clone(), orch, settings(3), ShutdownSignal::new());

    let err = worker.run().await.unwrap_err();
    let WorkerError::ConnectivityExhausted { attempts, last } = err;
    assert_eq!(attempts, 3);
    assert!(matches!(last, ConnectivityError::Unreachable(_)));
    assert_eq!(substrate.connects(), 3);
}

#[tokio::test]
async fn worker_recovers_within_budget_and_serves_runs() {
    let (substrate, tx) = ScriptedSubstrate::new(&[Connect::Fail, Connect::Fail]);
    let (orch, store) = orchestrator_with(Arc::new(StaticSource::new())).await;
    let worker = WorkerRuntime::new(substrate.clone(), orch, settings(3), ShutdownSignal::new());
    let handle = tokio::spawn(async move { worker.run().await });

    let done = outcome(submit(&tx, one_day(1))).await;
    assert_eq!(done.state, RunState::Completed);
    assert_eq!(done.days_completed, 1);
    assert_eq!(done.result.unwrap().total_requests, 1000);
    assert_eq!(store.count_daily().await.unwrap(), 1);

    drop(tx);
    handle.await.unwrap().expect("closed substrate ends the worker cleanly");
    assert_eq!(substrate.connects(), 3);
}

#[tokio::test]
async fn serving_session_resets_failure_count() {
    // Four failures in total, never three in a row: the third connect serves
    // a run before it drops, so the count starts over.
    let (substrate, tx) = ScriptedSubstrate::new(&[
        Connect::Fail,
        Connect::Fail,
        Connect::LostAfter(1),
        Connect::Fail,
    ]);
    let (orch, _store) = orchestrator_with(Arc::new(StaticSource::new())).await;
    let worker = WorkerRuntime::new(substrate.clone(), orch, settings(3), ShutdownSignal::new());
    let handle = tokio::spawn(async move { worker.run().await });

    let first = submit(&tx, one_day(2));
    let second = submit(&tx, one_day(3));
    assert_eq!(outcome(first).await.state, RunState::Completed);
    assert_eq!(outcome(second).await.state, RunState::Completed);

    drop(tx);
    handle.await.unwrap().unwrap();
    assert_eq!(substrate.connects(), 5);
}

#[tokio::test]
async fn flapping_substrate_exhausts_reconnect_budget() {
    let (substrate, _tx) = ScriptedSubstrate::new(&[Connect::Lost; 10]);
    let (orch, _store) = orchestrator_with(Arc::new(StaticSource::new())).await;
    let worker = WorkerRuntime::new(substrate.clone(), orch, settings(5), ShutdownSignal::new());

    let result = tokio::time::timeout(Duration::from_secs(5), worker.run())
        .await
        .expect("a session that drops every time must not be retried forever");
    let WorkerError::ConnectivityExhausted { attempts, last } = result.unwrap_err();
    assert_eq!(attempts, 5);
    assert!(matches!(last, ConnectivityError::Lost(_)));
    assert_eq!(substrate.connects(), 5);
}

#[tokio::test]
async fn mixed_connect_and_session_failures_share_one_budget() {
    let (substrate, _tx) =
        ScriptedSubstrate::new(&[Connect::Fail, Connect::Lost, Connect::Fail, Connect::Serve]);
    let (orch, _store) = orchestrator_with(Arc::new(StaticSource::new())).await;
    let worker = WorkerRuntime::new(substrate.clone(), orch, settings(3), ShutdownSignal::new());

    let err = worker.run().await.unwrap_err();
    let WorkerError::ConnectivityExhausted { attempts, .. } = err;
    assert_eq!(attempts, 3);
    assert_eq!(substrate.connects(), 3);
}

// ===========================================================================
// Serving
// ===========================================================================

#[tokio::test]
async fn runs_execute_concurrently() {
    let source = Arc::new(RendezvousSource {
        barrier: Barrier::new(3),
    });
    let (substrate, tx) = ScriptedSubstrate::new(&[]);
    let (orch, store) = orchestrator_with(source).await;
    let worker = WorkerRuntime::new(substrate, orch, settings(3), ShutdownSignal::new());
    let handle = tokio::spawn(async move { worker.run().await });

    // Each run fetches one day; none can finish until all three are fetching.
    let replies: Vec<_> = (1..=3)
        .map(|d| submit(&tx, one_day(d)))
        .collect();
    for reply in replies {
        assert_eq!(outcome(reply).await.state, RunState::Completed);
    }
    assert_eq!(store.count_daily().await.unwrap(), 3);

    drop(tx);
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn failed_run_is_reported_to_submitter() {
    struct Down;

    #[async_trait]
    impl MetricsSource for Down {
        async fn fetch(&self, _date: NaiveDate) -> Result<RawMetrics, SourceError> {
            Err(SourceError::Status {
                code: 404,
                body: "no such zone".into(),
            })
        }

        fn name(&self) -> &str {
            "down"
        }
    }

    let (substrate, tx) = ScriptedSubstrate::new(&[]);
    let (orch, _store) = orchestrator_with(Arc::new(Down)).await;
    let worker = WorkerRuntime::new(substrate, orch, settings(3), ShutdownSignal::new());
    let handle = tokio::spawn(async move { worker.run().await });

    let done = outcome(submit(&tx, one_day(4))).await;
    assert_eq!(done.state, RunState::Failed);
    assert_eq!(done.days_completed, 0);
    assert!(done.result.is_err());

    drop(tx);
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_stops_idle_worker() {
    let (substrate, _tx) = ScriptedSubstrate::new(&[]);
    let (orch, _store) = orchestrator_with(Arc::new(StaticSource::new())).await;
    let shutdown = ShutdownSignal::new();
    let worker = WorkerRuntime::new(substrate, orch, settings(3), shutdown.clone());
    let handle = tokio::spawn(async move { worker.run().await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown.trigger();

    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("worker should stop on shutdown")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn shutdown_waits_for_in_flight_run() {
    let source = Arc::new(RendezvousSource {
        barrier: Barrier::new(2),
    });
    let (substrate, tx) = ScriptedSubstrate::new(&[]);
    let (orch, _store) = orchestrator_with(source.clone()).await;
    let shutdown = ShutdownSignal::new();
    let worker = WorkerRuntime::new(substrate, orch, settings(3), shutdown.clone());
    let handle = tokio::spawn(async move { worker.run().await });

    let reply = submit(&tx, one_day(5));
    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown.trigger();

    // The run is parked inside its fetch; release it after shutdown fired.
    source.barrier.wait().await;

    let done = outcome(reply).await;
    assert_eq!(done.state, RunState::Completed, "a started day is finished");
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("worker should stop after draining")
        .unwrap()
        .unwrap();
}

// ===========================================================================
// Supervision
// ===========================================================================

#[tokio::test]
async fn supervise_restarts_after_exhaustion() {
    let (substrate, tx) = ScriptedSubstrate::new(&[Connect::Fail, Connect::Fail]);
    let (orch, _store) = orchestrator_with(Arc::new(StaticSource::new())).await;
    let worker = WorkerRuntime::new(substrate.clone(), orch, settings(2), ShutdownSignal::new());
    let handle = tokio::spawn(async move { worker.supervise().await });

    let done = outcome(submit(&tx, one_day(6))).await;
    assert_eq!(done.state, RunState::Completed);
    assert_eq!(substrate.connects(), 3, "two failed connects, then a restart");

    drop(tx);
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("supervise returns once the substrate closes")
        .unwrap();
}

#[tokio::test]
async fn supervise_stops_on_shutdown_while_restarting() {
    let (substrate, _tx) = ScriptedSubstrate::new(&[Connect::Fail; 1000]);
    let (orch, _store) = orchestrator_with(Arc::new(StaticSource::new())).await;
    let shutdown = ShutdownSignal::new();
    let settings = WorkerSettings {
        restart_delay: Duration::from_secs(60),
        ..settings(1)
    };
    let worker = WorkerRuntime::new(substrate, orch, settings, shutdown.clone());
    let handle = tokio::spawn(async move { worker.supervise().await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("restart delay is cut short by shutdown")
        .unwrap();
}

// ===========================================================================
// Daemon
// ===========================================================================

#[tokio::test]
async fn daemon_serves_collection_and_shuts_down() {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let daemon = Arc::new(Daemon::with_store(Config::default(), store.clone()));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());

    let runner = daemon.clone();
    let handle = tokio::spawn(async move { runner.run_with_listener(listener).await });

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{base}/api/reports/last-24h"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["report"]["total_requests"], 1000);
    assert_eq!(body["report"]["days_collected"], 1);

    let status: serde_json::Value = client
        .get(format!("{base}/api/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["stored_days"], 1);
    assert_eq!(store.count_daily().await.unwrap(), 1);

    daemon.shutdown();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("daemon should stop")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn daemon_new_creates_store_directory() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    let path = dir.path().join("nested").join("metrics.db");
    config.store.path = path.display().to_string();

    let daemon = Daemon::new(config).await.unwrap();
    assert!(path.exists());
    assert_eq!(daemon.config().server.port, 5000);
}
