//! Worker lifecycle tests.
//!
//! Drive a worker over the scripted in-memory listener and check admission,
//! registration, close notification and shutdown.

use std::{future::Future, io, net::SocketAddr, time::Duration};

use socksgate_harness::{ProbeFactory, ProbeLog, run_local, scripted_listener, settle};
use socksgate_worker::{
    Session, SessionContext, SessionError, SessionFactory, Worker, WorkerConfig, WorkerError,
};
use tokio::io::DuplexStream;

const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

fn config() -> WorkerConfig {
    WorkerConfig { accept_error_backoff: Duration::ZERO, ..Default::default() }
}

/// Empty registry: stop ends the accept loop and the reaper in one pass.
#[tokio::test]
async fn empty_worker_stops_promptly() {
    run_local(async {
        let (listener, _connector) = scripted_listener();
        let log = ProbeLog::new();
        let worker = Worker::new(listener, ProbeFactory::new(log.clone()), config()).unwrap();

        let handle = worker.start();
        settle().await;
        assert!(!handle.is_quitting());

        handle.stop();
        settle().await;
        assert!(handle.is_quitting());
        assert_eq!(handle.session_count(), 0);

        // Reaper period is 30s; returning now means it was woken, not timed out
        let joined = tokio::time::timeout(JOIN_TIMEOUT, handle.join()).await;
        assert!(matches!(joined, Ok(Ok(()))));
        assert!(log.events().is_empty());
    })
    .await;
}

#[tokio::test]
async fn stop_before_start_is_honoured() {
    run_local(async {
        let (listener, _connector) = scripted_listener();
        let worker = Worker::new(listener, ProbeFactory::new(ProbeLog::new()), config()).unwrap();

        let stop = worker.stop_handle();
        stop.stop();
        assert!(stop.is_stopped());

        let handle = worker.start();
        let joined = tokio::time::timeout(JOIN_TIMEOUT, handle.join()).await;
        assert!(matches!(joined, Ok(Ok(()))));
    })
    .await;
}

#[tokio::test]
async fn repeated_stop_is_harmless() {
    run_local(async {
        let (listener, connector) = scripted_listener();
        let log = ProbeLog::new();
        let worker = Worker::new(listener, ProbeFactory::new(log.clone()), config()).unwrap();

        let handle = worker.start();
        let _client = connector.connect();
        settle().await;
        let id = log.started()[0];

        let stop = handle.stop_handle();
        stop.stop();
        stop.stop();
        handle.stop();
        settle().await;
        stop.stop();

        tokio::time::timeout(JOIN_TIMEOUT, handle.join()).await.unwrap().unwrap();
        stop.stop();

        // Shutdown traversal ran exactly once
        assert_eq!(log.wakes(id), vec![(0, true)]);
    })
    .await;
}

#[tokio::test]
async fn accepted_connections_are_registered_and_served() {
    run_local(async {
        let (listener, connector) = scripted_listener();
        let log = ProbeLog::new();
        let worker = Worker::new(listener, ProbeFactory::new(log.clone()), config()).unwrap();
        let handle = worker.start();

        let mut first = connector.connect();
        let _second = connector.connect();
        settle().await;

        assert_eq!(log.created(), 2);
        assert_eq!(handle.session_count(), 2);

        let started = log.started();
        assert_eq!(started.len(), 2);
        assert!(started.iter().all(|id| handle.is_registered(*id)));

        // Registry walks newest first
        let mut expected = started.clone();
        expected.reverse();
        assert_eq!(handle.session_ids(), expected);

        assert_eq!(first.echo(b"ping").await.unwrap(), b"ping");

        handle.stop();
        handle.drain().await;
        handle.join().await.unwrap();
    })
    .await;
}

#[tokio::test]
async fn close_notification_removes_session_once() {
    run_local(async {
        let (listener, connector) = scripted_listener();
        let log = ProbeLog::new();
        let worker = Worker::new(listener, ProbeFactory::new(log.clone()), config()).unwrap();
        let handle = worker.start();

        let first = connector.connect();
        let _second = connector.connect();
        settle().await;
        let started = log.started();
        let (first_id, second_id) = (started[0], started[1]);

        // Client hang-up ends the probe session
        drop(first);
        settle().await;

        assert_eq!(log.closed(), vec![first_id]);
        assert!(!handle.is_registered(first_id));
        assert!(handle.is_registered(second_id));
        assert_eq!(handle.session_count(), 1);

        handle.stop();
        handle.drain().await;
        handle.join().await.unwrap();

        let mut closed = log.closed();
        closed.sort();
        let mut expected = vec![first_id, second_id];
        expected.sort();
        assert_eq!(closed, expected, "each session closes exactly once");
    })
    .await;
}

/// Every session registered when the stop lands is woken with quit set, and the
/// worker drains once they have all left.
#[tokio::test]
async fn shutdown_wakes_every_session() {
    run_local(async {
        let (listener, connector) = scripted_listener();
        let log = ProbeLog::new();
        let worker = Worker::new(listener, ProbeFactory::new(log.clone()), config()).unwrap();
        let handle = worker.start();

        let mut clients: Vec<_> = (0..3).map(|_| connector.connect()).collect();
        settle().await;
        assert_eq!(handle.session_count(), 3);

        handle.stop();
        tokio::time::timeout(JOIN_TIMEOUT, handle.drain()).await.unwrap();
        tokio::time::timeout(JOIN_TIMEOUT, handle.join()).await.unwrap().unwrap();

        for id in log.started() {
            assert_eq!(log.wakes(id), vec![(0, true)], "session {id}");
        }
        assert_eq!(log.closed().len(), 3);

        for client in &mut clients {
            assert!(client.closed_within(JOIN_TIMEOUT).await);
        }
    })
    .await;
}

/// A connection already queued when the quit flag goes up is still admitted:
/// the flag is only consulted when the listener has nothing pending. The
/// session is registered, sees the shutdown, and leaves.
#[tokio::test]
async fn connection_pending_at_shutdown_is_still_admitted() {
    run_local(async {
        let (listener, connector) = scripted_listener();
        let log = ProbeLog::new();
        let worker = Worker::new(listener, ProbeFactory::new(log.clone()), config()).unwrap();
        let handle = worker.start();
        settle().await;

        handle.stop();
        let mut late = connector.connect();

        let stop = handle.stop_handle();
        tokio::time::timeout(JOIN_TIMEOUT, handle.join()).await.unwrap().unwrap();
        assert!(stop.is_stopped());

        settle().await;
        assert_eq!(log.created(), 1);
        assert_eq!(log.started().len(), 1);
        assert_eq!(log.closed().len(), 1);
        assert!(late.closed_within(JOIN_TIMEOUT).await);
    })
    .await;
}

#[tokio::test]
async fn failed_session_construction_closes_connection() {
    run_local(async {
        let (listener, connector) = scripted_listener();
        let log = ProbeLog::new();
        let worker = Worker::new(listener, ProbeFactory::rejecting(log.clone()), config()).unwrap();
        let handle = worker.start();

        let mut client = connector.connect();
        settle().await;

        assert_eq!(log.rejected(), 1);
        assert!(log.started().is_empty());
        assert_eq!(handle.session_count(), 0);
        assert!(client.closed_within(JOIN_TIMEOUT).await, "rejected connection must be closed");

        // The loop keeps accepting
        let _next = connector.connect();
        settle().await;
        assert_eq!(log.rejected(), 2);

        handle.stop();
        handle.join().await.unwrap();
    })
    .await;
}

#[tokio::test]
async fn failed_connection_setup_drops_connection() {
    run_local(async {
        let (listener, connector) = scripted_listener();
        let log = ProbeLog::new();
        let worker = Worker::new(listener, ProbeFactory::new(log.clone()), config()).unwrap();
        let handle = worker.start();

        let mut broken = connector.connect_unconfigurable();
        settle().await;

        assert_eq!(log.created(), 0, "factory must not see the connection");
        assert_eq!(handle.session_count(), 0);
        assert!(broken.closed_within(JOIN_TIMEOUT).await);

        let _fine = connector.connect();
        settle().await;
        assert_eq!(handle.session_count(), 1);

        handle.stop();
        handle.drain().await;
        handle.join().await.unwrap();
    })
    .await;
}

#[tokio::test]
async fn accept_errors_do_not_stop_the_loop() {
    run_local(async {
        let (listener, connector) = scripted_listener();
        let log = ProbeLog::new();
        let worker = Worker::new(listener, ProbeFactory::new(log.clone()), config()).unwrap();
        let handle = worker.start();

        connector.fail_accept(io::ErrorKind::ConnectionAborted);
        connector.fail_accept(io::ErrorKind::Other);
        let _client = connector.connect();
        settle().await;

        assert_eq!(log.started().len(), 1);
        assert_eq!(handle.session_count(), 1);

        handle.stop();
        handle.drain().await;
        handle.join().await.unwrap();
    })
    .await;
}

/// Losing every stop handle leaves nobody able to stop the worker, so it
/// shuts itself down.
#[tokio::test]
async fn dropping_every_handle_shuts_worker_down() {
    run_local(async {
        let (listener, connector) = scripted_listener();
        let log = ProbeLog::new();
        let worker = Worker::new(listener, ProbeFactory::new(log.clone()), config()).unwrap();
        let handle = worker.start();

        let mut client = connector.connect();
        settle().await;
        let id = log.started()[0];

        drop(handle);
        settle().await;

        assert_eq!(log.wakes(id), vec![(0, true)]);
        assert_eq!(log.closed(), vec![id]);
        assert!(client.closed_within(JOIN_TIMEOUT).await);
    })
    .await;
}

/// Session whose task panics on its first poll.
struct Crashing;

impl Session for Crashing {
    fn run(self, _ctx: SessionContext) -> impl Future<Output = ()> + 'static {
        async { panic!("session bug") }
    }
}

struct CrashingFactory;

impl SessionFactory<DuplexStream> for CrashingFactory {
    type Session = Crashing;

    fn create(&self, _stream: DuplexStream, _peer: SocketAddr) -> Result<Crashing, SessionError> {
        Ok(Crashing)
    }
}

#[tokio::test]
async fn panicking_session_is_unregistered() {
    run_local(async {
        let (listener, connector) = scripted_listener();
        let worker = Worker::new(listener, CrashingFactory, config()).unwrap();
        let handle = worker.start();

        let _first = connector.connect();
        let _second = connector.connect();
        settle().await;

        assert_eq!(handle.session_count(), 0, "unwinding must still unregister");
        assert!(handle.session_ids().is_empty());

        // Worker is unaffected and keeps accepting
        let _third = connector.connect();
        settle().await;
        assert_eq!(handle.session_count(), 0);
        assert!(!handle.is_quitting());

        handle.stop();
        let joined = tokio::time::timeout(JOIN_TIMEOUT, handle.join()).await;
        assert!(matches!(joined, Ok(Ok(()))));
    })
    .await;
}

#[test]
fn invalid_config_fails_construction() {
    let (listener, _connector) = scripted_listener();
    let config = WorkerConfig { session_liveness: 0, ..Default::default() };

    let result = Worker::new(listener, ProbeFactory::new(ProbeLog::new()), config);
    assert!(matches!(result, Err(WorkerError::Config(_))));
}
