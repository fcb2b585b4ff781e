//! Drain Integration Tests
//!
//! End-to-end drain over real TCP sockets, in-process: tracked connections
//! receive exactly the terminal payload on the wire, and the exit seam
//! records a clean status 0.

use softstop::connection::TcpConn;
use softstop::drain::{DrainProtocol, Exit, ShutdownState, TERMINAL_RESPONSE};
use softstop::jobs::{IncompleteJob, JobSource};
use softstop::monitor::MonitoringReporter;
use softstop::registry::ConnectionRegistry;
use std::io::Read;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct RecordingExit {
    codes: Mutex<Vec<i32>>,
}

impl RecordingExit {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            codes: Mutex::new(Vec::new()),
        })
    }

    fn codes(&self) -> Vec<i32> {
        self.codes.lock().unwrap().clone()
    }
}

impl Exit for RecordingExit {
    fn exit(&self, code: i32) {
        self.codes.lock().unwrap().push(code);
    }
}

struct CountingMonitor {
    calls: AtomicUsize,
    last_len: AtomicUsize,
}

impl CountingMonitor {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            last_len: AtomicUsize::new(0),
        })
    }
}

impl MonitoringReporter for CountingMonitor {
    fn report(&self, jobs: &[IncompleteJob]) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.last_len.store(jobs.len(), Ordering::SeqCst);
        Ok(())
    }
}

struct FixedJobs(Vec<IncompleteJob>);

impl JobSource for FixedJobs {
    fn incomplete_jobs(&self) -> Vec<IncompleteJob> {
        self.0.clone()
    }
}

fn protocol(
    registry: &Arc<ConnectionRegistry>,
    jobs: Vec<IncompleteJob>,
    monitor: &Arc<CountingMonitor>,
    exit: &Arc<RecordingExit>,
) -> DrainProtocol {
    DrainProtocol::new(
        Arc::new(ShutdownState::new()),
        Arc::clone(registry),
        Arc::new(FixedJobs(jobs)),
        Arc::clone(monitor) as Arc<dyn MonitoringReporter>,
        Arc::clone(exit) as Arc<dyn Exit>,
    )
}

/// Connect a client and track the accepted side of the socket.
fn tracked_client(listener: &TcpListener, registry: &ConnectionRegistry) -> TcpStream {
    let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let (server, peer) = listener.accept().unwrap();
    let conn = TcpConn::new(server, peer, Duration::from_millis(500)).unwrap();
    registry.track(Box::new(conn));
    client
}

#[test]
fn test_two_open_connections_get_terminal_response() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let registry = Arc::new(ConnectionRegistry::new());
    let monitor = CountingMonitor::new();
    let exit = RecordingExit::new();

    let mut client_a = tracked_client(&listener, &registry);
    let mut client_b = tracked_client(&listener, &registry);
    assert_eq!(registry.len(), 2);

    protocol(&registry, Vec::new(), &monitor, &exit).run();

    for client in [&mut client_a, &mut client_b] {
        let mut buf = Vec::new();
        client.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, TERMINAL_RESPONSE);
    }
    assert!(registry.is_empty());
    assert_eq!(exit.codes(), vec![0]);
}

#[test]
fn test_empty_registry_still_exits_zero() {
    let registry = Arc::new(ConnectionRegistry::new());
    let monitor = CountingMonitor::new();
    let exit = RecordingExit::new();

    protocol(&registry, Vec::new(), &monitor, &exit).run();

    // No jobs: report skipped entirely
    assert_eq!(monitor.calls.load(Ordering::SeqCst), 0);
    assert_eq!(exit.codes(), vec![0]);
}

#[test]
fn test_jobs_reported_once_even_with_two_signals() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let registry = Arc::new(ConnectionRegistry::new());
    let monitor = CountingMonitor::new();
    let exit = RecordingExit::new();

    let mut client = tracked_client(&listener, &registry);

    let jobs = vec![
        IncompleteJob::new("resize-42"),
        IncompleteJob::new("email-7"),
    ];
    let proto = protocol(&registry, jobs, &monitor, &exit);

    // Both SIGINT and SIGTERM arriving
    proto.run();
    proto.run();

    assert_eq!(monitor.calls.load(Ordering::SeqCst), 1);
    assert_eq!(monitor.last_len.load(Ordering::SeqCst), 2);
    assert_eq!(exit.codes(), vec![0]);

    let mut buf = Vec::new();
    client.read_to_end(&mut buf).unwrap();
    assert_eq!(buf, TERMINAL_RESPONSE);
}

#[test]
fn test_client_that_closed_early_does_not_abort_drain() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let registry = Arc::new(ConnectionRegistry::new());
    let monitor = CountingMonitor::new();
    let exit = RecordingExit::new();

    // First client disappears before the drain runs
    {
        let _gone = tracked_client(&listener, &registry);
    }
    let mut survivor = tracked_client(&listener, &registry);

    protocol(&registry, Vec::new(), &monitor, &exit).run();

    let mut buf = Vec::new();
    survivor.read_to_end(&mut buf).unwrap();
    assert_eq!(buf, TERMINAL_RESPONSE);
    assert_eq!(exit.codes(), vec![0]);
}
