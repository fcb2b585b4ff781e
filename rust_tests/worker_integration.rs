//! Worker Integration Tests
//!
//! In-process tests wire the worker loop and drain protocol together over
//! real sockets. The `#[ignore]` tests spawn the actual softstop binary and
//! deliver real signals; they require `cargo build` to have run first.

use softstop::app::DemoApp;
use softstop::drain::{DrainProtocol, Exit, ShutdownState, TERMINAL_RESPONSE};
use softstop::jobs::NoPendingJobs;
use softstop::monitor::LogMonitor;
use softstop::registry::ConnectionRegistry;
use softstop::worker::WorkerLoop;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

// =============================================================================
// In-process: worker loop + drain
// =============================================================================

struct RecordingExit {
    codes: Mutex<Vec<i32>>,
}

impl Exit for RecordingExit {
    fn exit(&self, code: i32) {
        self.codes.lock().unwrap().push(code);
    }
}

#[test]
fn test_drain_answers_client_stuck_mid_request() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let registry = Arc::new(ConnectionRegistry::new());
    let state = Arc::new(ShutdownState::new());
    let exit = Arc::new(RecordingExit {
        codes: Mutex::new(Vec::new()),
    });

    let worker = WorkerLoop::new(
        listener,
        Arc::clone(&registry),
        Arc::clone(&state),
        Box::new(DemoApp),
        Duration::from_millis(500),
    );
    let worker_thread = thread::spawn(move || worker.run().unwrap());

    // Client sends only the request line, never the blank separator, so the
    // worker stays blocked mid-request with the connection tracked.
    let mut client = TcpStream::connect(addr).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    client.write_all(b"GET /products/ HTTP/1.1\r\n").unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while registry.is_empty() {
        assert!(Instant::now() < deadline, "worker never tracked the client");
        thread::sleep(Duration::from_millis(5));
    }

    let drain = DrainProtocol::new(
        Arc::clone(&state),
        Arc::clone(&registry),
        Arc::new(NoPendingJobs),
        Arc::new(LogMonitor),
        Arc::clone(&exit) as Arc<dyn Exit>,
    );
    drain.run();

    // The stuck client got the terminal response, not an abrupt reset
    let mut buf = Vec::new();
    client.read_to_end(&mut buf).unwrap();
    assert_eq!(buf, TERMINAL_RESPONSE);
    assert_eq!(*exit.codes.lock().unwrap(), vec![0]);

    // Closing the client's socket also unblocked the worker; the accept gate
    // is down, so the loop terminates.
    worker_thread.join().unwrap();
    assert!(registry.is_empty());
}

// =============================================================================
// Binary tests (real signals)
// =============================================================================

fn binary_path() -> String {
    format!("{}/target/debug/softstop", env!("CARGO_MANIFEST_DIR"))
}

/// Spawn the worker on an ephemeral port and wait for its startup line to
/// learn the resolved address. Remaining stderr is drained in the background
/// so the worker never blocks on a full pipe.
fn spawn_worker(extra_args: &[&str]) -> (std::process::Child, String) {
    let mut child = std::process::Command::new(binary_path())
        .args(["--bind", "127.0.0.1:0"])
        .args(extra_args)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .expect("failed to spawn softstop (run `cargo build` first)");

    let stderr = child.stderr.take().unwrap();
    let mut reader = BufReader::new(stderr);
    let mut addr = None;
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).unwrap();
        if n == 0 {
            break;
        }
        if let Some(idx) = line.find("listening on ") {
            let rest = &line[idx + "listening on ".len()..];
            addr = Some(rest.split_whitespace().next().unwrap().to_string());
            break;
        }
    }

    thread::spawn(move || {
        let mut sink = String::new();
        let _ = reader.read_to_string(&mut sink);
    });

    (child, addr.expect("worker never announced its address"))
}

fn terminate(child: &std::process::Child) {
    nix::sys::signal::kill(
        nix::unistd::Pid::from_raw(child.id() as i32),
        nix::sys::signal::Signal::SIGTERM,
    )
    .unwrap();
}

#[test]
#[ignore] // Requires built binary
fn test_sigterm_exits_zero() {
    use wait_timeout::ChildExt;

    let (mut child, _addr) = spawn_worker(&[]);
    terminate(&child);

    let status = child
        .wait_timeout(Duration::from_secs(5))
        .unwrap()
        .expect("worker did not exit after SIGTERM");
    assert_eq!(status.code(), Some(0));
}

#[test]
#[ignore] // Requires built binary
fn test_sigterm_drains_open_connection() {
    use wait_timeout::ChildExt;

    let (mut child, addr) = spawn_worker(&[]);

    let mut client = TcpStream::connect(&addr).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    // Keep the request open so the connection stays tracked
    client.write_all(b"GET /products/ HTTP/1.1\r\n").unwrap();
    thread::sleep(Duration::from_millis(200));

    terminate(&child);

    let mut buf = Vec::new();
    client.read_to_end(&mut buf).unwrap();
    assert_eq!(buf, TERMINAL_RESPONSE);

    let status = child
        .wait_timeout(Duration::from_secs(5))
        .unwrap()
        .expect("worker did not exit after SIGTERM");
    assert_eq!(status.code(), Some(0));
}

#[test]
#[ignore] // Requires built binary
fn test_completed_request_then_sigterm() {
    use wait_timeout::ChildExt;

    let (mut child, addr) = spawn_worker(&[]);

    // A request that completes normally is untracked and gets nothing extra
    let mut client = TcpStream::connect(&addr).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    client
        .write_all(b"GET /health HTTP/1.1\r\nHost: t\r\n\r\n")
        .unwrap();
    let mut reply = Vec::new();
    client.read_to_end(&mut reply).unwrap();
    assert!(String::from_utf8(reply).unwrap().contains("healthy"));

    terminate(&child);
    let status = child
        .wait_timeout(Duration::from_secs(5))
        .unwrap()
        .expect("worker did not exit after SIGTERM");
    assert_eq!(status.code(), Some(0));
}
