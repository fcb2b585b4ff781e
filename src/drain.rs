//! Drain Protocol
//!
//! The shutdown sequence of one worker process, in strict order:
//!
//! 1. Stop accepting (flip the shared shutdown state)
//! 2. Report incomplete jobs to monitoring (best-effort)
//! 3. Answer every tracked connection with a terminal response and close it
//! 4. Exit the process with status 0
//!
//! The exit is unconditional: the host's default post-signal behavior would
//! otherwise race with the drain, so the protocol never returns control after
//! a successful state transition. Re-entry (a second signal) is a no-op.

use crate::connection::Conn;
use crate::jobs::JobSource;
use crate::monitor::MonitoringReporter;
use crate::registry::ConnectionRegistry;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Fixed success payload written to every drained connection before close.
pub const TERMINAL_RESPONSE: &[u8] =
    b"HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 2\r\n\r\nOK";

// =============================================================================
// Shutdown State
// =============================================================================

const RUNNING: u8 = 0;
const DRAINING: u8 = 1;
const EXITED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    Draining,
    Exited,
}

/// Process-wide shutdown lifecycle: Running -> Draining -> Exited.
///
/// Owned by the worker wiring and shared via `Arc` - the accept loop reads
/// it, the drain protocol transitions it. The Running->Draining edge is a
/// compare-and-set taken at most once per process.
pub struct ShutdownState {
    phase: AtomicU8,
}

impl ShutdownState {
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(RUNNING),
        }
    }

    /// Claim the Running -> Draining transition. Returns false if another
    /// drain already claimed it (second signal).
    pub fn begin_drain(&self) -> bool {
        self.phase
            .compare_exchange(RUNNING, DRAINING, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Accept gate observed by the worker loop.
    pub fn is_running(&self) -> bool {
        self.phase.load(Ordering::SeqCst) == RUNNING
    }

    pub fn mark_exited(&self) {
        self.phase.store(EXITED, Ordering::SeqCst);
    }

    pub fn phase(&self) -> Phase {
        match self.phase.load(Ordering::SeqCst) {
            RUNNING => Phase::Running,
            DRAINING => Phase::Draining,
            _ => Phase::Exited,
        }
    }
}

impl Default for ShutdownState {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Process Exit Seam
// =============================================================================

/// Terminal action of the drain. Injected so tests can observe the exit
/// instead of dying.
pub trait Exit: Send + Sync {
    fn exit(&self, code: i32);
}

/// Terminates the current process.
pub struct ProcessExit;

impl Exit for ProcessExit {
    fn exit(&self, code: i32) {
        std::process::exit(code);
    }
}

// =============================================================================
// Drain Protocol
// =============================================================================

pub struct DrainProtocol {
    state: Arc<ShutdownState>,
    registry: Arc<ConnectionRegistry>,
    jobs: Arc<dyn JobSource>,
    monitor: Arc<dyn MonitoringReporter>,
    exit: Arc<dyn Exit>,
}

impl DrainProtocol {
    pub fn new(
        state: Arc<ShutdownState>,
        registry: Arc<ConnectionRegistry>,
        jobs: Arc<dyn JobSource>,
        monitor: Arc<dyn MonitoringReporter>,
        exit: Arc<dyn Exit>,
    ) -> Self {
        Self {
            state,
            registry,
            jobs,
            monitor,
            exit,
        }
    }

    /// Execute the shutdown sequence. Only the first invocation runs the
    /// cleanup; later ones return immediately. No error raised by any step
    /// escapes this function - the last action on the winning path is always
    /// `exit(0)`.
    pub fn run(&self) {
        if !self.state.begin_drain() {
            eprintln!("[softstop] Drain already in progress, ignoring repeat signal.");
            return;
        }

        // Accept is disabled by the transition above; the worker loop checks
        // the state before every accept.
        self.report_incomplete_jobs();
        let closed = self.drain_connections();

        eprintln!(
            "[softstop] Drain complete ({} connections closed). Worker exiting.",
            closed
        );
        self.state.mark_exited();
        self.exit.exit(0);
    }

    fn report_incomplete_jobs(&self) {
        let jobs = self.jobs.incomplete_jobs();
        if jobs.is_empty() {
            return;
        }
        eprintln!(
            "[softstop] Reporting {} incomplete jobs to monitoring...",
            jobs.len()
        );
        if let Err(e) = self.monitor.report(&jobs) {
            eprintln!("[softstop] Failed to notify monitoring service: {:#}", e);
        }
    }

    fn drain_connections(&self) -> usize {
        let snapshot = self.registry.snapshot_and_clear();
        let total = snapshot.len();

        for mut conn in snapshot {
            // One client failing must not abort the rest of the snapshot
            if let Err(e) = conn.send_all(TERMINAL_RESPONSE) {
                eprintln!(
                    "[softstop] Failed to send terminal response to {}: {}",
                    conn.peer(),
                    e
                );
            }
            if let Err(e) = conn.close() {
                eprintln!("[softstop] Failed to close {}: {}", conn.peer(), e);
            }
        }
        total
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
