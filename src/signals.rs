//! Signal Bridge
//!
//! Maps SIGINT and SIGTERM to exactly one invocation of the drain protocol,
//! replacing the host's default disposition (abrupt termination mid-request).
//!
//! The bridge runs the drain on a dedicated daemon thread fed by
//! signal-hook's iterator, so the drain executes in ordinary thread context
//! rather than inside an async-signal handler. The registry mutex and the
//! shutdown state atomics synchronize it against the worker loop.

use crate::drain::DrainProtocol;
use anyhow::{bail, Result};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

static INSTALLED: AtomicBool = AtomicBool::new(false);

fn signal_name(sig: i32) -> &'static str {
    match sig {
        SIGINT => "SIGINT",
        SIGTERM => "SIGTERM",
        _ => "signal",
    }
}

/// Install the termination handlers. Must be called once, before the worker
/// starts accepting, so no signal can arrive unhandled.
///
/// `quiet_term_notice` suppresses the host-style "was sent SIGTERM!" notice
/// that is pure noise during an orderly rollout; the drain's own progress
/// lines are always logged.
pub fn install(drain: Arc<DrainProtocol>, quiet_term_notice: bool) -> Result<()> {
    if INSTALLED.swap(true, Ordering::SeqCst) {
        bail!("signal bridge already installed");
    }

    let mut signals = match Signals::new([SIGINT, SIGTERM]) {
        Ok(signals) => signals,
        Err(e) => {
            INSTALLED.store(false, Ordering::SeqCst);
            return Err(e.into());
        }
    };

    // Daemon thread - dies when the main thread exits, or takes the process
    // down itself through the drain protocol's exit.
    thread::spawn(move || {
        for sig in signals.forever() {
            if !quiet_term_notice {
                eprintln!(
                    "[softstop] Worker (pid {}) was sent {}!",
                    std::process::id(),
                    signal_name(sig)
                );
            }
            eprintln!("[softstop] Received {}, draining...", signal_name(sig));
            drain.run();
        }
    });

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
