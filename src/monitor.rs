//! Monitoring Reporter
//!
//! Receives the incomplete-job list at shutdown. Strictly best-effort from
//! the drain's perspective: one attempt, failures logged and swallowed.

use crate::jobs::IncompleteJob;
use anyhow::Result;

pub trait MonitoringReporter: Send + Sync {
    /// Deliver the ordered job list. Called at most once per shutdown.
    fn report(&self, jobs: &[IncompleteJob]) -> Result<()>;
}

/// Default collaborator: writes the report payload to stderr as one JSON
/// line. Deployments with a real monitoring endpoint plug in their own
/// `MonitoringReporter` instead.
pub struct LogMonitor;

impl MonitoringReporter for LogMonitor {
    fn report(&self, jobs: &[IncompleteJob]) -> Result<()> {
        let payload = serde_json::to_string(jobs)?;
        eprintln!("[softstop] Incomplete jobs at shutdown: {}", payload);
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_log_monitor_accepts_jobs() {
        let jobs = vec![
            IncompleteJob::new("job-1"),
            IncompleteJob::with_metadata("job-2", json!({ "queue": "emails" })),
        ];
        assert!(LogMonitor.report(&jobs).is_ok());
    }

    #[test]
    fn test_payload_preserves_order() {
        let jobs = vec![IncompleteJob::new("first"), IncompleteJob::new("second")];
        let payload = serde_json::to_string(&jobs).unwrap();
        let first = payload.find("first").unwrap();
        let second = payload.find("second").unwrap();
        assert!(first < second);
    }
}
