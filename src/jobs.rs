//! Incomplete background jobs
//!
//! The worker's application layer produces these; the shutdown path only
//! reads them and forwards them to monitoring. The crate never tracks job
//! state itself - `JobSource` is the seam the producer plugs into.

use serde::{Deserialize, Serialize};

/// Work left unfinished at shutdown time. Opaque to the drain path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncompleteJob {
    pub id: String,
    /// Free-form, producer-defined detail carried through to monitoring.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

impl IncompleteJob {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(id: impl Into<String>, metadata: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            metadata,
        }
    }
}

/// Supplier of the jobs still pending when the worker shuts down.
pub trait JobSource: Send + Sync {
    fn incomplete_jobs(&self) -> Vec<IncompleteJob>;
}

/// Source for workers whose application layer exposes no job state.
pub struct NoPendingJobs;

impl JobSource for NoPendingJobs {
    fn incomplete_jobs(&self) -> Vec<IncompleteJob> {
        Vec::new()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
