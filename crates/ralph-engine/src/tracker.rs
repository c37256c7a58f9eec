//! Tracker plugin contract.
//!
//! The tracker is the source of truth for task identity and status. The
//! engine reads tasks at the start of every iteration and re-reads the
//! worked task afterwards; most trackers rely on the agent itself to close
//! tasks and merely report state on re-read.

use async_trait::async_trait;

use ralph_core::types::{Task, TaskStatus};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("task not found: {0}")]
    NotFound(String),
    /// Dependencies unmet or the tracker refuses to hand the task out.
    #[error("task blocked: {0}")]
    Blocked(String),
    #[error("operation not supported by this tracker: {0}")]
    Unsupported(&'static str),
    #[error("tracker I/O error: {0}")]
    Io(String),
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Tracker: Send + Sync {
    /// Tasks matching the status filter (all tasks when `None`), in the
    /// tracker's own stable, deterministic order. The engine selects in
    /// this order; an unstable order breaks the monotonic-progress
    /// guarantee.
    async fn get_tasks(&self, statuses: Option<&[TaskStatus]>) -> Result<Vec<Task>, TrackerError>;

    /// Look up one task by id.
    async fn get(&self, task_id: &str) -> Result<Task, TrackerError>;

    /// Transition `open -> in_progress`. Returns `false` when the tracker
    /// rejects the mutation; the iteration then proceeds read-only.
    async fn mark_in_progress(&self, task_id: &str) -> Result<bool, TrackerError>;

    /// Mark a task completed. Optional; the default refuses.
    async fn complete(&self, task_id: &str) -> Result<(), TrackerError> {
        let _ = task_id;
        Err(TrackerError::Unsupported("complete"))
    }
}
