use std::collections::HashSet;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    InProgress,
    Blocked,
    Completed,
    Cancelled,
}

impl TaskStatus {
    /// Returns `true` when the task still needs work.
    pub fn is_actionable(&self) -> bool {
        matches!(self, TaskStatus::Open | TaskStatus::InProgress)
    }

    /// Returns `true` when the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A unit of work owned by the tracker. The engine treats a task as
/// immutable within one iteration; the tracker is the source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    /// Ids of tasks that must be completed before this one is eligible.
    #[serde(default)]
    pub deps: Vec<String>,
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            status: TaskStatus::Open,
            deps: Vec::new(),
        }
    }

    /// Returns `true` when every dependency id is in `completed`.
    pub fn deps_satisfied(&self, completed: &HashSet<String>) -> bool {
        self.deps.iter().all(|dep| completed.contains(dep))
    }
}

// ---------------------------------------------------------------------------
// IterationResult
// ---------------------------------------------------------------------------

/// Outcome of one engine iteration, folded into the session after each tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationResult {
    /// 1-indexed iteration number this result belongs to.
    pub iteration: u32,
    /// The task that was worked on.
    pub task: Task,
    /// Whether the tracker reported the task completed after the run.
    pub task_completed: bool,
    /// Wall-clock duration of the agent run in milliseconds.
    pub duration_ms: u64,
    /// Exit code of the agent process (-1 when the process never exited).
    pub exit_code: i32,
    /// Error description when the run failed.
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// StopReason
// ---------------------------------------------------------------------------

/// Why the execution engine terminated. Carried on `engine:stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The iteration budget was exhausted.
    MaxIterations,
    /// No eligible task remained.
    Idle,
    /// An unrecoverable error aborted the loop.
    Fatal,
    /// The operator confirmed a graceful shutdown.
    Interrupted,
    /// Stop was requested while the engine was paused.
    PausedExit,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::MaxIterations => "max_iterations",
            StopReason::Idle => "idle",
            StopReason::Fatal => "fatal",
            StopReason::Interrupted => "interrupted",
            StopReason::PausedExit => "paused_exit",
        }
    }

    /// Reasons that leave the backlog in a good state.
    pub fn is_success(&self) -> bool {
        matches!(self, StopReason::Idle | StopReason::MaxIterations)
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// FailureAction
// ---------------------------------------------------------------------------

/// What the engine should do about a failed iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureAction {
    Retry,
    Skip,
    Abort,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actionable_statuses() {
        assert!(TaskStatus::Open.is_actionable());
        assert!(TaskStatus::InProgress.is_actionable());
        assert!(!TaskStatus::Completed.is_actionable());
        assert!(!TaskStatus::Blocked.is_actionable());
    }

    #[test]
    fn deps_satisfied_requires_all_completed() {
        let mut task = Task::new("t2", "Second");
        task.deps = vec!["t1".into(), "t0".into()];

        let mut completed = HashSet::new();
        completed.insert("t1".to_string());
        assert!(!task.deps_satisfied(&completed));

        completed.insert("t0".to_string());
        assert!(task.deps_satisfied(&completed));
    }

    #[test]
    fn deps_satisfied_with_no_deps() {
        let task = Task::new("t1", "First");
        assert!(task.deps_satisfied(&HashSet::new()));
    }

    #[test]
    fn stop_reason_wire_names() {
        assert_eq!(StopReason::MaxIterations.as_str(), "max_iterations");
        assert_eq!(
            serde_json::to_string(&StopReason::PausedExit).unwrap(),
            "\"paused_exit\""
        );
    }

    #[test]
    fn task_deserializes_without_deps_field() {
        let task: Task =
            serde_json::from_str(r#"{"id":"a","title":"A","status":"open"}"#).unwrap();
        assert!(task.deps.is_empty());
    }
}
