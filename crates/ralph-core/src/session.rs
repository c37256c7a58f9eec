use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{IterationResult, Task, TaskStatus};

// ---------------------------------------------------------------------------
// SessionStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Paused,
    Interrupted,
    Completed,
    Failed,
}

// ---------------------------------------------------------------------------
// SessionParams
// ---------------------------------------------------------------------------

/// Inputs needed to create a fresh session.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub agent_plugin: String,
    pub tracker_plugin: String,
    pub model: Option<String>,
    pub epic_id: Option<String>,
    pub prd_path: Option<String>,
    /// 0 means unbounded.
    pub max_iterations: u32,
    pub cwd: PathBuf,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// The durable state of one run. The `session_id` is stable across resumes;
/// the engine is the only writer between ticks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub agent_plugin: String,
    pub tracker_plugin: String,
    pub model: Option<String>,
    pub epic_id: Option<String>,
    pub prd_path: Option<String>,
    /// 0 means unbounded.
    pub max_iterations: u32,
    /// Number of iterations started. Monotone across the session lifetime.
    pub current_iteration: u32,
    pub tasks_completed: u32,
    pub total_tasks: u32,
    /// Task list captured at session creation; used to compute progress
    /// after a resume.
    pub task_snapshot: Vec<Task>,
    pub cwd: PathBuf,
    pub is_paused: bool,
    pub paused_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Session {
    /// Create a new session, snapshotting the tracker's initial task list.
    pub fn create(params: SessionParams, snapshot: Vec<Task>) -> Self {
        let now = Utc::now();
        let already_done = snapshot
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count() as u32;
        Self {
            session_id: Uuid::new_v4(),
            status: SessionStatus::Running,
            started_at: now,
            updated_at: now,
            agent_plugin: params.agent_plugin,
            tracker_plugin: params.tracker_plugin,
            model: params.model,
            epic_id: params.epic_id,
            prd_path: params.prd_path,
            max_iterations: params.max_iterations,
            current_iteration: 0,
            tasks_completed: already_done,
            total_tasks: snapshot.len() as u32,
            task_snapshot: snapshot,
            cwd: params.cwd,
            is_paused: false,
            paused_at: None,
            last_error: None,
        }
    }

    /// Fold one iteration result into the session.
    ///
    /// Increments `current_iteration`, bumps `tasks_completed` when the
    /// result flipped a task to completed, refreshes `updated_at`, and sets
    /// or clears `last_error`.
    pub fn fold(&mut self, result: &IterationResult) {
        self.current_iteration += 1;
        if result.task_completed {
            self.tasks_completed = (self.tasks_completed + 1).min(self.total_tasks);
        }
        self.last_error = result.error.clone();
        self.updated_at = Utc::now();
    }

    /// Whether all snapshot tasks have been completed.
    pub fn all_tasks_completed(&self) -> bool {
        self.total_tasks > 0 && self.tasks_completed >= self.total_tasks
    }

    /// A session can be resumed while it has unfinished work and did not
    /// terminate cleanly.
    pub fn resumable(&self) -> bool {
        matches!(
            self.status,
            SessionStatus::Running | SessionStatus::Paused | SessionStatus::Interrupted
        ) && !self.all_tasks_completed()
    }

    /// Mark the session paused and stamp `paused_at`.
    pub fn mark_paused(&mut self) {
        self.is_paused = true;
        self.status = SessionStatus::Paused;
        let now = Utc::now();
        self.paused_at = Some(now);
        self.updated_at = now;
    }

    /// Clear the pause marker and return to `Running`.
    pub fn mark_running(&mut self) {
        self.is_paused = false;
        self.status = SessionStatus::Running;
        self.paused_at = None;
        self.updated_at = Utc::now();
    }

    pub fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Human-readable progress line for the resume prompt.
    pub fn summary(&self) -> String {
        let status = match self.status {
            SessionStatus::Running => "running",
            SessionStatus::Paused => "paused",
            SessionStatus::Interrupted => "interrupted",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        };
        format!(
            "session {} ({status}): {}/{} tasks completed, {} iteration(s), started {}",
            self.session_id,
            self.tasks_completed,
            self.total_tasks,
            self.current_iteration,
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SessionParams {
        SessionParams {
            agent_plugin: "claude".into(),
            tracker_plugin: "json".into(),
            model: None,
            epic_id: None,
            prd_path: None,
            max_iterations: 0,
            cwd: PathBuf::from("/tmp/work"),
        }
    }

    fn result_for(task: Task, iteration: u32, completed: bool) -> IterationResult {
        IterationResult {
            iteration,
            task,
            task_completed: completed,
            duration_ms: 10,
            exit_code: 0,
            error: None,
        }
    }

    #[test]
    fn create_snapshots_tasks_and_counts() {
        let mut done = Task::new("t0", "Done already");
        done.status = TaskStatus::Completed;
        let session = Session::create(params(), vec![done, Task::new("t1", "Open")]);

        assert_eq!(session.total_tasks, 2);
        assert_eq!(session.tasks_completed, 1);
        assert_eq!(session.current_iteration, 0);
        assert_eq!(session.status, SessionStatus::Running);
    }

    #[test]
    fn fold_increments_counters() {
        let mut session = Session::create(params(), vec![Task::new("t1", "A")]);
        session.fold(&result_for(Task::new("t1", "A"), 1, true));

        assert_eq!(session.current_iteration, 1);
        assert_eq!(session.tasks_completed, 1);
        assert!(session.last_error.is_none());
        assert!(session.all_tasks_completed());
    }

    #[test]
    fn fold_records_and_clears_error() {
        let mut session = Session::create(params(), vec![Task::new("t1", "A")]);

        let mut failed = result_for(Task::new("t1", "A"), 1, false);
        failed.error = Some("agent exited 1".into());
        session.fold(&failed);
        assert_eq!(session.last_error.as_deref(), Some("agent exited 1"));

        session.fold(&result_for(Task::new("t1", "A"), 2, true));
        assert!(session.last_error.is_none());
    }

    #[test]
    fn tasks_completed_never_exceeds_total() {
        let mut session = Session::create(params(), vec![Task::new("t1", "A")]);
        session.fold(&result_for(Task::new("t1", "A"), 1, true));
        session.fold(&result_for(Task::new("t1", "A"), 2, true));
        assert_eq!(session.tasks_completed, session.total_tasks);
    }

    #[test]
    fn resumable_states() {
        let mut session = Session::create(params(), vec![Task::new("t1", "A")]);
        assert!(session.resumable());

        session.set_status(SessionStatus::Interrupted);
        assert!(session.resumable());

        session.set_status(SessionStatus::Failed);
        assert!(!session.resumable());

        session.set_status(SessionStatus::Running);
        session.fold(&result_for(Task::new("t1", "A"), 1, true));
        assert!(!session.resumable());
    }

    #[test]
    fn pause_and_resume_preserve_counters() {
        let mut session = Session::create(params(), vec![Task::new("t1", "A")]);
        session.fold(&result_for(Task::new("t1", "A"), 1, false));
        let before = (session.current_iteration, session.tasks_completed);

        session.mark_paused();
        assert!(session.is_paused);
        assert_eq!(session.status, SessionStatus::Paused);
        assert!(session.paused_at.is_some());

        session.mark_running();
        assert!(!session.is_paused);
        assert!(session.paused_at.is_none());
        assert_eq!((session.current_iteration, session.tasks_completed), before);
    }

    #[test]
    fn summary_mentions_progress() {
        let session = Session::create(params(), vec![Task::new("t1", "A")]);
        let summary = session.summary();
        assert!(summary.contains("0/1 tasks completed"));
        assert!(summary.contains(&session.session_id.to_string()));
    }
}
