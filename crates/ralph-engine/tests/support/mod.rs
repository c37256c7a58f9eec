//! Scripted tracker and agent used by the engine integration tests.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use ralph_core::session::Session;
use ralph_core::types::{Task, TaskStatus};
use ralph_engine::{
    AgentError, AgentExit, AgentHandle, AgentMeta, AgentPlugin, DetectResult, Tracker,
    TrackerError,
};

// ---------------------------------------------------------------------------
// MockTracker
// ---------------------------------------------------------------------------

/// In-memory tracker with stable (insertion) order.
pub struct MockTracker {
    tasks: Mutex<Vec<Task>>,
}

impl MockTracker {
    pub fn new(tasks: Vec<Task>) -> Arc<Self> {
        Arc::new(Self {
            tasks: Mutex::new(tasks),
        })
    }

    pub fn snapshot(&self) -> Vec<Task> {
        self.tasks.lock().unwrap().clone()
    }

    pub fn force_complete(&self, task_id: &str) {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(task) = tasks.iter_mut().find(|t| t.id == task_id) {
            task.status = TaskStatus::Completed;
        }
    }
}

#[async_trait]
impl Tracker for MockTracker {
    async fn get_tasks(&self, statuses: Option<&[TaskStatus]>) -> Result<Vec<Task>, TrackerError> {
        let tasks = self.tasks.lock().unwrap();
        Ok(match statuses {
            None => tasks.clone(),
            Some(filter) => tasks
                .iter()
                .filter(|t| filter.contains(&t.status))
                .cloned()
                .collect(),
        })
    }

    async fn get(&self, task_id: &str) -> Result<Task, TrackerError> {
        self.tasks
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.id == task_id)
            .cloned()
            .ok_or_else(|| TrackerError::NotFound(task_id.to_string()))
    }

    async fn mark_in_progress(&self, task_id: &str) -> Result<bool, TrackerError> {
        let mut tasks = self.tasks.lock().unwrap();
        match tasks.iter_mut().find(|t| t.id == task_id) {
            Some(task) if task.status == TaskStatus::Open => {
                task.status = TaskStatus::InProgress;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(TrackerError::NotFound(task_id.to_string())),
        }
    }

    async fn complete(&self, task_id: &str) -> Result<(), TrackerError> {
        self.force_complete(task_id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ScriptedAgent
// ---------------------------------------------------------------------------

/// Behavior of one scripted agent invocation.
#[derive(Debug, Clone, Copy)]
pub enum RunBehavior {
    /// Exit 0 and mark the prompted task completed in the tracker.
    Succeed,
    /// Exit with the given non-zero code.
    Fail(i32),
    /// Stream one chunk then block until interrupted.
    Hang,
    /// Refuse to start (environment/not-ready error).
    NotReady,
}

/// Agent plugin that replays a scripted sequence of run behaviors.
///
/// The prompt's first line carries the task id so a `Succeed` run can close
/// the right task, the way a real agent would.
pub struct ScriptedAgent {
    tracker: Arc<MockTracker>,
    script: Mutex<VecDeque<RunBehavior>>,
    default: RunBehavior,
    pub invocations: AtomicUsize,
}

impl ScriptedAgent {
    pub fn new(tracker: Arc<MockTracker>, script: Vec<RunBehavior>, default: RunBehavior) -> Self {
        Self {
            tracker,
            script: Mutex::new(script.into()),
            default,
            invocations: AtomicUsize::new(0),
        }
    }

    pub fn always_succeeding(tracker: Arc<MockTracker>) -> Self {
        Self::new(tracker, Vec::new(), RunBehavior::Succeed)
    }
}

#[async_trait]
impl AgentPlugin for ScriptedAgent {
    fn meta(&self) -> AgentMeta {
        AgentMeta {
            name: "scripted".into(),
            version: Some("0.0-test".into()),
        }
    }

    fn detect(&self) -> DetectResult {
        DetectResult::available()
    }

    fn build_prompt(&self, task: &Task, _session: &Session) -> String {
        format!("task-id: {}\nTask: {}", task.id, task.title)
    }

    async fn execute(
        &self,
        prompt: &str,
        _cwd: &Path,
    ) -> Result<Box<dyn AgentHandle>, AgentError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.default);

        let task_id = prompt
            .lines()
            .next()
            .and_then(|line| line.strip_prefix("task-id: "))
            .unwrap_or_default()
            .to_string();

        let (stdout_tx, stdout_rx) = flume::unbounded();
        let (stderr_tx, stderr_rx) = flume::unbounded();
        let (exit_tx, exit_rx) = tokio::sync::mpsc::channel(1);

        let mut interrupt_exit = None;
        match behavior {
            RunBehavior::Succeed => {
                self.tracker.force_complete(&task_id);
                let _ = stdout_tx.send(format!("completed {task_id}\n").into_bytes());
                let _ = exit_tx.try_send(AgentExit {
                    exit_code: 0,
                    error: None,
                });
            }
            RunBehavior::Fail(code) => {
                let _ = stderr_tx.send(b"agent failure\n".to_vec());
                let _ = exit_tx.try_send(AgentExit {
                    exit_code: code,
                    error: None,
                });
            }
            RunBehavior::Hang => {
                let _ = stdout_tx.send(b"working...\n".to_vec());
                // Exit only arrives via interrupt().
                interrupt_exit = Some(exit_tx.clone());
            }
            RunBehavior::NotReady => {
                return Err(AgentError::NotReady("credentials missing".into()));
            }
        }

        Ok(Box::new(ScriptedHandle {
            stdout: Some(stdout_rx),
            stderr: Some(stderr_rx),
            exit_rx,
            interrupt_exit,
        }))
    }
}

// ---------------------------------------------------------------------------
// ScriptedHandle
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ScriptedHandle {
    stdout: Option<flume::Receiver<Vec<u8>>>,
    stderr: Option<flume::Receiver<Vec<u8>>>,
    exit_rx: tokio::sync::mpsc::Receiver<AgentExit>,
    interrupt_exit: Option<tokio::sync::mpsc::Sender<AgentExit>>,
}

#[async_trait]
impl AgentHandle for ScriptedHandle {
    fn take_stdout(&mut self) -> Option<flume::Receiver<Vec<u8>>> {
        self.stdout.take()
    }

    fn take_stderr(&mut self) -> Option<flume::Receiver<Vec<u8>>> {
        self.stderr.take()
    }

    async fn wait(&mut self) -> AgentExit {
        self.exit_rx.recv().await.unwrap_or(AgentExit {
            exit_code: -1,
            error: None,
        })
    }

    fn interrupt(&self) {
        if let Some(tx) = &self.interrupt_exit {
            let _ = tx.try_send(AgentExit {
                exit_code: 130,
                error: None,
            });
        }
    }

    fn kill(&self) {
        if let Some(tx) = &self.interrupt_exit {
            let _ = tx.try_send(AgentExit {
                exit_code: -1,
                error: None,
            });
        }
    }
}
