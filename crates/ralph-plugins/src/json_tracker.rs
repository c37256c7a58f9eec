//! JSON-file tracker.
//!
//! Tasks live in a single JSON array (`tasks.json` by convention). File
//! order is the tracker's stable ordering; the agent (or the engine via
//! `complete`) mutates statuses, and mutations are written with the same
//! temp-file + rename discipline as the session store so a crash never
//! leaves a half-written backlog.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use ralph_core::types::{Task, TaskStatus};
use ralph_engine::{Tracker, TrackerError};

// ---------------------------------------------------------------------------
// JsonTracker
// ---------------------------------------------------------------------------

pub struct JsonTracker {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl JsonTracker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Conventional location inside a working directory.
    pub fn in_dir(cwd: impl AsRef<Path>) -> Self {
        Self::new(cwd.as_ref().join("tasks.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Vec<Task>, TrackerError> {
        let data = fs::read_to_string(&self.path)
            .map_err(|e| TrackerError::Io(format!("read {}: {e}", self.path.display())))?;
        serde_json::from_str(&data)
            .map_err(|e| TrackerError::Io(format!("parse {}: {e}", self.path.display())))
    }

    fn write_all(&self, tasks: &[Task]) -> Result<(), TrackerError> {
        let mut payload = serde_json::to_string_pretty(tasks)
            .map_err(|e| TrackerError::Io(format!("serialize tasks: {e}")))?;
        payload.push('\n');

        let tmp = self.path.with_extension("json.tmp");
        let mut file = File::create(&tmp)
            .map_err(|e| TrackerError::Io(format!("create {}: {e}", tmp.display())))?;
        file.write_all(payload.as_bytes())
            .map_err(|e| TrackerError::Io(format!("write {}: {e}", tmp.display())))?;
        file.sync_all()
            .map_err(|e| TrackerError::Io(format!("sync {}: {e}", tmp.display())))?;
        drop(file);

        fs::rename(&tmp, &self.path)
            .map_err(|e| TrackerError::Io(format!("replace {}: {e}", self.path.display())))?;
        Ok(())
    }

    /// Apply `mutate` to the task under the write lock and persist.
    async fn update_task<F, T>(&self, task_id: &str, mutate: F) -> Result<T, TrackerError>
    where
        F: FnOnce(&mut Task) -> T,
    {
        let _guard = self.write_lock.lock().await;
        let mut tasks = self.read_all()?;
        let task = tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| TrackerError::NotFound(task_id.to_string()))?;
        let out = mutate(task);
        self.write_all(&tasks)?;
        Ok(out)
    }
}

#[async_trait]
impl Tracker for JsonTracker {
    async fn get_tasks(&self, statuses: Option<&[TaskStatus]>) -> Result<Vec<Task>, TrackerError> {
        let tasks = self.read_all()?;
        Ok(match statuses {
            None => tasks,
            Some(filter) => tasks
                .into_iter()
                .filter(|t| filter.contains(&t.status))
                .collect(),
        })
    }

    async fn get(&self, task_id: &str) -> Result<Task, TrackerError> {
        self.read_all()?
            .into_iter()
            .find(|t| t.id == task_id)
            .ok_or_else(|| TrackerError::NotFound(task_id.to_string()))
    }

    async fn mark_in_progress(&self, task_id: &str) -> Result<bool, TrackerError> {
        self.update_task(task_id, |task| {
            if task.status == TaskStatus::Open {
                task.status = TaskStatus::InProgress;
                debug!(task_id = %task.id, "task marked in progress");
                true
            } else {
                false
            }
        })
        .await
    }

    async fn complete(&self, task_id: &str) -> Result<(), TrackerError> {
        self.update_task(task_id, |task| {
            task.status = TaskStatus::Completed;
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
