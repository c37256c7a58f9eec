use serde::{Deserialize, Serialize};

use ralph_core::types::{FailureAction, IterationResult, StopReason, Task};

// ---------------------------------------------------------------------------
// OutputStream
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

// ---------------------------------------------------------------------------
// SkipReason
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No eligible task remained in the backlog.
    NoTasks,
    /// The task's dependencies were not all completed.
    DependenciesUnmet,
}

// ---------------------------------------------------------------------------
// EngineEvent
// ---------------------------------------------------------------------------

/// Typed progress events carried on the bus.
///
/// Emission is total-order within a single run; for every task observed to
/// complete, `task:selected` precedes `iteration:started` precedes
/// `iteration:completed` precedes `task:completed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    #[serde(rename = "engine:started")]
    EngineStarted { total_tasks: u32 },

    #[serde(rename = "engine:paused")]
    EnginePaused { current_iteration: u32 },

    #[serde(rename = "engine:resumed")]
    EngineResumed { from_iteration: u32 },

    #[serde(rename = "engine:stopped")]
    EngineStopped {
        reason: StopReason,
        total_iterations: u32,
        tasks_completed: u32,
    },

    #[serde(rename = "iteration:started")]
    IterationStarted { iteration: u32, task: Task },

    #[serde(rename = "iteration:completed")]
    IterationCompleted { result: IterationResult },

    #[serde(rename = "iteration:failed")]
    IterationFailed {
        iteration: u32,
        task: Task,
        error: String,
        action: FailureAction,
    },

    #[serde(rename = "iteration:retrying")]
    IterationRetrying {
        iteration: u32,
        task: Task,
        retry_attempt: u32,
        max_retries: u32,
        delay_ms: u64,
    },

    #[serde(rename = "iteration:skipped")]
    IterationSkipped {
        iteration: u32,
        task_id: Option<String>,
        reason: SkipReason,
    },

    #[serde(rename = "agent:output")]
    AgentOutput { stream: OutputStream, data: String },

    #[serde(rename = "task:selected")]
    TaskSelected { task: Task, iteration: u32 },

    #[serde(rename = "task:completed")]
    TaskCompleted { task_id: String, iteration: u32 },

    #[serde(rename = "all:complete")]
    AllComplete {
        total_completed: u32,
        total_iterations: u32,
    },
}

impl EngineEvent {
    /// The wire name of the event (`engine:started`, `agent:output`, ...).
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::EngineStarted { .. } => "engine:started",
            EngineEvent::EnginePaused { .. } => "engine:paused",
            EngineEvent::EngineResumed { .. } => "engine:resumed",
            EngineEvent::EngineStopped { .. } => "engine:stopped",
            EngineEvent::IterationStarted { .. } => "iteration:started",
            EngineEvent::IterationCompleted { .. } => "iteration:completed",
            EngineEvent::IterationFailed { .. } => "iteration:failed",
            EngineEvent::IterationRetrying { .. } => "iteration:retrying",
            EngineEvent::IterationSkipped { .. } => "iteration:skipped",
            EngineEvent::AgentOutput { .. } => "agent:output",
            EngineEvent::TaskSelected { .. } => "task:selected",
            EngineEvent::TaskCompleted { .. } => "task:completed",
            EngineEvent::AllComplete { .. } => "all:complete",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
