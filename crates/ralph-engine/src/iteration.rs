use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use ralph_core::session::Session;
use ralph_core::types::{FailureAction, IterationResult, Task, TaskStatus};

use crate::agent::{AgentError, AgentPlugin};
use crate::cancel::CancelToken;
use crate::engine::EngineError;
use crate::event_bus::EventBus;
use crate::events::{EngineEvent, SkipReason};
use crate::runner::{AgentRunStatus, AgentRunner};
use crate::tracker::{Tracker, TrackerError};

// ---------------------------------------------------------------------------
// TickOutcome
// ---------------------------------------------------------------------------

/// Result of one invocation of the controller from the engine.
#[derive(Debug)]
pub enum TickOutcome {
    /// No eligible task remained.
    NoTasks,
    /// The agent ran to completion (the task may or may not be done).
    Finished(IterationResult),
    /// The run failed; the engine decides what to do with `action`.
    Failed {
        result: IterationResult,
        action: FailureAction,
    },
    /// The run was cancelled by the interrupt coordinator. Not an error;
    /// nothing was emitted and nothing should be folded.
    Cancelled,
}

// ---------------------------------------------------------------------------
// IterationController
// ---------------------------------------------------------------------------

/// Performs one iteration: pick a task, mark it in progress, build the
/// prompt, run the agent, and interpret the outcome against the tracker.
pub struct IterationController {
    tracker: Arc<dyn Tracker>,
    agent: Arc<dyn AgentPlugin>,
    runner: AgentRunner,
    bus: EventBus,
}

impl IterationController {
    pub fn new(
        tracker: Arc<dyn Tracker>,
        agent: Arc<dyn AgentPlugin>,
        runner: AgentRunner,
        bus: EventBus,
    ) -> Self {
        Self {
            tracker,
            agent,
            runner,
            bus,
        }
    }

    /// Run iteration `iteration` for `session`.
    ///
    /// `excluded` holds ids the engine has given up on this run (retry
    /// exhaustion); they are never selected again so the rest of the
    /// backlog is not starved.
    pub async fn run_iteration(
        &self,
        iteration: u32,
        session: &Session,
        excluded: &HashSet<String>,
        cancel: &CancelToken,
    ) -> Result<TickOutcome, EngineError> {
        if cancel.is_cancelled() {
            return Ok(TickOutcome::Cancelled);
        }

        // 1. Task selection: actionable tasks in tracker order, dependencies
        // satisfied, not previously given up on.
        let task = match self.select_task(excluded).await? {
            Some(task) => task,
            None => {
                self.bus.publish(EngineEvent::IterationSkipped {
                    iteration,
                    task_id: None,
                    reason: SkipReason::NoTasks,
                });
                return Ok(TickOutcome::NoTasks);
            }
        };

        self.bus.publish(EngineEvent::TaskSelected {
            task: task.clone(),
            iteration,
        });

        // 2. Mark in-progress. A rejected mutation downgrades to read-only;
        // a blocked task is handed back to the engine as a skip.
        if task.status == TaskStatus::Open {
            match self.tracker.mark_in_progress(&task.id).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(task_id = %task.id, "tracker rejected in-progress transition, proceeding read-only");
                }
                Err(TrackerError::Blocked(reason)) => {
                    let result = failure_result(iteration, &task, &reason);
                    self.emit_failed(&result, FailureAction::Skip);
                    return Ok(TickOutcome::Failed {
                        result,
                        action: FailureAction::Skip,
                    });
                }
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "mark_in_progress failed, proceeding read-only");
                }
            }
        }

        // 3. Prompt build is the plugin's concern; the core never inspects it.
        let prompt = self.agent.build_prompt(&task, session);

        self.bus.publish(EngineEvent::IterationStarted {
            iteration,
            task: task.clone(),
        });

        // 4. Agent run.
        let start = Instant::now();
        let run = match self
            .runner
            .run(self.agent.as_ref(), &prompt, &session.cwd, cancel)
            .await
        {
            Ok(run) => run,
            Err(e) => {
                let result = failure_result(iteration, &task, &e.to_string());
                let action = classify_agent_error(&e);
                self.emit_failed(&result, action);
                return Ok(TickOutcome::Failed { result, action });
            }
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        if run.status == AgentRunStatus::Cancelled {
            return Ok(TickOutcome::Cancelled);
        }

        // 5. Outcome interpretation: the tracker is ground truth, since the
        // agent may have closed the task itself.
        let task_completed = match self.tracker.get(&task.id).await {
            Ok(after) => after.status == TaskStatus::Completed,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "post-run task lookup failed");
                false
            }
        };

        let result = IterationResult {
            iteration,
            task: task.clone(),
            task_completed,
            duration_ms,
            exit_code: run.exit_code,
            error: run.error.clone(),
        };

        match run.status {
            AgentRunStatus::Completed => {
                self.bus.publish(EngineEvent::IterationCompleted {
                    result: result.clone(),
                });
                if task_completed {
                    self.bus.publish(EngineEvent::TaskCompleted {
                        task_id: task.id.clone(),
                        iteration,
                    });
                }
                Ok(TickOutcome::Finished(result))
            }
            AgentRunStatus::Failed | AgentRunStatus::TimedOut => {
                let action = FailureAction::Retry;
                self.emit_failed(&result, action);
                Ok(TickOutcome::Failed { result, action })
            }
            AgentRunStatus::Cancelled => unreachable!("handled above"),
        }
    }

    /// First actionable task, in tracker order, with all dependencies
    /// completed and not in the exclusion set.
    async fn select_task(&self, excluded: &HashSet<String>) -> Result<Option<Task>, EngineError> {
        let candidates = self
            .tracker
            .get_tasks(Some(&[TaskStatus::Open, TaskStatus::InProgress]))
            .await?;
        if candidates.is_empty() {
            return Ok(None);
        }

        let completed: HashSet<String> = self
            .tracker
            .get_tasks(Some(&[TaskStatus::Completed]))
            .await?
            .into_iter()
            .map(|t| t.id)
            .collect();

        Ok(candidates
            .into_iter()
            .find(|t| !excluded.contains(&t.id) && t.deps_satisfied(&completed)))
    }

    fn emit_failed(&self, result: &IterationResult, action: FailureAction) {
        self.bus.publish(EngineEvent::IterationFailed {
            iteration: result.iteration,
            task: result.task.clone(),
            error: result
                .error
                .clone()
                .unwrap_or_else(|| "unknown error".into()),
            action,
        });
    }
}

// ---------------------------------------------------------------------------
// Failure classification (policy of the engine loop)
// ---------------------------------------------------------------------------

/// Errors from the plugin itself (missing binary, bad config, auth) can
/// never succeed on retry.
fn classify_agent_error(error: &AgentError) -> FailureAction {
    if error.is_fatal() {
        FailureAction::Abort
    } else {
        FailureAction::Retry
    }
}

fn failure_result(iteration: u32, task: &Task, error: &str) -> IterationResult {
    IterationResult {
        iteration,
        task: task.clone(),
        task_completed: false,
        duration_ms: 0,
        exit_code: -1,
        error: Some(error.to_string()),
    }
}
