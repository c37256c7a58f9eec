use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tracing::{error, info, warn};

use ralph_core::config::EngineConfig;
use ralph_core::session::{Session, SessionStatus};
use ralph_core::session_store::SessionStore;
use ralph_core::types::{FailureAction, StopReason};

use crate::agent::AgentPlugin;
use crate::cancel::{CancelToken, SleepOutcome};
use crate::event_bus::EventBus;
use crate::events::EngineEvent;
use crate::iteration::{IterationController, TickOutcome};
use crate::runner::AgentRunner;
use crate::tracker::{Tracker, TrackerError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("tracker error: {0}")]
    Tracker(#[from] TrackerError),
}

// ---------------------------------------------------------------------------
// EngineState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running,
    Paused,
    Stopping,
    Stopped,
}

// ---------------------------------------------------------------------------
// Shared state / EngineHandle
// ---------------------------------------------------------------------------

struct Shared {
    state: Mutex<EngineState>,
    pause_requested: AtomicBool,
    resume_notify: Notify,
}

/// Control surface handed to the CLI and the interrupt coordinator.
///
/// `pause` is a checkpoint, not a cancellation: the loop finishes the
/// current tick, persists, and waits; `resume` continues with counters
/// intact. `stop` cancels the shared token and tears the loop down.
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<Shared>,
    cancel: CancelToken,
}

impl EngineHandle {
    pub fn state(&self) -> EngineState {
        *self.shared.state.lock().expect("engine state lock poisoned")
    }

    /// Request a pause at the next checkpoint.
    pub fn pause(&self) {
        self.shared.pause_requested.store(true, Ordering::SeqCst);
    }

    /// Resume a paused engine.
    pub fn resume(&self) {
        self.shared.pause_requested.store(false, Ordering::SeqCst);
        self.shared.resume_notify.notify_one();
    }

    /// Request graceful shutdown.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// The cancel token shared with every blocking operation.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
}

// ---------------------------------------------------------------------------
// ExecutionEngine
// ---------------------------------------------------------------------------

/// The top-level loop: budgeting, retry/backoff, pause/resume, and
/// termination reasons.
///
/// Each tick delegates to the [`IterationController`]; after every tick the
/// result is folded into the session and persisted before the next
/// iteration starts.
pub struct ExecutionEngine {
    config: EngineConfig,
    bus: EventBus,
    store: SessionStore,
    controller: IterationController,
    cancel: CancelToken,
    shared: Arc<Shared>,
}

impl ExecutionEngine {
    pub fn new(
        config: EngineConfig,
        bus: EventBus,
        store: SessionStore,
        tracker: Arc<dyn Tracker>,
        agent: Arc<dyn AgentPlugin>,
        cancel: CancelToken,
    ) -> Self {
        let runner = AgentRunner::new(bus.clone(), config.agent_timeout(), config.cancel_grace());
        let controller = IterationController::new(tracker, agent, runner, bus.clone());
        Self {
            config,
            bus,
            store,
            controller,
            cancel,
            shared: Arc::new(Shared {
                state: Mutex::new(EngineState::Idle),
                pause_requested: AtomicBool::new(false),
                resume_notify: Notify::new(),
            }),
        }
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            shared: Arc::clone(&self.shared),
            cancel: self.cancel.clone(),
        }
    }

    /// Run the loop to termination, returning the reason and the final
    /// session state.
    pub async fn run(&self, mut session: Session) -> Result<(StopReason, Session), EngineError> {
        self.store.clean_stale_tmp();
        self.set_state(EngineState::Running);
        self.bus.publish(EngineEvent::EngineStarted {
            total_tasks: session.total_tasks,
        });
        info!(
            session_id = %session.session_id,
            total_tasks = session.total_tasks,
            max_iterations = self.config.max_iterations,
            "engine started"
        );

        // Per-task retry attempts, and tasks given up on this run.
        let mut attempts: HashMap<String, u32> = HashMap::new();
        let mut skipped: HashSet<String> = HashSet::new();

        let reason = loop {
            if self.cancel.is_cancelled() {
                break StopReason::Interrupted;
            }

            if let Some(reason) = self.wait_while_paused(&mut session).await {
                break reason;
            }

            if self.config.max_iterations > 0
                && session.current_iteration >= self.config.max_iterations
            {
                break StopReason::MaxIterations;
            }

            let iteration = session.current_iteration + 1;
            let tick = self
                .controller
                .run_iteration(iteration, &session, &skipped, &self.cancel)
                .await?;

            match tick {
                TickOutcome::NoTasks => break StopReason::Idle,
                TickOutcome::Cancelled => break StopReason::Interrupted,
                TickOutcome::Finished(result) => {
                    let task_id = result.task.id.clone();
                    let task_completed = result.task_completed;
                    session.fold(&result);
                    self.save_quiet(&session);

                    if task_completed {
                        attempts.remove(&task_id);
                        if session.all_tasks_completed() {
                            self.bus.publish(EngineEvent::AllComplete {
                                total_completed: session.tasks_completed,
                                total_iterations: session.current_iteration,
                            });
                            break StopReason::Idle;
                        }
                    }
                }
                TickOutcome::Failed { result, action } => {
                    let task = result.task.clone();
                    session.fold(&result);
                    self.save_quiet(&session);

                    match action {
                        FailureAction::Abort => break StopReason::Fatal,
                        FailureAction::Skip => {
                            skipped.insert(task.id);
                        }
                        FailureAction::Retry => {
                            let attempt = attempts.entry(task.id.clone()).or_insert(0);
                            if *attempt < self.config.retry.max_attempts {
                                let delay = self.config.retry.backoff_for(*attempt);
                                *attempt += 1;
                                self.bus.publish(EngineEvent::IterationRetrying {
                                    iteration,
                                    task: task.clone(),
                                    retry_attempt: *attempt,
                                    max_retries: self.config.retry.max_attempts,
                                    delay_ms: delay.as_millis() as u64,
                                });
                                if self.cancel.sleep(delay).await == SleepOutcome::Cancelled {
                                    break StopReason::Interrupted;
                                }
                                // Same task, next iteration number.
                                continue;
                            }
                            info!(task_id = %task.id, "retries exhausted, skipping task");
                            skipped.insert(task.id);
                        }
                    }
                }
            }

            if self.config.iteration_delay_ms > 0 {
                let delay = std::time::Duration::from_millis(self.config.iteration_delay_ms);
                if self.cancel.sleep(delay).await == SleepOutcome::Cancelled {
                    break StopReason::Interrupted;
                }
            }
        };

        self.conclude(reason, &mut session);
        Ok((reason, session))
    }

    /// Pause checkpoint. Returns a stop reason when shutdown was requested
    /// while paused.
    async fn wait_while_paused(&self, session: &mut Session) -> Option<StopReason> {
        if !self.shared.pause_requested.load(Ordering::SeqCst) {
            return None;
        }

        session.mark_paused();
        self.save_quiet(session);
        self.set_state(EngineState::Paused);
        self.bus.publish(EngineEvent::EnginePaused {
            current_iteration: session.current_iteration,
        });
        info!(iteration = session.current_iteration, "engine paused");

        loop {
            if !self.shared.pause_requested.load(Ordering::SeqCst) {
                break;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return Some(StopReason::PausedExit),
                _ = self.shared.resume_notify.notified() => {}
            }
        }

        session.mark_running();
        self.save_quiet(session);
        self.set_state(EngineState::Running);
        self.bus.publish(EngineEvent::EngineResumed {
            from_iteration: session.current_iteration,
        });
        info!(iteration = session.current_iteration, "engine resumed");
        None
    }

    /// Final status transition, persistence, and the `engine:stopped` event.
    fn conclude(&self, reason: StopReason, session: &mut Session) {
        self.set_state(EngineState::Stopping);

        match reason {
            StopReason::Idle => {
                session.set_status(SessionStatus::Completed);
                // The snapshot is only destroyed on a clean terminal.
                if let Err(e) = self.store.delete() {
                    warn!(error = %e, "failed to delete completed session file");
                }
            }
            StopReason::MaxIterations => {
                // Budget stops stay resumable.
                session.set_status(SessionStatus::Running);
                self.save_quiet(session);
            }
            StopReason::Interrupted => {
                session.set_status(SessionStatus::Interrupted);
                self.save_quiet(session);
            }
            StopReason::Fatal => {
                session.set_status(SessionStatus::Failed);
                self.save_quiet(session);
            }
            StopReason::PausedExit => {
                // Already marked paused at the checkpoint.
                self.save_quiet(session);
            }
        }

        self.bus.publish(EngineEvent::EngineStopped {
            reason,
            total_iterations: session.current_iteration,
            tasks_completed: session.tasks_completed,
        });
        info!(
            reason = %reason,
            iterations = session.current_iteration,
            tasks_completed = session.tasks_completed,
            "engine stopped"
        );
        self.set_state(EngineState::Stopped);
    }

    /// Persistence failures never abort the run; the next save retries the
    /// full snapshot and atomic rename prevents corruption.
    fn save_quiet(&self, session: &Session) {
        if let Err(e) = self.store.save(session) {
            error!(error = %e, "failed to persist session");
        }
    }

    fn set_state(&self, state: EngineState) {
        *self.shared.state.lock().expect("engine state lock poisoned") = state;
    }
}
