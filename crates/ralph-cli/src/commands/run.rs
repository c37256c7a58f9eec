use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use ralph_core::config::{EngineConfig, InterruptConfig, RetryConfig};
use ralph_core::lockfile::{LockError, LockFile};
use ralph_core::session::{Session, SessionParams};
use ralph_core::session_store::SessionStore;
use ralph_core::types::StopReason;
use ralph_engine::interrupt::install_signal_handler;
use ralph_engine::{
    AgentPlugin, CancelToken, EngineEvent, EventBus, ExecutionEngine, InterruptCallbacks,
    InterruptCoordinator, OutputStream, Tracker,
};
use ralph_plugins::{JsonTracker, ProcessAgent};

use crate::{exit_codes, RunArgs};

/// Whether this invocation starts fresh or reopens a persisted session.
pub enum Mode {
    Fresh,
    Resume,
}

pub async fn run(cwd: &Path, args: RunArgs) -> Result<i32> {
    launch(cwd, args, Mode::Fresh).await
}

pub async fn launch(cwd: &Path, args: RunArgs, mode: Mode) -> Result<i32> {
    let tracker: Arc<dyn Tracker> = match args.tracker.as_str() {
        "json" => Arc::new(JsonTracker::in_dir(cwd)),
        other => {
            eprintln!("unknown tracker plugin `{other}`");
            return Ok(exit_codes::FAILURE);
        }
    };

    let agent: Arc<dyn AgentPlugin> = build_agent(&args);
    let detect = agent.detect();
    if !detect.available {
        eprintln!(
            "agent `{}` is not usable: {}",
            agent.meta().name,
            detect.error.unwrap_or_else(|| "unknown reason".into())
        );
        return Ok(exit_codes::FAILURE);
    }

    let store = SessionStore::new(cwd);
    let session = match mode {
        Mode::Fresh => {
            if let Ok(Some(existing)) = store.load() {
                if existing.resumable() {
                    eprintln!(
                        "note: replacing a resumable session ({}); use `ralph resume` to continue it",
                        existing.summary()
                    );
                }
            }
            let snapshot = tracker.get_tasks(None).await?;
            Session::create(
                SessionParams {
                    agent_plugin: args.agent.clone(),
                    tracker_plugin: args.tracker.clone(),
                    model: args.model.clone(),
                    epic_id: args.epic.clone(),
                    prd_path: args.prd.clone(),
                    max_iterations: args.max_iterations,
                    cwd: cwd.to_path_buf(),
                },
                snapshot,
            )
        }
        Mode::Resume => {
            let Some(mut session) = store.load()? else {
                eprintln!("no persisted session in {}", cwd.display());
                return Ok(exit_codes::FAILURE);
            };
            if !session.resumable() {
                eprintln!("session is not resumable: {}", session.summary());
                return Ok(exit_codes::FAILURE);
            }
            println!("resuming {}", session.summary());
            session.mark_running();
            session
        }
    };

    // Single-writer lock over the working directory. Stale locks are taken
    // over automatically; a live holder needs --force.
    let lock = match LockFile::acquire(cwd, session.session_id, args.force) {
        Ok(guard) => guard,
        Err(LockError::Held { holder }) => {
            eprintln!("{}", LockError::Held { holder });
            if !args.non_interactive {
                eprintln!("pass --force to take over, or `ralph stop` to end it");
            }
            return Ok(exit_codes::FAILURE);
        }
        Err(e) => return Err(e.into()),
    };

    let bus = EventBus::new();
    let printer = bus.subscribe(print_event);

    let config = EngineConfig {
        max_iterations: args.max_iterations,
        iteration_delay_ms: args.iteration_delay_ms,
        agent_timeout_secs: args.agent_timeout_secs,
        retry: RetryConfig {
            max_attempts: args.max_retries,
            ..RetryConfig::default()
        },
        ..EngineConfig::default()
    };

    let cancel = CancelToken::new();
    let engine = ExecutionEngine::new(config, bus.clone(), store, tracker, agent, cancel.clone());

    // First ctrl-c commits to graceful shutdown (headless), second within
    // the window force-quits without cleanup.
    let coordinator = InterruptCoordinator::new(
        InterruptConfig {
            headless: true,
            ..InterruptConfig::default()
        },
        InterruptCallbacks::new()
            .on_confirm({
                let cancel = cancel.clone();
                move || cancel.cancel()
            })
            .on_force_quit(|| std::process::exit(exit_codes::FORCE_QUIT)),
    );
    install_signal_handler(coordinator);

    let (reason, _session) = engine.run(session).await?;

    bus.unsubscribe(printer);
    lock.release();

    Ok(match reason {
        StopReason::Idle | StopReason::MaxIterations => exit_codes::SUCCESS,
        StopReason::Interrupted | StopReason::PausedExit => exit_codes::INTERRUPTED,
        StopReason::Fatal => exit_codes::FAILURE,
    })
}

fn build_agent(args: &RunArgs) -> Arc<dyn AgentPlugin> {
    match args.agent.as_str() {
        "claude" => Arc::new(ProcessAgent::claude(args.model.clone())),
        "codex" => Arc::new(ProcessAgent::codex(args.model.clone())),
        other => Arc::new(ProcessAgent::command(other.to_string(), Vec::new())),
    }
}

/// Plain-text event renderer for headless runs.
fn print_event(event: &EngineEvent) {
    match event {
        EngineEvent::EngineStarted { total_tasks } => {
            println!("engine started: {total_tasks} task(s) in backlog");
        }
        EngineEvent::TaskSelected { task, iteration } => {
            println!("[{iteration}] {}: {}", task.id, task.title);
        }
        EngineEvent::AgentOutput { stream, data } => match stream {
            OutputStream::Stdout => print!("{data}"),
            OutputStream::Stderr => eprint!("{data}"),
        },
        EngineEvent::IterationStarted { .. } => {}
        EngineEvent::IterationCompleted { result } => {
            println!(
                "[{}] done in {}ms{}",
                result.iteration,
                result.duration_ms,
                if result.task_completed {
                    " (task completed)"
                } else {
                    ""
                }
            );
        }
        EngineEvent::IterationFailed {
            iteration,
            error,
            action,
            ..
        } => {
            eprintln!("[{iteration}] failed: {error} (action: {action:?})");
        }
        EngineEvent::IterationRetrying {
            iteration,
            retry_attempt,
            max_retries,
            delay_ms,
            ..
        } => {
            println!("[{iteration}] retry {retry_attempt}/{max_retries} in {delay_ms}ms");
        }
        EngineEvent::IterationSkipped { reason, .. } => {
            println!("nothing to do ({reason:?})");
        }
        EngineEvent::EnginePaused { current_iteration } => {
            println!("paused at iteration {current_iteration}");
        }
        EngineEvent::EngineResumed { from_iteration } => {
            println!("resumed from iteration {from_iteration}");
        }
        EngineEvent::TaskCompleted { task_id, .. } => {
            println!("task {task_id} completed");
        }
        EngineEvent::AllComplete {
            total_completed, ..
        } => {
            println!("all {total_completed} task(s) completed");
        }
        EngineEvent::EngineStopped {
            reason,
            total_iterations,
            tasks_completed,
        } => {
            println!(
                "engine stopped ({reason}): {tasks_completed} task(s) completed over {total_iterations} iteration(s)"
            );
        }
    }
}
