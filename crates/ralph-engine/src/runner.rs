use std::path::Path;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::agent::{AgentError, AgentExit, AgentHandle, AgentPlugin};
use crate::cancel::CancelToken;
use crate::event_bus::EventBus;
use crate::events::{EngineEvent, OutputStream};

/// Bytes of each stream kept for failure diagnosis.
const MAX_TAIL_BYTES: usize = 16 * 1024;

// ---------------------------------------------------------------------------
// AgentResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRunStatus {
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

/// Outcome of one agent invocation as observed by the runner.
#[derive(Debug, Clone)]
pub struct AgentResult {
    pub status: AgentRunStatus,
    pub exit_code: i32,
    pub stdout_tail: String,
    pub stderr_tail: String,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// AgentRunner
// ---------------------------------------------------------------------------

/// Drives one agent invocation: start, stream output, await completion,
/// honour cancellation and timeout.
///
/// The runner never retries; retry policy lives in the engine. A cancelled
/// run never reports `Completed`.
pub struct AgentRunner {
    bus: EventBus,
    timeout: Duration,
    grace: Duration,
}

impl AgentRunner {
    pub fn new(bus: EventBus, timeout: Duration, grace: Duration) -> Self {
        Self {
            bus,
            timeout,
            grace,
        }
    }

    /// Run the agent to completion in `cwd`.
    ///
    /// Both output streams are forwarded to the bus as `agent:output`
    /// events and their bounded tails are captured into the result. On
    /// timeout or cancellation the subprocess is interrupted, given the
    /// grace window, then killed.
    pub async fn run(
        &self,
        plugin: &dyn AgentPlugin,
        prompt: &str,
        cwd: &Path,
        cancel: &CancelToken,
    ) -> Result<AgentResult, AgentError> {
        let mut handle = plugin.execute(prompt, cwd).await?;

        let stdout_task = self.drain_stream(handle.take_stdout(), OutputStream::Stdout);
        let stderr_task = self.drain_stream(handle.take_stderr(), OutputStream::Stderr);

        enum WaitOutcome {
            Exited(AgentExit),
            Cancelled,
            TimedOut,
        }

        let outcome = {
            let wait = handle.wait();
            tokio::pin!(wait);
            tokio::select! {
                exit = &mut wait => WaitOutcome::Exited(exit),
                _ = cancel.cancelled() => WaitOutcome::Cancelled,
                _ = tokio::time::sleep(self.timeout) => WaitOutcome::TimedOut,
            }
        };

        let (status, exit, error) = match outcome {
            WaitOutcome::Exited(exit) => {
                if exit.success() {
                    (AgentRunStatus::Completed, exit, None)
                } else {
                    let error = exit
                        .error
                        .clone()
                        .unwrap_or_else(|| format!("agent exited with code {}", exit.exit_code));
                    (AgentRunStatus::Failed, exit, Some(error))
                }
            }
            WaitOutcome::Cancelled => {
                info!("agent run cancelled, stopping subprocess");
                let exit = self.stop_with_grace(&mut handle).await;
                (AgentRunStatus::Cancelled, exit, None)
            }
            WaitOutcome::TimedOut => {
                warn!(timeout_secs = self.timeout.as_secs(), "agent run timed out");
                let exit = self.stop_with_grace(&mut handle).await;
                let error = format!("agent timed out after {}s", self.timeout.as_secs());
                (AgentRunStatus::TimedOut, exit, Some(error))
            }
        };

        let stdout_tail = join_tail(stdout_task).await;
        let stderr_tail = join_tail(stderr_task).await;

        debug!(?status, exit_code = exit.exit_code, "agent run finished");

        Ok(AgentResult {
            status,
            exit_code: exit.exit_code,
            stdout_tail,
            stderr_tail,
            error,
        })
    }

    /// Interrupt the subprocess, wait out the grace window, then kill.
    async fn stop_with_grace(&self, handle: &mut Box<dyn AgentHandle>) -> AgentExit {
        handle.interrupt();
        {
            let wait = handle.wait();
            tokio::pin!(wait);
            tokio::select! {
                exit = &mut wait => return exit,
                _ = tokio::time::sleep(self.grace) => {
                    warn!("agent did not stop within grace window, killing");
                }
            }
        }
        handle.kill();
        handle.wait().await
    }

    /// Forward one output stream to the bus, keeping a bounded tail.
    fn drain_stream(
        &self,
        rx: Option<flume::Receiver<Vec<u8>>>,
        stream: OutputStream,
    ) -> Option<JoinHandle<String>> {
        let rx = rx?;
        let bus = self.bus.clone();
        Some(tokio::spawn(async move {
            let mut tail: Vec<u8> = Vec::new();
            while let Ok(chunk) = rx.recv_async().await {
                bus.publish(EngineEvent::AgentOutput {
                    stream,
                    data: String::from_utf8_lossy(&chunk).into_owned(),
                });
                tail.extend_from_slice(&chunk);
                if tail.len() > MAX_TAIL_BYTES {
                    let excess = tail.len() - MAX_TAIL_BYTES;
                    tail.drain(..excess);
                }
            }
            String::from_utf8_lossy(&tail).into_owned()
        }))
    }
}

async fn join_tail(task: Option<JoinHandle<String>>) -> String {
    match task {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentMeta, DetectResult};
    use async_trait::async_trait;
    use ralph_core::session::Session;
    use ralph_core::types::Task;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    // -- Scripted handle/plugin --

    #[derive(Debug)]
    struct ScriptedHandle {
        stdout: Option<flume::Receiver<Vec<u8>>>,
        stderr: Option<flume::Receiver<Vec<u8>>>,
        exit_rx: tokio::sync::mpsc::Receiver<AgentExit>,
        interrupts: Arc<AtomicUsize>,
        kills: Arc<AtomicUsize>,
        /// Exit delivered once the process is interrupted or killed.
        stop_tx: Option<tokio::sync::mpsc::Sender<AgentExit>>,
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
            self.interrupts.fetch_add(1, Ordering::SeqCst);
            if let Some(tx) = &self.stop_tx {
                let _ = tx.try_send(AgentExit {
                    exit_code: 130,
                    error: None,
                });
            }
        }

        fn kill(&self) {
            self.kills.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct ScriptedPlugin {
        /// Output chunks written to stdout before exiting.
        chunks: Vec<Vec<u8>>,
        exit: Option<AgentExit>,
        /// When true, the process only exits after interrupt().
        hang: bool,
        interrupts: Arc<AtomicUsize>,
        kills: Arc<AtomicUsize>,
    }

    impl ScriptedPlugin {
        fn exiting(chunks: Vec<Vec<u8>>, exit_code: i32) -> Self {
            Self {
                chunks,
                exit: Some(AgentExit {
                    exit_code,
                    error: None,
                }),
                hang: false,
                interrupts: Arc::new(AtomicUsize::new(0)),
                kills: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn hanging() -> Self {
            Self {
                chunks: vec![b"streaming...\n".to_vec()],
                exit: None,
                hang: true,
                interrupts: Arc::new(AtomicUsize::new(0)),
                kills: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl AgentPlugin for ScriptedPlugin {
        fn meta(&self) -> AgentMeta {
            AgentMeta {
                name: "scripted".into(),
                version: None,
            }
        }

        fn detect(&self) -> DetectResult {
            DetectResult::available()
        }

        fn build_prompt(&self, task: &Task, _session: &Session) -> String {
            format!("Task: {}", task.title)
        }

        async fn execute(
            &self,
            _prompt: &str,
            _cwd: &Path,
        ) -> Result<Box<dyn AgentHandle>, AgentError> {
            let (stdout_tx, stdout_rx) = flume::unbounded();
            let (_stderr_tx, stderr_rx) = flume::unbounded::<Vec<u8>>();
            let (exit_tx, exit_rx) = tokio::sync::mpsc::channel(1);

            for chunk in &self.chunks {
                let _ = stdout_tx.send(chunk.clone());
            }
            drop(stdout_tx);

            let stop_tx = if self.hang {
                Some(exit_tx.clone())
            } else {
                None
            };
            if let Some(exit) = &self.exit {
                let _ = exit_tx.try_send(exit.clone());
            }

            Ok(Box::new(ScriptedHandle {
                stdout: Some(stdout_rx),
                stderr: Some(stderr_rx),
                exit_rx,
                interrupts: Arc::clone(&self.interrupts),
                kills: Arc::clone(&self.kills),
                stop_tx,
            }))
        }
    }

    fn runner(bus: &EventBus, timeout: Duration) -> AgentRunner {
        AgentRunner::new(bus.clone(), timeout, Duration::from_millis(50))
    }

    #[tokio::test]
    async fn successful_run_reports_completed_with_tail() {
        let bus = EventBus::new();
        let rx = bus.subscribe_channel();
        let plugin = ScriptedPlugin::exiting(vec![b"hello from agent\n".to_vec()], 0);

        let result = runner(&bus, Duration::from_secs(5))
            .run(&plugin, "prompt", Path::new("."), &CancelToken::new())
            .await
            .expect("run");

        assert_eq!(result.status, AgentRunStatus::Completed);
        assert_eq!(result.exit_code, 0);
        assert!(result.stdout_tail.contains("hello from agent"));
        assert!(result.error.is_none());

        let outputs: Vec<_> = rx
            .drain()
            .filter(|e| matches!(e, EngineEvent::AgentOutput { .. }))
            .collect();
        assert_eq!(outputs.len(), 1);
    }

    #[tokio::test]
    async fn non_zero_exit_reports_failed() {
        let bus = EventBus::new();
        let plugin = ScriptedPlugin::exiting(vec![], 1);

        let result = runner(&bus, Duration::from_secs(5))
            .run(&plugin, "prompt", Path::new("."), &CancelToken::new())
            .await
            .expect("run");

        assert_eq!(result.status, AgentRunStatus::Failed);
        assert_eq!(result.exit_code, 1);
        assert_eq!(result.error.as_deref(), Some("agent exited with code 1"));
    }

    #[tokio::test]
    async fn timeout_interrupts_and_reports_timed_out() {
        let bus = EventBus::new();
        let plugin = ScriptedPlugin::hanging();
        let interrupts = Arc::clone(&plugin.interrupts);

        let result = runner(&bus, Duration::from_millis(20))
            .run(&plugin, "prompt", Path::new("."), &CancelToken::new())
            .await
            .expect("run");

        assert_eq!(result.status, AgentRunStatus::TimedOut);
        assert_eq!(interrupts.load(Ordering::SeqCst), 1);
        assert!(result.error.as_deref().unwrap_or("").contains("timed out"));
    }

    #[tokio::test]
    async fn cancel_stops_the_run_without_completed() {
        let bus = EventBus::new();
        let plugin = ScriptedPlugin::hanging();
        let cancel = CancelToken::new();

        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel_clone.cancel();
        });

        let result = runner(&bus, Duration::from_secs(30))
            .run(&plugin, "prompt", Path::new("."), &cancel)
            .await
            .expect("run");

        assert_eq!(result.status, AgentRunStatus::Cancelled);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn tail_is_bounded() {
        let bus = EventBus::new();
        let big = vec![b'x'; MAX_TAIL_BYTES * 2];
        let plugin = ScriptedPlugin::exiting(vec![big], 0);

        let result = runner(&bus, Duration::from_secs(5))
            .run(&plugin, "prompt", Path::new("."), &CancelToken::new())
            .await
            .expect("run");

        assert_eq!(result.stdout_tail.len(), MAX_TAIL_BYTES);
    }
}
