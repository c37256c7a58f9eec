//! Agent plugin contract.
//!
//! An agent is an external subprocess that performs work on the repository
//! given a prompt. The engine never inspects prompts or output semantics;
//! it only drives the handle returned by [`AgentPlugin::execute`]. Agents
//! are stateless across invocations.

use std::path::Path;

use async_trait::async_trait;

use ralph_core::session::Session;
use ralph_core::types::Task;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The agent binary is missing or failed its availability probe.
    #[error("agent not available: {0}")]
    NotAvailable(String),
    /// The agent exists but is not ready (e.g. authentication missing).
    #[error("agent not ready: {0}")]
    NotReady(String),
    /// Invalid plugin configuration (unknown model, bad arguments).
    #[error("agent configuration error: {0}")]
    Config(String),
    /// The subprocess could not be spawned.
    #[error("failed to spawn agent: {0}")]
    Spawn(String),
}

impl AgentError {
    /// Errors that can never succeed on retry and must abort the run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AgentError::NotAvailable(_) | AgentError::NotReady(_) | AgentError::Config(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentMeta {
    pub name: String,
    pub version: Option<String>,
}

/// Result of the availability probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectResult {
    pub available: bool,
    pub error: Option<String>,
}

impl DetectResult {
    pub fn available() -> Self {
        Self {
            available: true,
            error: None,
        }
    }

    pub fn unavailable(error: impl Into<String>) -> Self {
        Self {
            available: false,
            error: Some(error.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// AgentExit
// ---------------------------------------------------------------------------

/// Terminal outcome of one agent invocation, reported by the handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentExit {
    /// Process exit code (-1 when the process was killed before exiting).
    pub exit_code: i32,
    /// Plugin-reported error, if any.
    pub error: Option<String>,
}

impl AgentExit {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && self.error.is_none()
    }
}

// ---------------------------------------------------------------------------
// AgentHandle
// ---------------------------------------------------------------------------

/// A handle to one running agent invocation.
///
/// The output receivers are taken once by the runner; the handle then only
/// serves completion and termination. `wait` must be cancel-safe: dropping
/// its future and calling it again later still yields the exit.
#[async_trait]
pub trait AgentHandle: Send + std::fmt::Debug {
    /// Take the stdout chunk stream. Subsequent calls return `None`.
    fn take_stdout(&mut self) -> Option<flume::Receiver<Vec<u8>>>;

    /// Take the stderr chunk stream. Subsequent calls return `None`.
    fn take_stderr(&mut self) -> Option<flume::Receiver<Vec<u8>>>;

    /// Await subprocess completion.
    async fn wait(&mut self) -> AgentExit;

    /// Ask the subprocess to stop gracefully (SIGINT-equivalent).
    fn interrupt(&self);

    /// Terminate the subprocess immediately.
    fn kill(&self);
}

// ---------------------------------------------------------------------------
// AgentPlugin
// ---------------------------------------------------------------------------

/// Adapter for one coding-agent tool.
#[async_trait]
pub trait AgentPlugin: Send + Sync {
    fn meta(&self) -> AgentMeta;

    /// Probe availability (binary on `PATH`, credentials present).
    fn detect(&self) -> DetectResult;

    fn is_ready(&self) -> bool {
        self.detect().available
    }

    /// Build the prompt for a task. The engine supplies the task and the
    /// session context and does not inspect the result.
    fn build_prompt(&self, task: &Task, session: &Session) -> String;

    /// Start one invocation in `cwd` and return its handle.
    async fn execute(
        &self,
        prompt: &str,
        cwd: &Path,
    ) -> Result<Box<dyn AgentHandle>, AgentError>;
}
