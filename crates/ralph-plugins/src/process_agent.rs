//! Subprocess adapter for coding-agent CLIs.
//!
//! Each constructor knows the command-line conventions of its CLI tool:
//!
//! - **Claude**: `claude --dangerously-skip-permissions -p <prompt>`
//! - **Codex**: `codex --approval-mode full-auto -q <prompt>`
//! - **Custom**: any binary, prompt passed as the last argument or on stdin
//!
//! The spawned process gets piped stdio; stdout and stderr are pumped into
//! flume channels chunk by chunk so the runner can stream them onto the
//! event bus while the process works.

use std::path::Path;
use std::process::Stdio;
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use ralph_core::session::Session;
use ralph_core::types::Task;
use ralph_engine::{AgentError, AgentExit, AgentHandle, AgentMeta, AgentPlugin, DetectResult};

const READ_CHUNK_BYTES: usize = 8192;

// ---------------------------------------------------------------------------
// PromptStyle
// ---------------------------------------------------------------------------

/// How the prompt reaches the agent process.
#[derive(Debug, Clone)]
pub enum PromptStyle {
    /// Appended after a flag, e.g. `-p <prompt>`.
    Flag(&'static str),
    /// Appended as the final positional argument.
    Arg,
    /// Written to the process stdin, then stdin is closed.
    Stdin,
}

// ---------------------------------------------------------------------------
// ProcessAgent
// ---------------------------------------------------------------------------

/// Agent plugin that spawns a coding-agent CLI as a child process.
pub struct ProcessAgent {
    name: String,
    binary: String,
    base_args: Vec<String>,
    prompt_style: PromptStyle,
    model: Option<String>,
    model_flag: Option<&'static str>,
}

impl ProcessAgent {
    /// Anthropic's Claude CLI.
    pub fn claude(model: Option<String>) -> Self {
        Self {
            name: "claude".into(),
            binary: "claude".into(),
            base_args: vec!["--dangerously-skip-permissions".into()],
            prompt_style: PromptStyle::Flag("-p"),
            model,
            model_flag: Some("--model"),
        }
    }

    /// OpenAI's Codex CLI.
    pub fn codex(model: Option<String>) -> Self {
        Self {
            name: "codex".into(),
            binary: "codex".into(),
            base_args: vec!["--approval-mode".into(), "full-auto".into(), "-q".into()],
            prompt_style: PromptStyle::Arg,
            model,
            model_flag: Some("--model"),
        }
    }

    /// Arbitrary command; the prompt is the last argument.
    pub fn command(binary: impl Into<String>, base_args: Vec<String>) -> Self {
        let binary = binary.into();
        Self {
            name: binary.clone(),
            binary,
            base_args,
            prompt_style: PromptStyle::Arg,
            model: None,
            model_flag: None,
        }
    }

    /// Override how the prompt is delivered.
    pub fn with_prompt_style(mut self, style: PromptStyle) -> Self {
        self.prompt_style = style;
        self
    }

    /// Whether `binary` resolves on `PATH` (or is an existing path).
    fn binary_on_path(&self) -> bool {
        let candidate = Path::new(&self.binary);
        if candidate.components().count() > 1 {
            return candidate.exists();
        }
        let Some(paths) = std::env::var_os("PATH") else {
            return false;
        };
        std::env::split_paths(&paths).any(|dir| dir.join(&self.binary).is_file())
    }
}

#[async_trait]
impl AgentPlugin for ProcessAgent {
    fn meta(&self) -> AgentMeta {
        AgentMeta {
            name: self.name.clone(),
            version: None,
        }
    }

    fn detect(&self) -> DetectResult {
        if self.binary_on_path() {
            DetectResult::available()
        } else {
            DetectResult::unavailable(format!("`{}` not found on PATH", self.binary))
        }
    }

    fn build_prompt(&self, task: &Task, session: &Session) -> String {
        let mut prompt = format!(
            "Task: {}\nTask id: {}\n\nWork on exactly this task in the current repository. \
             When the work is done, mark the task completed in the tracker.",
            task.title, task.id,
        );
        if let Some(epic) = &session.epic_id {
            prompt.push_str(&format!("\nEpic: {epic}"));
        }
        if let Some(prd) = &session.prd_path {
            prompt.push_str(&format!("\nProduct requirements: {prd}"));
        }
        prompt
    }

    async fn execute(
        &self,
        prompt: &str,
        cwd: &Path,
    ) -> Result<Box<dyn AgentHandle>, AgentError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(&self.base_args);
        if let (Some(flag), Some(model)) = (self.model_flag, &self.model) {
            cmd.arg(flag).arg(model);
        }
        match &self.prompt_style {
            PromptStyle::Flag(flag) => {
                cmd.arg(flag).arg(prompt);
                cmd.stdin(Stdio::null());
            }
            PromptStyle::Arg => {
                cmd.arg(prompt);
                cmd.stdin(Stdio::null());
            }
            PromptStyle::Stdin => {
                cmd.stdin(Stdio::piped());
            }
        }
        cmd.current_dir(cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AgentError::NotAvailable(format!("`{}` not found: {e}", self.binary))
            } else {
                AgentError::Spawn(e.to_string())
            }
        })?;

        let pid = child
            .id()
            .ok_or_else(|| AgentError::Spawn("child exited before handle setup".into()))?;
        debug!(pid, binary = %self.binary, "agent process spawned");

        if let PromptStyle::Stdin = self.prompt_style {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| AgentError::Spawn("stdin was not piped".into()))?;
            let payload = prompt.as_bytes().to_vec();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&payload).await {
                    warn!(error = %e, "failed to write prompt to agent stdin");
                }
                // Dropping stdin closes the pipe and signals end of input.
            });
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Spawn("stdout was not piped".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AgentError::Spawn("stderr was not piped".into()))?;

        let (stdout_tx, stdout_rx) = flume::unbounded();
        let (stderr_tx, stderr_rx) = flume::unbounded();
        tokio::spawn(pump_stream(stdout, stdout_tx));
        tokio::spawn(pump_stream(stderr, stderr_tx));

        let (exit_tx, exit_rx) = tokio::sync::mpsc::channel(1);
        tokio::spawn(async move {
            let exit = match child.wait().await {
                Ok(status) => AgentExit {
                    exit_code: status.code().unwrap_or(-1),
                    error: None,
                },
                Err(e) => AgentExit {
                    exit_code: -1,
                    error: Some(format!("wait failed: {e}")),
                },
            };
            let _ = exit_tx.send(exit).await;
        });

        Ok(Box::new(ProcessHandle {
            pid,
            stdout: Some(stdout_rx),
            stderr: Some(stderr_rx),
            exit_rx,
            last_exit: None,
        }))
    }
}

/// Read a child stream in chunks and forward them until EOF.
async fn pump_stream<R>(mut reader: R, tx: flume::Sender<Vec<u8>>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut chunk = [0u8; READ_CHUNK_BYTES];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if tx.send(chunk[..n].to_vec()).is_err() {
                    break;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ProcessHandle
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ProcessHandle {
    pid: u32,
    stdout: Option<flume::Receiver<Vec<u8>>>,
    stderr: Option<flume::Receiver<Vec<u8>>>,
    exit_rx: tokio::sync::mpsc::Receiver<AgentExit>,
    /// Cached exit so repeated waits after completion stay consistent.
    last_exit: Option<AgentExit>,
}

#[async_trait]
impl AgentHandle for ProcessHandle {
    fn take_stdout(&mut self) -> Option<flume::Receiver<Vec<u8>>> {
        self.stdout.take()
    }

    fn take_stderr(&mut self) -> Option<flume::Receiver<Vec<u8>>> {
        self.stderr.take()
    }

    async fn wait(&mut self) -> AgentExit {
        if let Some(exit) = &self.last_exit {
            return exit.clone();
        }
        let exit = self.exit_rx.recv().await.unwrap_or(AgentExit {
            exit_code: -1,
            error: None,
        });
        self.last_exit = Some(exit.clone());
        exit
    }

    fn interrupt(&self) {
        signal_process(self.pid, Signal::Interrupt);
    }

    fn kill(&self) {
        signal_process(self.pid, Signal::Kill);
    }
}

enum Signal {
    Interrupt,
    Kill,
}

#[cfg(unix)]
fn signal_process(pid: u32, signal: Signal) {
    let sig = match signal {
        Signal::Interrupt => libc::SIGINT,
        Signal::Kill => libc::SIGKILL,
    };
    // SAFETY: sending a signal to a pid we spawned; a dead pid returns ESRCH.
    unsafe {
        libc::kill(pid as i32, sig);
    }
}

#[cfg(not(unix))]
fn signal_process(pid: u32, _signal: Signal) {
    warn!(pid, "process signalling not supported on this platform");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
