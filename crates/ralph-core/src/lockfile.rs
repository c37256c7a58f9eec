//! Cooperative single-writer lock over a working directory.
//!
//! At most one engine may run in a working directory at a time. The lock is
//! a JSON file at `<cwd>/.ralph-tui/lock` naming the holder's pid, session
//! id, acquisition time, and host.
//!
//! ## Race safety
//!
//! `acquire()` uses `O_CREAT | O_EXCL` to atomically create the lock file.
//! If two engines race, exactly one wins the create; the loser reads the
//! winner's metadata and fails with [`LockError::Held`].
//!
//! ## Stale lock recovery
//!
//! A lock whose pid no longer exists on this host is stale and is taken over
//! without `force`. Nothing can release the lock on a force-quit; stale
//! detection on the next start is the recovery path. A lock written by a
//! different host is treated as live, since the pid cannot be probed.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::STATE_DIR;

const LOCK_FILE: &str = "lock";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("working directory is locked by pid {} on {} (session {})", holder.pid, holder.host, holder.session_id)]
    Held { holder: LockFile },
    #[error("lock I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("lock serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// LockFile
// ---------------------------------------------------------------------------

/// Holder metadata written into the lock file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockFile {
    pub pid: u32,
    pub session_id: Uuid,
    pub acquired_at: DateTime<Utc>,
    pub host: String,
}

impl LockFile {
    /// Metadata describing the current process as holder.
    pub fn for_current_process(session_id: Uuid) -> Self {
        Self {
            pid: std::process::id(),
            session_id,
            acquired_at: Utc::now(),
            host: local_host(),
        }
    }

    /// Canonical lock path for a working directory.
    pub fn path_for(cwd: impl AsRef<Path>) -> PathBuf {
        cwd.as_ref().join(STATE_DIR).join(LOCK_FILE)
    }

    /// Read the lock file. Returns `None` if missing or unparseable
    /// (an unparseable lock is treated as stale).
    pub fn read(cwd: impl AsRef<Path>) -> Option<Self> {
        let content = fs::read_to_string(Self::path_for(cwd)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Whether the named holder is still alive.
    ///
    /// Only meaningful for locks written on this host; a foreign host's pid
    /// cannot be probed, so such locks are reported alive.
    pub fn is_alive(&self) -> bool {
        if self.host != local_host() {
            return true;
        }
        pid_alive(self.pid)
    }

    /// Try to acquire the lock for `session_id`.
    ///
    /// A stale lock (dead pid on this host, or unparseable content) is taken
    /// over automatically. A live holder fails with [`LockError::Held`]
    /// unless `force` is set.
    pub fn acquire(
        cwd: impl AsRef<Path>,
        session_id: Uuid,
        force: bool,
    ) -> Result<LockGuard, LockError> {
        let cwd = cwd.as_ref();
        let path = Self::path_for(cwd);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        for attempt in 0..2 {
            match OpenOptions::new()
                .write(true)
                .create_new(true) // O_CREAT | O_EXCL; fails if the file exists
                .open(&path)
            {
                Ok(mut file) => {
                    let holder = Self::for_current_process(session_id);
                    let json = serde_json::to_string_pretty(&holder)?;
                    file.write_all(json.as_bytes())?;
                    file.sync_all()?;
                    info!(pid = holder.pid, %session_id, "lock acquired");
                    return Ok(LockGuard::new(cwd.to_path_buf()));
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    match Self::read(cwd) {
                        Some(existing) if existing.is_alive() && !force => {
                            return Err(LockError::Held { holder: existing });
                        }
                        Some(existing) if existing.is_alive() => {
                            warn!(
                                pid = existing.pid,
                                "forcing takeover of lock held by live process"
                            );
                            Self::release(cwd);
                        }
                        _ => {
                            info!("removing stale lock file");
                            Self::release(cwd);
                        }
                    }
                    if attempt == 1 {
                        // Lost the create race twice in a row.
                        return Err(LockError::Io(std::io::Error::new(
                            std::io::ErrorKind::AlreadyExists,
                            "lock file reappeared after takeover",
                        )));
                    }
                }
                Err(e) => return Err(LockError::Io(e)),
            }
        }
        unreachable!("acquire loop always returns")
    }

    /// Remove the lock file. Idempotent; failures are swallowed (stale-lock
    /// recovery repairs them on the next start).
    pub fn release(cwd: impl AsRef<Path>) {
        let _ = fs::remove_file(Self::path_for(cwd));
    }
}

// ---------------------------------------------------------------------------
// LockGuard
// ---------------------------------------------------------------------------

/// RAII guard that releases the lock on drop (normal exit and unwind).
///
/// Graceful-shutdown paths drop the guard explicitly; a force-quit skips
/// drop entirely and relies on stale detection.
#[derive(Debug)]
pub struct LockGuard {
    cwd: PathBuf,
    released: AtomicBool,
}

impl LockGuard {
    fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            released: AtomicBool::new(false),
        }
    }

    /// Release the lock now. Safe to call more than once.
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            LockFile::release(&self.cwd);
            info!("lock released");
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release();
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn local_host() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Check if a process with the given PID is alive.
#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    // SAFETY: kill with signal 0 checks existence without sending a signal.
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    // On non-Unix platforms, assume alive (avoids accidental takeover).
    true
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
