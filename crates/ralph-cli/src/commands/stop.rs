use std::path::Path;

use anyhow::Result;

use ralph_core::lockfile::LockFile;

use crate::exit_codes;

/// Best-effort stop: read the lock and signal the live holder with SIGINT,
/// which its interrupt coordinator treats as a graceful-shutdown request.
pub fn run(cwd: &Path) -> Result<i32> {
    let Some(holder) = LockFile::read(cwd) else {
        eprintln!("no session lock in {}", cwd.display());
        return Ok(exit_codes::FAILURE);
    };

    if !holder.is_alive() {
        eprintln!(
            "lock names pid {} which is no longer running; nothing to stop",
            holder.pid
        );
        return Ok(exit_codes::FAILURE);
    }

    if signal_interrupt(holder.pid) {
        println!(
            "sent interrupt to pid {} (session {})",
            holder.pid, holder.session_id
        );
        Ok(exit_codes::SUCCESS)
    } else {
        eprintln!("failed to signal pid {}", holder.pid);
        Ok(exit_codes::FAILURE)
    }
}

#[cfg(unix)]
fn signal_interrupt(pid: u32) -> bool {
    // SAFETY: SIGINT to a pid read from the lock file; ESRCH just fails.
    unsafe { libc::kill(pid as i32, libc::SIGINT) == 0 }
}

#[cfg(not(unix))]
fn signal_interrupt(_pid: u32) -> bool {
    false
}
