use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::info;

// ---------------------------------------------------------------------------
// CancelToken -- cooperative cancellation shared through the engine
// ---------------------------------------------------------------------------

/// Broadcast-based cancellation token.
///
/// One token is derived from the interrupt coordinator and handed to every
/// blocking operation in the engine: inter-iteration sleeps, retry backoff,
/// the agent subprocess wait, and persistence. Components either poll
/// [`is_cancelled`] or await [`cancelled`] inside a `select!`.
///
/// Cancellation is one-way and idempotent: once triggered the token stays
/// cancelled for its lifetime.
///
/// [`is_cancelled`]: CancelToken::is_cancelled
/// [`cancelled`]: CancelToken::cancelled
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: broadcast::Sender<()>,
    flag: Arc<AtomicBool>,
}

/// Result of a cancel-aware sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    Elapsed,
    Cancelled,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Trigger cancellation for all holders of this token.
    pub fn cancel(&self) {
        if self
            .flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
        {
            info!("cancellation requested");
            let _ = self.tx.send(());
        }
    }

    /// Check whether cancellation was requested (non-blocking).
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Resolve when cancellation is requested. Returns immediately if the
    /// token is already cancelled.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let mut rx = self.tx.subscribe();
        // Re-check after subscribing to close the race with cancel().
        if self.is_cancelled() {
            return;
        }
        let _ = rx.recv().await;
    }

    /// Sleep for `duration`, waking early if the token is cancelled.
    pub async fn sleep(&self, duration: Duration) -> SleepOutcome {
        tokio::select! {
            _ = self.cancelled() => SleepOutcome::Cancelled,
            _ = tokio::time::sleep(duration) => SleepOutcome::Elapsed,
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
