use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use ralph_core::config::InterruptConfig;

// ---------------------------------------------------------------------------
// InterruptState
// ---------------------------------------------------------------------------

/// Two-phase interrupt machine: `Idle -> Pending -> (Confirmed | Idle)`.
/// A second interrupt while a decision is pending (or while a graceful
/// shutdown is already committed) escalates to `ForceQuit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptState {
    Idle,
    /// Waiting for the operator to confirm or dismiss within the
    /// double-press window.
    Pending,
    /// Graceful shutdown committed.
    Confirmed,
    /// Immediate termination requested.
    ForceQuit,
}

// ---------------------------------------------------------------------------
// InterruptCallbacks
// ---------------------------------------------------------------------------

type Callback = Box<dyn Fn() + Send + Sync>;

fn noop() -> Callback {
    Box::new(|| {})
}

/// External surface of the coordinator, fixed at construction.
///
/// `on_confirm` commits the graceful shutdown (typically by cancelling the
/// engine's token), `on_force_quit` terminates the process, and the
/// show/hide pair drives a confirmation dialog in interactive front ends.
pub struct InterruptCallbacks {
    pub on_confirm: Callback,
    pub on_cancel: Callback,
    pub on_force_quit: Callback,
    pub on_show_prompt: Callback,
    pub on_hide_prompt: Callback,
}

impl Default for InterruptCallbacks {
    fn default() -> Self {
        Self {
            on_confirm: noop(),
            on_cancel: noop(),
            on_force_quit: noop(),
            on_show_prompt: noop(),
            on_hide_prompt: noop(),
        }
    }
}

impl InterruptCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_confirm(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_confirm = Box::new(f);
        self
    }

    pub fn on_cancel(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_cancel = Box::new(f);
        self
    }

    pub fn on_force_quit(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_force_quit = Box::new(f);
        self
    }

    pub fn on_show_prompt(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_show_prompt = Box::new(f);
        self
    }

    pub fn on_hide_prompt(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_hide_prompt = Box::new(f);
        self
    }
}

// ---------------------------------------------------------------------------
// InterruptCoordinator
// ---------------------------------------------------------------------------

struct Inner {
    state: InterruptState,
    /// Bumped on every transition into `Pending`; lets an expired window
    /// timer recognise that it is acting on a stale prompt.
    generation: u64,
}

/// Signal-driven, debounced two-phase shutdown coordinator.
///
/// Interactive mode: the first interrupt shows a confirmation prompt and
/// arms the double-press window. Confirming commits graceful shutdown;
/// dismissing (or window expiry) resets to idle; a second interrupt while
/// pending force-quits.
///
/// Headless mode: the first interrupt commits to graceful shutdown
/// immediately (the dialog collapses to a log line); a second interrupt
/// still force-quits.
pub struct InterruptCoordinator {
    config: InterruptConfig,
    callbacks: InterruptCallbacks,
    inner: Mutex<Inner>,
}

impl InterruptCoordinator {
    pub fn new(config: InterruptConfig, callbacks: InterruptCallbacks) -> Arc<Self> {
        Arc::new(Self {
            config,
            callbacks,
            inner: Mutex::new(Inner {
                state: InterruptState::Idle,
                generation: 0,
            }),
        })
    }

    pub fn state(&self) -> InterruptState {
        self.inner.lock().expect("interrupt lock poisoned").state
    }

    /// Feed one interrupt (SIGINT or the quit shortcut) into the machine.
    pub fn interrupt(self: &Arc<Self>) {
        let transition = {
            let mut inner = self.inner.lock().expect("interrupt lock poisoned");
            match inner.state {
                InterruptState::Idle => {
                    if self.config.headless {
                        inner.state = InterruptState::Confirmed;
                        Transition::HeadlessConfirm
                    } else {
                        inner.state = InterruptState::Pending;
                        inner.generation += 1;
                        Transition::ShowPrompt(inner.generation)
                    }
                }
                InterruptState::Pending | InterruptState::Confirmed => {
                    inner.state = InterruptState::ForceQuit;
                    Transition::ForceQuit
                }
                InterruptState::ForceQuit => Transition::None,
            }
        };

        // Callbacks run outside the lock; they may re-enter the coordinator.
        match transition {
            Transition::ShowPrompt(generation) => {
                info!("interrupt received, awaiting confirmation");
                (self.callbacks.on_show_prompt)();
                self.arm_window_timer(generation);
            }
            Transition::HeadlessConfirm => {
                info!("interrupt received, committing graceful shutdown");
                (self.callbacks.on_confirm)();
            }
            Transition::ForceQuit => {
                warn!("second interrupt, force quitting");
                (self.callbacks.on_force_quit)();
            }
            Transition::None => {}
        }
    }

    /// Operator confirmed the pending shutdown prompt.
    pub fn confirm(&self) {
        let confirmed = {
            let mut inner = self.inner.lock().expect("interrupt lock poisoned");
            if inner.state == InterruptState::Pending {
                inner.state = InterruptState::Confirmed;
                true
            } else {
                false
            }
        };
        if confirmed {
            (self.callbacks.on_hide_prompt)();
            (self.callbacks.on_confirm)();
        }
    }

    /// Operator dismissed the pending shutdown prompt.
    pub fn dismiss(&self) {
        if self.reset_pending() {
            (self.callbacks.on_hide_prompt)();
            (self.callbacks.on_cancel)();
        }
    }

    fn arm_window_timer(self: &Arc<Self>, generation: u64) {
        let coordinator = Arc::clone(self);
        let window = self.config.double_press_window();
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            coordinator.expire(generation);
        });
    }

    /// Window elapsed without a decision: hide the prompt and reset.
    fn expire(&self, generation: u64) {
        let expired = {
            let mut inner = self.inner.lock().expect("interrupt lock poisoned");
            if inner.state == InterruptState::Pending && inner.generation == generation {
                inner.state = InterruptState::Idle;
                true
            } else {
                false
            }
        };
        if expired {
            info!("interrupt prompt expired");
            (self.callbacks.on_hide_prompt)();
            (self.callbacks.on_cancel)();
        }
    }

    fn reset_pending(&self) -> bool {
        let mut inner = self.inner.lock().expect("interrupt lock poisoned");
        if inner.state == InterruptState::Pending {
            inner.state = InterruptState::Idle;
            true
        } else {
            false
        }
    }
}

enum Transition {
    ShowPrompt(u64),
    HeadlessConfirm,
    ForceQuit,
    None,
}

/// Spawn a task feeding ctrl-c into the coordinator for the process
/// lifetime.
pub fn install_signal_handler(coordinator: Arc<InterruptCoordinator>) {
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                warn!("failed to listen for ctrl-c");
                return;
            }
            coordinator.interrupt();
        }
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
