//! Execution engine for ralph.
//!
//! The engine owns the loop: each tick delegates to the iteration
//! controller, which drives the agent runner and consults the tracker; the
//! result is folded into the persisted session after every tick. All
//! components emit through the event bus, and the interrupt coordinator and
//! cancel token wrap the whole lifetime.

pub mod agent;
pub mod cancel;
pub mod engine;
pub mod event_bus;
pub mod events;
pub mod interrupt;
pub mod iteration;
pub mod runner;
pub mod tracker;

pub use agent::{AgentError, AgentExit, AgentHandle, AgentMeta, AgentPlugin, DetectResult};
pub use cancel::{CancelToken, SleepOutcome};
pub use engine::{EngineError, EngineHandle, EngineState, ExecutionEngine};
pub use event_bus::{EventBus, SubscriptionId};
pub use events::{EngineEvent, OutputStream, SkipReason};
pub use interrupt::{InterruptCallbacks, InterruptCoordinator, InterruptState};
pub use runner::{AgentResult, AgentRunStatus, AgentRunner};
pub use tracker::{Tracker, TrackerError};
