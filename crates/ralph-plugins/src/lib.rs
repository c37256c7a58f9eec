//! Built-in plugin implementations for ralph.
//!
//! The engine only sees the `AgentPlugin` and `Tracker` contracts; this
//! crate provides the stock implementations the CLI wires up: subprocess
//! adapters for coding-agent CLIs and a JSON-file tracker.

pub mod json_tracker;
pub mod process_agent;

pub use json_tracker::JsonTracker;
pub use process_agent::{ProcessAgent, PromptStyle};
