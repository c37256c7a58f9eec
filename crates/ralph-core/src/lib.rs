//! Core library for ralph -- foundational types, session lifecycle,
//! crash-safe persistence, and the working-directory lock.
//!
//! This crate holds everything the execution engine persists or shares:
//! - Task and iteration result types
//! - The durable `Session` and its lifecycle operations
//! - The atomic on-disk session store
//! - The cooperative single-writer lock file
//! - Engine, retry, and interrupt configuration

pub mod config;
pub mod lockfile;
pub mod session;
pub mod session_store;
pub mod types;

/// Name of the state directory created inside the working directory.
pub const STATE_DIR: &str = ".ralph-tui";
