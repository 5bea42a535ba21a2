//! Core state store and task lifecycle for the omx team orchestrator.
//!
//! This crate is deliberately synchronous: it owns file I/O and directory
//! locks only, no process spawning and no async runtime. It is callable
//! from both a synchronous CLI and an async orchestrator (via
//! `tokio::task::spawn_blocking` at the boundary).

pub mod config;
pub mod error;
pub mod io;
pub mod lifecycle;
pub mod logging;
pub mod mailbox;
pub mod paths;
pub mod schema;
pub mod state;
pub mod tasks;

pub use error::{StateError, StateResult};
pub use paths::StateRoot;
pub use state::StateStore;
