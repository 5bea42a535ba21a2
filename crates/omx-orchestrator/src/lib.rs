//! Multiplexer adapter, worker bootstrap, monitor loop, shutdown controller
//! and runtime overlay for the omx team orchestrator.
//!
//! This crate is `tokio`-async: suspension happens at file I/O (delegated to
//! the synchronous `omx-core` via `spawn_blocking` at call sites that need
//! it), spawned `tmux` process calls, and timed backoff sleeps. It never
//! stands an in-memory mutex in for cross-process exclusion — that is the
//! filesystem lock `omx-core` already owns.

pub mod adapter;
pub mod assign;
pub mod bootstrap;
pub mod error;
pub mod monitor;
pub mod overlay;
pub mod shutdown;

pub use error::{AdapterError, DispatchError};
