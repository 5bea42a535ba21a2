//! MCP-style tool request handler and session lifecycle hooks.
//!
//! This crate never owns state directly — every operation is a thin wrapper
//! over `omx-core` (state/task/mailbox tools) or `omx-orchestrator` (the
//! runtime overlay used to build a session's instructions file). It stays
//! synchronous like `omx-core`: a tool call is a handful of file reads and
//! writes, not a long-lived operation.

pub mod session;
pub mod tools;

pub use tools::{handle, ToolContent, ToolContext, ToolRequest, ToolResponse};
