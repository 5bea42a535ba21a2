//! Worker identity, heartbeat and status schema.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerIdentity {
    pub name: String,
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assigned_tasks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pane_id: Option<String>,

    #[serde(flatten)]
    pub unknown_fields: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub pid: u32,
    pub last_turn_at: String,
    pub turn_count: u64,
    pub alive: bool,

    #[serde(flatten)]
    pub unknown_fields: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Working,
    Blocked,
    Done,
    Failed,
    Unknown,
}

impl WorkerState {
    pub fn as_wire_string(&self) -> String {
        match self {
            Self::Idle => "idle",
            Self::Working => "working",
            Self::Blocked => "blocked",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
        .to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub state: WorkerState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub updated_at: String,

    #[serde(flatten)]
    pub unknown_fields: HashMap<String, serde_json::Value>,
}

impl WorkerStatus {
    /// The contract for a missing status file: `{state: unknown, updated_at: now}`.
    pub fn missing(now: &str) -> Self {
        Self {
            state: WorkerState::Unknown,
            current_task_id: None,
            reason: None,
            updated_at: now.to_string(),
            unknown_fields: HashMap::new(),
        }
    }
}
