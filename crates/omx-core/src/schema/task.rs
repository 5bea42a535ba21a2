//! Task and claim schema.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Blocked,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "blocked" => Some(Self::Blocked),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Blocked => "blocked",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Optimistic-lock record on a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub owner: String,
    pub token: String,
    pub leased_until: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub subject: String,
    pub description: String,
    pub status: TaskStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_code_change: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Canonical dependency field. `blocked_by` is accepted as a read alias
    /// (see [`Task::dependencies`]) but never written.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_by: Vec<String>,

    pub version: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim: Option<Claim>,

    pub created_at: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,

    #[serde(flatten)]
    pub unknown_fields: HashMap<String, serde_json::Value>,
}

impl Task {
    /// The canonicalized dependency list: `depends_on` if non-empty, else
    /// the legacy `blocked_by` alias.
    pub fn dependencies(&self) -> &[String] {
        if !self.depends_on.is_empty() {
            &self.depends_on
        } else {
            &self.blocked_by
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_wire_round_trips() {
        for s in [
            TaskStatus::Pending,
            TaskStatus::Blocked,
            TaskStatus::InProgress,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            let wire = s.as_wire();
            assert_eq!(TaskStatus::from_wire(wire), Some(s));
        }
    }

    #[test]
    fn terminal_set_is_completed_and_failed() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Blocked.is_terminal());
        assert!(!TaskStatus::InProgress.is_terminal());
    }

    #[test]
    fn round_trips_minimal_task() {
        let json = r#"{
            "id": "1",
            "subject": "s",
            "description": "d",
            "status": "pending",
            "version": 1,
            "created_at": "2026-01-01T00:00:00Z"
        }"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.id, "1");
        assert_eq!(task.version, 1);
        assert!(task.depends_on.is_empty());
    }

    #[test]
    fn blocked_by_alias_accepted_on_read() {
        let json = r#"{
            "id": "2",
            "subject": "s",
            "description": "d",
            "status": "blocked",
            "version": 1,
            "created_at": "2026-01-01T00:00:00Z",
            "blocked_by": ["1"]
        }"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.dependencies(), &["1".to_string()]);
    }

    #[test]
    fn unknown_fields_round_trip() {
        let json = r#"{
            "id": "1",
            "subject": "s",
            "description": "d",
            "status": "pending",
            "version": 1,
            "created_at": "2026-01-01T00:00:00Z",
            "futureField": "kept"
        }"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(
            task.unknown_fields.get("futureField").and_then(|v| v.as_str()),
            Some("kept")
        );
        let back = serde_json::to_value(&task).unwrap();
        assert_eq!(back["futureField"], "kept");
    }
}
