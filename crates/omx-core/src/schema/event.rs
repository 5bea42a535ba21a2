//! Team event log schema: `events/events.ndjson`, one JSON object per line.
//! Extra fields are forbidden here (unlike the rest of the schema) because
//! this log is a fixed, authoritative wire format, not a forward-compatible
//! record.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TaskCompleted,
    WorkerIdle,
    WorkerStopped,
    MessageReceived,
    ShutdownAck,
    ApprovalDecision,
    TeamLeaderNudge,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamEvent {
    pub event_id: String,
    pub team: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub worker: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub created_at: String,
}

/// A caller-supplied event prior to `event_id`/`created_at` assignment.
#[derive(Debug, Clone)]
pub struct NewTeamEvent {
    pub event_type: EventType,
    pub worker: String,
    pub task_id: Option<String>,
    pub message_id: Option<String>,
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_wire_is_snake_case() {
        assert_eq!(
            serde_json::to_string(&EventType::TaskCompleted).unwrap(),
            "\"task_completed\""
        );
        assert_eq!(
            serde_json::to_string(&EventType::WorkerStopped).unwrap(),
            "\"worker_stopped\""
        );
    }

    #[test]
    fn line_has_no_embedded_newlines() {
        let event = TeamEvent {
            event_id: "e1".to_string(),
            team: "alpha".to_string(),
            event_type: EventType::TaskCompleted,
            worker: "worker-1".to_string(),
            task_id: Some("1".to_string()),
            message_id: None,
            reason: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
        };
        let line = serde_json::to_string(&event).unwrap();
        assert!(!line.contains('\n'));
    }
}
