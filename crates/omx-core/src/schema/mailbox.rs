//! Mailbox schema: `mailbox/<worker>.json`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxMessage {
    pub message_id: String,
    pub from_worker: String,
    pub to_worker: String,
    pub body: String,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notified_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<String>,

    #[serde(flatten)]
    pub unknown_fields: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mailbox {
    pub worker: String,
    #[serde(default)]
    pub messages: Vec<MailboxMessage>,
}

impl Mailbox {
    pub fn empty(worker: &str) -> Self {
        Self {
            worker: worker.to_string(),
            messages: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_mailbox_has_no_messages() {
        let mb = Mailbox::empty("worker-1");
        assert_eq!(mb.worker, "worker-1");
        assert!(mb.messages.is_empty());
    }

    #[test]
    fn message_round_trips() {
        let json = r#"{
            "message_id": "m1",
            "from_worker": "worker-1",
            "to_worker": "worker-2",
            "body": "hi",
            "created_at": "2026-01-01T00:00:00Z"
        }"#;
        let msg: MailboxMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.message_id, "m1");
        assert!(msg.notified_at.is_none());
        assert!(msg.delivered_at.is_none());
    }
}
