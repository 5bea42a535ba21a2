//! Per-worker shutdown handshake: `shutdown-request.json` /
//! `shutdown-ack.json`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownRequest {
    pub requested_at: String,
    pub requested_by: String,

    #[serde(flatten)]
    pub unknown_fields: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Accept,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownAck {
    pub status: AckStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub updated_at: String,

    #[serde(flatten)]
    pub unknown_fields: HashMap<String, serde_json::Value>,
}
