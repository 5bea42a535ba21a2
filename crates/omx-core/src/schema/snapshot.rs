//! Monitor diff basis: `monitor-snapshot.json` and `summary-snapshot.json`.
//! Neither is authoritative state; both are rewritten every monitor cycle.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorSnapshot {
    #[serde(default)]
    pub task_status_by_id: HashMap<String, String>,
    #[serde(default)]
    pub worker_alive_by_name: HashMap<String, bool>,
    #[serde(default)]
    pub worker_state_by_name: HashMap<String, String>,
    #[serde(default)]
    pub worker_turn_count_by_name: HashMap<String, u64>,
    #[serde(default)]
    pub worker_task_id_by_name: HashMap<String, Option<String>>,
    #[serde(default)]
    pub mailbox_notified_by_message_id: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummarySnapshot {
    #[serde(default)]
    pub turns_without_progress_by_name: HashMap<String, u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_snapshots_are_empty() {
        let snap = MonitorSnapshot::default();
        assert!(snap.task_status_by_id.is_empty());
        assert!(snap.worker_alive_by_name.is_empty());
    }
}
