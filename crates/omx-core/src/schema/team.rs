//! Team config and manifest v2 schema.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Summary entry for a team config's `workers` array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub name: String,
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(flatten)]
    pub unknown_fields: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamConfig {
    pub name: String,
    pub task: String,
    pub agent_type: String,
    pub worker_count: u32,
    pub max_workers: u32,
    #[serde(default)]
    pub workers: Vec<WorkerInfo>,
    pub created_at: String,
    pub tmux_session: String,
    #[serde(default)]
    pub next_task_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader_pane_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hud_pane_id: Option<String>,

    #[serde(flatten)]
    pub unknown_fields: HashMap<String, serde_json::Value>,
}

/// Absolute ceiling on `max_workers`, regardless of any higher configured
/// value (see `CoreConfig::max_workers_ceiling`, which tunes the default but
/// can never exceed this).
pub const MAX_WORKERS_ABSOLUTE_CEILING: u32 = 20;

impl TeamConfig {
    /// `worker_count = |workers| ∧ worker_count ≤ max_workers ≤ 20`.
    pub fn invariants_hold(&self) -> bool {
        self.worker_count as usize == self.workers.len()
            && self.worker_count <= self.max_workers
            && self.max_workers <= MAX_WORKERS_ABSOLUTE_CEILING
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderInfo {
    pub session_id: String,
    pub worker_id: String,
    pub role: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    SplitPane,
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub display_mode: DisplayMode,
    #[serde(default)]
    pub delegation_only: bool,
    #[serde(default)]
    pub plan_approval_required: bool,
    #[serde(default = "default_true")]
    pub nested_teams_allowed: bool,
    #[serde(default = "default_true")]
    pub one_team_per_leader_session: bool,
    #[serde(default = "default_true")]
    pub cleanup_requires_all_workers_inactive: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permissions {
    pub approval_mode: String,
    pub sandbox_mode: String,
    pub network_access: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_version: u32,
    #[serde(flatten)]
    pub config: TeamConfig,
    pub leader: LeaderInfo,
    pub policy: Policy,
    pub permissions_snapshot: Permissions,
}

pub const MANIFEST_SCHEMA_VERSION: u32 = 2;

impl Manifest {
    /// Build a manifest from a freshly created config and the runtime's
    /// captured environment (leader identity and policy gates).
    pub fn from_config(
        config: TeamConfig,
        leader: LeaderInfo,
        policy: Policy,
        permissions_snapshot: Permissions,
    ) -> Self {
        Self {
            schema_version: MANIFEST_SCHEMA_VERSION,
            config,
            leader,
            policy,
            permissions_snapshot,
        }
    }

    /// One-shot migration for a team that only has `config.json`: a legacy
    /// config never recorded leader identity, policy, or the permissions
    /// snapshot, so those are filled with the same defaults `startTeam`
    /// would use for a brand-new team. Idempotent — the caller persists the
    /// result so subsequent reads see `manifest.v2.json` directly.
    pub fn migrate_from_config(config: TeamConfig) -> Self {
        Self {
            schema_version: MANIFEST_SCHEMA_VERSION,
            config,
            leader: LeaderInfo {
                session_id: "unknown".to_string(),
                worker_id: "leader".to_string(),
                role: "leader".to_string(),
            },
            policy: Policy {
                display_mode: DisplayMode::Auto,
                delegation_only: false,
                plan_approval_required: false,
                nested_teams_allowed: true,
                one_team_per_leader_session: true,
                cleanup_requires_all_workers_inactive: true,
            },
            permissions_snapshot: Permissions {
                approval_mode: "unknown".to_string(),
                sandbox_mode: "unknown".to_string(),
                network_access: true,
            },
        }
    }
}
