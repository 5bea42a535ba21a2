//! Path and name policy: team-name sanitization and canonical path
//! construction under the state root.
//!
//! `StateRoot` is the only thing in this crate allowed to build a path from a
//! raw string; every other module takes a `&StateRoot` plus an
//! already-sanitized name.

use crate::error::{StateError, StateResult};
use std::path::{Path, PathBuf};

/// `<project>/.omx/state`, validated to exist as a directory (created on
/// first use).
#[derive(Debug, Clone)]
pub struct StateRoot {
    root: PathBuf,
}

impl StateRoot {
    /// Resolve the state root under `project_root`, creating it if absent.
    pub fn new(project_root: &Path) -> StateResult<Self> {
        let root = project_root.join(".omx").join("state");
        std::fs::create_dir_all(&root).map_err(|source| StateError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    /// Wrap an already-resolved `.omx/state` directory without touching the
    /// filesystem (used by ancestor-walk resolution in the tool surface).
    pub fn from_existing(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_state_file(&self, mode: &str) -> PathBuf {
        self.root.join(format!("{mode}-state.json"))
    }

    pub fn scoped_session_state_file(&self, session_id: &str, mode: &str) -> PathBuf {
        self.root
            .join("sessions")
            .join(session_id)
            .join(format!("{mode}-state.json"))
    }

    pub fn session_json(&self) -> PathBuf {
        self.root.join("session.json")
    }

    pub fn overlay_lock(&self) -> PathBuf {
        self.root.join("agents-md.lock")
    }

    pub fn team_dir(&self, team: &str) -> PathBuf {
        self.root.join("team").join(team)
    }

    pub fn team_config(&self, team: &str) -> PathBuf {
        self.team_dir(team).join("config.json")
    }

    pub fn team_manifest(&self, team: &str) -> PathBuf {
        self.team_dir(team).join("manifest.v2.json")
    }

    pub fn team_monitor_snapshot(&self, team: &str) -> PathBuf {
        self.team_dir(team).join("monitor-snapshot.json")
    }

    pub fn team_summary_snapshot(&self, team: &str) -> PathBuf {
        self.team_dir(team).join("summary-snapshot.json")
    }

    pub fn team_create_task_lock(&self, team: &str) -> PathBuf {
        self.team_dir(team).join(".lock.create-task")
    }

    pub fn workers_dir(&self, team: &str) -> PathBuf {
        self.team_dir(team).join("workers")
    }

    pub fn worker_dir(&self, team: &str, worker: &str) -> PathBuf {
        self.workers_dir(team).join(worker)
    }

    pub fn worker_identity(&self, team: &str, worker: &str) -> PathBuf {
        self.worker_dir(team, worker).join("identity.json")
    }

    pub fn worker_heartbeat(&self, team: &str, worker: &str) -> PathBuf {
        self.worker_dir(team, worker).join("heartbeat.json")
    }

    pub fn worker_status(&self, team: &str, worker: &str) -> PathBuf {
        self.worker_dir(team, worker).join("status.json")
    }

    pub fn worker_inbox(&self, team: &str, worker: &str) -> PathBuf {
        self.worker_dir(team, worker).join("inbox.md")
    }

    pub fn worker_shutdown_request(&self, team: &str, worker: &str) -> PathBuf {
        self.worker_dir(team, worker).join("shutdown-request.json")
    }

    pub fn worker_shutdown_ack(&self, team: &str, worker: &str) -> PathBuf {
        self.worker_dir(team, worker).join("shutdown-ack.json")
    }

    pub fn tasks_dir(&self, team: &str) -> PathBuf {
        self.team_dir(team).join("tasks")
    }

    pub fn task_file(&self, team: &str, id: &str) -> PathBuf {
        self.tasks_dir(team).join(format!("task-{id}.json"))
    }

    pub fn claims_dir(&self, team: &str) -> PathBuf {
        self.team_dir(team).join("claims")
    }

    pub fn task_claim_lock(&self, team: &str, id: &str) -> PathBuf {
        self.claims_dir(team).join(format!("task-{id}.lock"))
    }

    pub fn mailbox_dir(&self, team: &str) -> PathBuf {
        self.team_dir(team).join("mailbox")
    }

    pub fn mailbox_file(&self, team: &str, worker: &str) -> PathBuf {
        self.mailbox_dir(team).join(format!("{worker}.json"))
    }

    pub fn mailbox_lock(&self, team: &str, worker: &str) -> PathBuf {
        self.mailbox_dir(team).join(format!(".lock-{worker}"))
    }

    pub fn events_dir(&self, team: &str) -> PathBuf {
        self.team_dir(team).join("events")
    }

    pub fn events_log(&self, team: &str) -> PathBuf {
        self.events_dir(team).join("events.ndjson")
    }

    pub fn approvals_dir(&self, team: &str) -> PathBuf {
        self.team_dir(team).join("approvals")
    }

    pub fn approval_file(&self, team: &str, task_id: &str) -> PathBuf {
        self.approvals_dir(team).join(format!("task-{task_id}.json"))
    }
}

/// Validate a team name used as a filesystem path component:
/// `^[a-z0-9][a-z0-9-]{0,29}$`.
pub fn sanitize_team_name(name: &str) -> StateResult<String> {
    let valid = {
        let mut chars = name.chars();
        let first_ok = chars
            .next()
            .map(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
            .unwrap_or(false);
        let len_ok = name.len() <= 30 && !name.is_empty();
        let rest_ok = name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        first_ok && len_ok && rest_ok
    };
    if valid {
        Ok(name.to_string())
    } else {
        Err(StateError::InvalidTeamName {
            name: name.to_string(),
        })
    }
}

/// Sanitize an inbound external name (worker name, mixed-case identifier)
/// into a safe path component: lowercase, collapse non-alphanumeric runs to
/// a single hyphen, trim leading/trailing hyphens, truncate to 30 chars.
/// An empty result is an error.
pub fn sanitize_external_name(name: &str) -> StateResult<String> {
    let lowered = name.to_ascii_lowercase();
    let mut collapsed = String::with_capacity(lowered.len());
    let mut last_was_hyphen = false;
    for c in lowered.chars() {
        if c.is_ascii_alphanumeric() {
            collapsed.push(c);
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            collapsed.push('-');
            last_was_hyphen = true;
        }
    }
    let trimmed = collapsed.trim_matches('-');
    let truncated: String = trimmed.chars().take(30).collect();
    let truncated = truncated.trim_end_matches('-');
    if truncated.is_empty() {
        Err(StateError::InvalidTeamName {
            name: name.to_string(),
        })
    } else {
        Ok(truncated.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_team_names() {
        assert!(sanitize_team_name("alpha").is_ok());
        assert!(sanitize_team_name("a1-b2").is_ok());
        assert!(sanitize_team_name("a").is_ok());
    }

    #[test]
    fn rejects_invalid_team_names() {
        assert!(sanitize_team_name("Alpha").is_err());
        assert!(sanitize_team_name("-alpha").is_err());
        assert!(sanitize_team_name("").is_err());
        assert!(sanitize_team_name(&"a".repeat(31)).is_err());
        assert!(sanitize_team_name("alpha_beta").is_err());
    }

    #[test]
    fn sanitizes_external_names() {
        assert_eq!(sanitize_external_name("Worker One!!").unwrap(), "worker-one");
        assert_eq!(sanitize_external_name("  --Foo--  ").unwrap(), "foo");
        assert_eq!(
            sanitize_external_name(&"x".repeat(40)).unwrap().len(),
            30
        );
    }

    #[test]
    fn rejects_empty_after_sanitization() {
        assert!(sanitize_external_name("!!!").is_err());
        assert!(sanitize_external_name("").is_err());
    }

    #[test]
    fn path_builders_are_stable() {
        let dir = tempfile::tempdir().unwrap();
        let root = StateRoot::new(dir.path()).unwrap();
        assert_eq!(
            root.task_file("alpha", "1"),
            root.team_dir("alpha").join("tasks").join("task-1.json")
        );
        assert_eq!(
            root.task_claim_lock("alpha", "1"),
            root.team_dir("alpha").join("claims").join("task-1.lock")
        );
    }
}
