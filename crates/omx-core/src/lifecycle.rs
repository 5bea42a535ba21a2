//! Team lifecycle: atomic creation of the full per-team directory tree
//! (config, manifest, worker identity skeletons, initial tasks) before any
//! pane is spawned, and recursive teardown.

use crate::config::RuntimeEnv;
use crate::error::{StateError, StateResult};
use crate::schema::{
    DisplayMode, LeaderInfo, Manifest, Permissions, Policy, TeamConfig, WorkerIdentity, WorkerInfo,
    MAX_WORKERS_ABSOLUTE_CEILING,
};
use crate::state::StateStore;
use crate::paths::sanitize_team_name;

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Caller-supplied parameters for `startTeam`.
#[derive(Debug, Clone)]
pub struct StartTeamRequest {
    pub team: String,
    pub task: String,
    pub agent_type: String,
    pub worker_count: u32,
    pub max_workers: u32,
    pub tmux_session: String,
    pub leader_pane_id: Option<String>,
    pub hud_pane_id: Option<String>,
    pub leader: LeaderInfo,
    pub delegation_only: bool,
    pub plan_approval_required: bool,
}

/// Materialize a new team's state atomically: directory tree, config,
/// manifest, and one worker identity skeleton per `worker_count`. If a team
/// of this name already exists, fails with `leader_session_conflict` when
/// `one_team_per_leader_session` would be violated is left to the caller
/// (the manifest policy is recorded here; enforcement is the orchestrator's
/// responsibility since only it knows the current process's session).
pub fn start_team(store: &StateStore, env: &RuntimeEnv, req: StartTeamRequest) -> StateResult<Manifest> {
    if env.is_worker() {
        return Err(StateError::NestedTeamDisallowed);
    }

    let team = sanitize_team_name(&req.team)?;

    if req.max_workers > MAX_WORKERS_ABSOLUTE_CEILING || req.worker_count > req.max_workers {
        return Err(StateError::InvalidStatus {
            status: format!(
                "worker_count={} max_workers={} exceeds ceiling {}",
                req.worker_count, req.max_workers, MAX_WORKERS_ABSOLUTE_CEILING
            ),
        });
    }

    let workers: Vec<WorkerInfo> = (1..=req.worker_count)
        .map(|i| WorkerInfo {
            name: format!("worker-{i}"),
            index: i,
            role: None,
            unknown_fields: Default::default(),
        })
        .collect();

    let config = TeamConfig {
        name: team.clone(),
        task: req.task,
        agent_type: req.agent_type,
        worker_count: req.worker_count,
        max_workers: req.max_workers,
        workers: workers.clone(),
        created_at: now_rfc3339(),
        tmux_session: req.tmux_session,
        next_task_id: 1,
        leader_pane_id: req.leader_pane_id,
        hud_pane_id: req.hud_pane_id,
        unknown_fields: Default::default(),
    };

    let display_mode = match env.display_mode {
        crate::config::DisplayMode::SplitPane => DisplayMode::SplitPane,
        crate::config::DisplayMode::Auto => DisplayMode::Auto,
    };

    let manifest = Manifest::from_config(
        config,
        req.leader,
        Policy {
            display_mode,
            delegation_only: req.delegation_only,
            plan_approval_required: req.plan_approval_required,
            nested_teams_allowed: true,
            one_team_per_leader_session: true,
            cleanup_requires_all_workers_inactive: true,
        },
        Permissions {
            approval_mode: env.approval_mode.clone(),
            sandbox_mode: env.sandbox_mode.clone(),
            network_access: env.network_access,
        },
    );

    store.write_manifest(&team, &manifest)?;

    for worker in &workers {
        let identity = WorkerIdentity {
            name: worker.name.clone(),
            index: worker.index,
            role: worker.role.clone(),
            assigned_tasks: Vec::new(),
            pid: None,
            pane_id: None,
            unknown_fields: Default::default(),
        };
        store.write_worker_identity(&team, &worker.name, &identity)?;
    }

    Ok(manifest)
}

/// `shutdownTeam`'s final step: recursively remove the team directory.
/// Best-effort; a missing directory is not an error.
pub fn destroy_team(store: &StateStore, team: &str) -> StateResult<()> {
    let dir = store.root().team_dir(team);
    match std::fs::remove_dir_all(&dir) {
        Ok(()) => Ok(()),
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(StateError::Io { path: dir, source }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::StateRoot;
    use crate::config::{LockConfig, RuntimeEnv, SendStrategy, DisplayMode as EnvDisplayMode};

    fn env() -> RuntimeEnv {
        RuntimeEnv {
            team_worker: None,
            ready_timeout_ms: 45_000,
            skip_ready_wait: true,
            mouse_enabled: true,
            send_strategy: SendStrategy::Auto,
            strict_submit: false,
            auto_trust: true,
            all_idle_cooldown_ms: 500,
            session_id: Some("s1".to_string()),
            display_mode: EnvDisplayMode::Auto,
            approval_mode: "unknown".to_string(),
            sandbox_mode: "unknown".to_string(),
            network_access: true,
        }
    }

    fn leader() -> LeaderInfo {
        LeaderInfo {
            session_id: "s1".to_string(),
            worker_id: "leader".to_string(),
            role: "leader".to_string(),
        }
    }

    #[test]
    fn start_team_materializes_config_manifest_and_workers() {
        let dir = tempfile::tempdir().unwrap();
        let root = StateRoot::new(dir.path()).unwrap();
        let store = StateStore::new(root, LockConfig::default());

        let manifest = start_team(
            &store,
            &env(),
            StartTeamRequest {
                team: "alpha".to_string(),
                task: "ship it".to_string(),
                agent_type: "codex".to_string(),
                worker_count: 3,
                max_workers: 5,
                tmux_session: "omx-alpha".to_string(),
                leader_pane_id: Some("%0".to_string()),
                hud_pane_id: None,
                leader: leader(),
                delegation_only: false,
                plan_approval_required: false,
            },
        )
        .unwrap();

        assert_eq!(manifest.config.workers.len(), 3);
        assert_eq!(manifest.schema_version, 2);
        assert!(store.read_config("alpha").unwrap().is_some());
        for i in 1..=3 {
            let name = format!("worker-{i}");
            assert!(store.read_worker_identity("alpha", &name).unwrap().is_some());
        }
    }

    #[test]
    fn worker_process_cannot_start_nested_team() {
        let dir = tempfile::tempdir().unwrap();
        let root = StateRoot::new(dir.path()).unwrap();
        let store = StateStore::new(root, LockConfig::default());
        let mut worker_env = env();
        worker_env.team_worker = Some("alpha/worker-1".to_string());

        let err = start_team(
            &store,
            &worker_env,
            StartTeamRequest {
                team: "beta".to_string(),
                task: "t".to_string(),
                agent_type: "codex".to_string(),
                worker_count: 1,
                max_workers: 2,
                tmux_session: "omx-beta".to_string(),
                leader_pane_id: None,
                hud_pane_id: None,
                leader: leader(),
                delegation_only: false,
                plan_approval_required: false,
            },
        )
        .unwrap_err();
        assert!(matches!(err, StateError::NestedTeamDisallowed));
    }

    #[test]
    fn destroy_team_removes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = StateRoot::new(dir.path()).unwrap();
        let store = StateStore::new(root, LockConfig::default());
        start_team(
            &store,
            &env(),
            StartTeamRequest {
                team: "gamma".to_string(),
                task: "t".to_string(),
                agent_type: "codex".to_string(),
                worker_count: 1,
                max_workers: 2,
                tmux_session: "omx-gamma".to_string(),
                leader_pane_id: None,
                hud_pane_id: None,
                leader: leader(),
                delegation_only: false,
                plan_approval_required: false,
            },
        )
        .unwrap();
        destroy_team(&store, "gamma").unwrap();
        assert!(store.read_config("gamma").unwrap().is_none());
    }

    #[test]
    fn destroy_team_on_missing_team_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let root = StateRoot::new(dir.path()).unwrap();
        let store = StateStore::new(root, LockConfig::default());
        destroy_team(&store, "nonexistent").unwrap();
    }
}
