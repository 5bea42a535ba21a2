//! `shutdownTeam`: per-worker shutdown handshake, bounded ack wait, forced
//! pane termination, and best-effort teardown.

use crate::adapter::guard::ProtectedPanes;
use crate::adapter::MultiplexerAdapter;
use crate::bootstrap::{self, DispatchOptions};
use omx_core::config::LockConfig;
use omx_core::schema::{AckStatus, EventType, NewTeamEvent, ShutdownAck, ShutdownRequest};
use omx_core::{lifecycle, StateError, StateResult, StateStore};
use std::time::{Duration, Instant};

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(15);
const POLL_INTERVAL: Duration = Duration::from_millis(250);

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Outcome of `shutdownTeam`: which workers acknowledged, which rejected,
/// and which never acknowledged before the deadline and were force-killed.
#[derive(Debug, Clone, Default)]
pub struct ShutdownReport {
    pub accepted: Vec<String>,
    pub rejected: Vec<(String, String)>,
    pub force_killed: Vec<String>,
}

/// `shutdownTeam(team, {force})`. A missing team config is a best-effort
/// no-op success (state may already be torn down).
pub async fn shutdown_team(
    store: &StateStore,
    locks: &LockConfig,
    adapter: &dyn MultiplexerAdapter,
    requested_by: &str,
    team: &str,
    force: bool,
) -> StateResult<ShutdownReport> {
    let Some(config) = store.read_config(team)? else {
        let _ = lifecycle::destroy_team(store, team);
        return Ok(ShutdownReport::default());
    };

    let protected = ProtectedPanes {
        leader_pane_id: config.leader_pane_id.clone(),
        hud_pane_id: config.hud_pane_id.clone(),
    };

    let requested_at = now_rfc3339();
    let opts = DispatchOptions {
        ready_timeout: Duration::from_secs(1),
        skip_ready_wait: true,
        send_strategy: omx_core::config::SendStrategy::Auto,
        auto_trust: false,
    };

    let mut pending: Vec<String> = Vec::new();
    for worker in &config.workers {
        store.write_shutdown_request(
            team,
            &worker.name,
            &ShutdownRequest {
                requested_at: requested_at.clone(),
                requested_by: requested_by.to_string(),
                unknown_fields: Default::default(),
            },
        )?;

        let pane_id = store
            .read_worker_identity(team, &worker.name)?
            .and_then(|i| i.pane_id);

        if let Some(pane_id) = &pane_id {
            let inbox = format!(
                "# Shutdown requested\n\nWrite `shutdown-ack.json` with `{{\"status\": \"accept\"}}` (or `\"reject\"` with a `reason`) then exit.\n"
            );
            // Shutdown delivery is best-effort: a worker that never notices
            // the trigger is simply force-killed once the deadline passes.
            let _ = bootstrap::dispatch(store, adapter, team, &worker.name, pane_id, &inbox, false, &opts).await;
        }

        pending.push(worker.name.clone());
    }

    let mut report = ShutdownReport::default();
    let deadline = Instant::now() + SHUTDOWN_DEADLINE;
    loop {
        pending.retain(|worker| {
            let Ok(Some(ack)) = store.read_shutdown_ack(team, worker) else {
                return true;
            };
            if !is_fresh(&ack.updated_at, &requested_at) {
                return true;
            }
            record_ack(store, team, worker, &ack, &mut report).ok();
            false
        });

        if pending.is_empty() || Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    if !report.rejected.is_empty() && !force {
        let detail = report
            .rejected
            .iter()
            .map(|(w, r)| format!("{w}:{r}"))
            .collect::<Vec<_>>()
            .join(",");
        return Err(StateError::ShutdownRejected {
            worker: detail.clone(),
            reason: detail,
        });
    }

    // Anything still pending after the deadline (no ack at all, or still
    // alive despite an accept) is force-killed, modulo the leader/HUD guard.
    for worker in &pending {
        if let Some(pane_id) = store.read_worker_identity(team, worker)?.and_then(|i| i.pane_id) {
            if protected.guard_kill(&pane_id).is_ok() && adapter.kill_pane(&pane_id).await.is_ok() {
                report.force_killed.push(worker.clone());
            }
        }
    }

    lifecycle::destroy_team(store, team)?;

    Ok(report)
}

fn is_fresh(ack_updated_at: &str, requested_at: &str) -> bool {
    match (
        chrono::DateTime::parse_from_rfc3339(ack_updated_at),
        chrono::DateTime::parse_from_rfc3339(requested_at),
    ) {
        (Ok(ack), Ok(req)) => ack >= req,
        _ => true,
    }
}

fn record_ack(
    store: &StateStore,
    team: &str,
    worker: &str,
    ack: &ShutdownAck,
    report: &mut ShutdownReport,
) -> StateResult<()> {
    let reason = match ack.status {
        AckStatus::Accept => "accept".to_string(),
        AckStatus::Reject => format!("reject:{}", ack.reason.clone().unwrap_or_default()),
    };
    store.append_team_event(
        team,
        NewTeamEvent {
            event_type: EventType::ShutdownAck,
            worker: worker.to_string(),
            task_id: None,
            message_id: None,
            reason: Some(reason),
        },
    )?;
    match ack.status {
        AckStatus::Accept => report.accepted.push(worker.to_string()),
        AckStatus::Reject => report
            .rejected
            .push((worker.to_string(), ack.reason.clone().unwrap_or_default())),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::mock::MockAdapter;
    use omx_core::config::{LockConfig, RuntimeEnv, SendStrategy, DisplayMode as EnvDisplayMode};
    use omx_core::lifecycle::{start_team, StartTeamRequest};
    use omx_core::paths::StateRoot;
    use omx_core::schema::{LeaderInfo, WorkerIdentity};

    fn store() -> (tempfile::TempDir, StateStore, LockConfig) {
        let dir = tempfile::tempdir().unwrap();
        let root = StateRoot::new(dir.path()).unwrap();
        let locks = LockConfig::default();
        (dir, StateStore::new(root, locks.clone()), locks)
    }

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

    async fn seed_team(store: &StateStore, team: &str, adapter: &MockAdapter) {
        start_team(
            store,
            &env(),
            StartTeamRequest {
                team: team.to_string(),
                task: "t".to_string(),
                agent_type: "codex".to_string(),
                worker_count: 1,
                max_workers: 2,
                tmux_session: format!("omx-{team}"),
                leader_pane_id: None,
                hud_pane_id: None,
                leader: LeaderInfo {
                    session_id: "s1".to_string(),
                    worker_id: "leader".to_string(),
                    role: "leader".to_string(),
                },
                delegation_only: false,
                plan_approval_required: false,
            },
        )
        .unwrap();
        let pane = adapter.split_pane("s:0", &Default::default()).await.unwrap();
        let identity = WorkerIdentity {
            name: "worker-1".to_string(),
            index: 1,
            role: None,
            assigned_tasks: Vec::new(),
            pid: None,
            pane_id: Some(pane),
            unknown_fields: Default::default(),
        };
        store.write_worker_identity(team, "worker-1", &identity).unwrap();
    }

    #[tokio::test]
    async fn missing_team_is_best_effort_noop() {
        let (_dir, store, locks) = store();
        let adapter = MockAdapter::new();
        let report = shutdown_team(&store, &locks, &adapter, "leader", "ghost", false).await.unwrap();
        assert!(report.accepted.is_empty());
    }

    #[tokio::test]
    async fn reject_blocks_unless_forced() {
        let (_dir, store, locks) = store();
        let adapter = MockAdapter::new();
        seed_team(&store, "gamma", &adapter).await;

        // Pre-seed a reject ack that postdates the upcoming request.
        let future = (chrono::Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
        store
            .write_shutdown_ack(
                "gamma",
                "worker-1",
                &ShutdownAck {
                    status: AckStatus::Reject,
                    reason: Some("still working".to_string()),
                    updated_at: future,
                    unknown_fields: Default::default(),
                },
            )
            .unwrap();

        let err = shutdown_team(&store, &locks, &adapter, "leader", "gamma", false)
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::ShutdownRejected { .. }));
        assert!(store.read_config("gamma").unwrap().is_some());

        let report = shutdown_team(&store, &locks, &adapter, "leader", "gamma", true)
            .await
            .unwrap();
        assert_eq!(report.rejected[0].0, "worker-1");
        assert!(store.read_config("gamma").unwrap().is_none());
    }

    #[tokio::test]
    async fn never_kills_leader_or_hud_pane() {
        let (_dir, store, locks) = store();
        let adapter = MockAdapter::new();
        seed_team(&store, "delta", &adapter).await;

        let mut config = store.read_config("delta").unwrap().unwrap();
        let worker_pane = store
            .read_worker_identity("delta", "worker-1")
            .unwrap()
            .unwrap()
            .pane_id
            .unwrap();
        config.leader_pane_id = Some(worker_pane.clone());
        store.write_config("delta", &config).unwrap();

        shutdown_team(&store, &locks, &adapter, "leader", "delta", true).await.unwrap();
        assert!(adapter.is_pane_alive(&worker_pane).await.unwrap());
    }
}
