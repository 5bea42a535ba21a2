//! `monitorTeam`: one cycle of snapshot diffing, event derivation and
//! mailbox re-notification.

use crate::adapter::MultiplexerAdapter;
use omx_core::config::LockConfig;
use omx_core::mailbox;
use omx_core::schema::{EventType, MonitorSnapshot, NewTeamEvent, WorkerState};
use omx_core::{StateError, StateResult, StateStore};
use std::collections::HashMap;
use std::time::Duration;

const NON_REPORTING_THRESHOLD: u32 = 5;
const DEFAULT_MAILBOX_RETRY_HORIZON: Duration = Duration::from_secs(15);

/// Per-worker row in the returned summary.
#[derive(Debug, Clone)]
pub struct WorkerRow {
    pub name: String,
    pub alive: bool,
    pub state: WorkerState,
    pub current_task_id: Option<String>,
    pub turn_count: u64,
    pub turns_without_progress: u32,
}

/// Result of one `monitorTeam` cycle.
#[derive(Debug, Clone)]
pub struct MonitorReport {
    pub pending_count: usize,
    pub in_progress_count: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub workers: Vec<WorkerRow>,
    pub all_tasks_terminal: bool,
    pub dead_workers: Vec<String>,
    pub non_reporting_workers: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Run one monitor cycle. Returns `None` if the team's config is unknown,
/// reported rather than treated as an error.
pub async fn monitor_team(
    store: &StateStore,
    locks: &LockConfig,
    adapter: &dyn MultiplexerAdapter,
    team: &str,
    mailbox_retry_horizon: Duration,
) -> StateResult<Option<MonitorReport>> {
    let Some(config) = store.read_config(team)? else {
        return Ok(None);
    };

    let previous = store.read_monitor_snapshot(team)?;
    let tasks = store.list_tasks(team)?;

    let mut task_status_by_id = HashMap::new();
    let (mut pending, mut in_progress, mut completed, mut failed) = (0, 0, 0, 0);
    for task in &tasks {
        task_status_by_id.insert(task.id.clone(), task.status.as_wire().to_string());
        match task.status {
            omx_core::schema::TaskStatus::Pending | omx_core::schema::TaskStatus::Blocked => pending += 1,
            omx_core::schema::TaskStatus::InProgress => in_progress += 1,
            omx_core::schema::TaskStatus::Completed => completed += 1,
            omx_core::schema::TaskStatus::Failed => failed += 1,
        }

        let was_completed = previous
            .task_status_by_id
            .get(&task.id)
            .map(|s| s == "completed")
            .unwrap_or(false);
        if task.status == omx_core::schema::TaskStatus::Completed && !was_completed {
            store.append_team_event(
                team,
                NewTeamEvent {
                    event_type: EventType::TaskCompleted,
                    worker: task.owner.clone().unwrap_or_default(),
                    task_id: Some(task.id.clone()),
                    message_id: None,
                    reason: None,
                },
            )?;
        }
    }

    let mut worker_alive_by_name = HashMap::new();
    let mut worker_state_by_name = HashMap::new();
    let mut worker_turn_count_by_name = HashMap::new();
    let mut worker_task_id_by_name: HashMap<String, Option<String>> = HashMap::new();
    let mut rows = Vec::new();
    let mut dead_workers = Vec::new();
    let mut non_reporting_workers = Vec::new();
    let mut recommendations = Vec::new();

    for worker in &config.workers {
        let identity = store.read_worker_identity(team, &worker.name)?;
        let status = store.read_worker_status(team, &worker.name)?;
        let heartbeat = store.read_worker_heartbeat(team, &worker.name)?;

        let pane_alive = match identity.as_ref().and_then(|i| i.pane_id.clone()) {
            Some(pane_id) => adapter
                .is_pane_alive(&pane_id)
                .await
                .map_err(|e| StateError::WorkerNotifyFailed { reason: e.to_string() })?,
            None => false,
        };

        let was_alive = previous.worker_alive_by_name.get(&worker.name).copied().unwrap_or(true);
        if was_alive && !pane_alive {
            store.append_team_event(
                team,
                NewTeamEvent {
                    event_type: EventType::WorkerStopped,
                    worker: worker.name.clone(),
                    task_id: None,
                    message_id: None,
                    reason: status.reason.clone(),
                },
            )?;
            dead_workers.push(worker.name.clone());
            if let Some(task_id) = &status.current_task_id {
                recommendations.push(format!("Reassign task-{task_id} from dead {}", worker.name));
            }
        }

        let previous_state = previous.worker_state_by_name.get(&worker.name).cloned();
        if previous_state.as_deref().is_some_and(|s| s != "idle") && status.state == WorkerState::Idle {
            store.append_team_event(
                team,
                NewTeamEvent {
                    event_type: EventType::WorkerIdle,
                    worker: worker.name.clone(),
                    task_id: None,
                    message_id: None,
                    reason: None,
                },
            )?;
        }

        let turn_count = heartbeat.as_ref().map(|h| h.turn_count).unwrap_or(0);
        let same_task = previous.worker_task_id_by_name.get(&worker.name).cloned().flatten()
            == status.current_task_id;
        let turns_without_progress = if status.state == WorkerState::Working && same_task {
            previous
                .worker_turn_count_by_name
                .get(&worker.name)
                .map(|prev| turn_count.saturating_sub(*prev) as u32)
                .unwrap_or(0)
        } else {
            0
        };

        if pane_alive && status.state == WorkerState::Working && turns_without_progress as u64 > NON_REPORTING_THRESHOLD as u64 {
            non_reporting_workers.push(worker.name.clone());
        }

        worker_alive_by_name.insert(worker.name.clone(), pane_alive);
        worker_state_by_name.insert(worker.name.clone(), status.state.as_wire_string());
        worker_turn_count_by_name.insert(worker.name.clone(), turn_count);
        worker_task_id_by_name.insert(worker.name.clone(), status.current_task_id.clone());

        rows.push(WorkerRow {
            name: worker.name.clone(),
            alive: pane_alive,
            state: status.state,
            current_task_id: status.current_task_id.clone(),
            turn_count,
            turns_without_progress,
        });
    }

    let mut mailbox_notified_by_message_id = HashMap::new();
    for worker in &config.workers {
        if !worker_alive_by_name.get(&worker.name).copied().unwrap_or(false) {
            continue;
        }
        let messages = mailbox::list_messages(store, team, &worker.name)?;
        let pending_messages: Vec<_> = messages.iter().filter(|m| m.delivered_at.is_none()).collect();
        if pending_messages.is_empty() {
            continue;
        }

        let needs_retry = pending_messages.iter().any(|m| match &m.notified_at {
            None => true,
            Some(notified_at) => is_older_than(notified_at, mailbox_retry_horizon),
        });

        if needs_retry {
            let trigger = format!("You have new mail. Check workers/{}/mailbox.", worker.name);
            let send_result = adapter.send_keys_literal(
                &store
                    .read_worker_identity(team, &worker.name)?
                    .and_then(|i| i.pane_id)
                    .unwrap_or_default(),
                &trigger,
            );
            if send_result.await.is_ok() {
                for message in &pending_messages {
                    mailbox::mark_notified(store, locks, team, &worker.name, &message.message_id)?;
                }
            }
        }

        for message in &messages {
            if message.delivered_at.is_none() {
                mailbox_notified_by_message_id.insert(
                    message.message_id.clone(),
                    message.notified_at.clone().unwrap_or_default(),
                );
            }
        }
    }

    store.write_monitor_snapshot(
        team,
        &MonitorSnapshot {
            task_status_by_id,
            worker_alive_by_name,
            worker_state_by_name,
            worker_turn_count_by_name,
            worker_task_id_by_name,
            mailbox_notified_by_message_id,
        },
    )?;

    Ok(Some(MonitorReport {
        pending_count: pending,
        in_progress_count: in_progress,
        completed_count: completed,
        failed_count: failed,
        workers: rows,
        all_tasks_terminal: pending == 0 && in_progress == 0 && !tasks.is_empty(),
        dead_workers,
        non_reporting_workers,
        recommendations,
    }))
}

fn is_older_than(rfc3339: &str, horizon: Duration) -> bool {
    let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(rfc3339) else {
        return true;
    };
    let age = chrono::Utc::now().signed_duration_since(parsed.with_timezone(&chrono::Utc));
    age.to_std().map(|d| d > horizon).unwrap_or(true)
}

/// Default retry horizon used when no config override is present.
pub fn default_mailbox_retry_horizon() -> Duration {
    DEFAULT_MAILBOX_RETRY_HORIZON
}
