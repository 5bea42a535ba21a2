//! Task lifecycle FSM: dependency readiness, optimistic-version claim,
//! status transition, and release.

use crate::config::LockConfig;
use crate::error::{StateError, StateResult};
use crate::io::acquire_lock;
use crate::schema::{Claim, EventType, NewTeamEvent, Task, TaskStatus};
use crate::state::{event_type_for_status, StateStore, TaskPatch};

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn new_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Default claim lease duration (15 minutes).
pub const DEFAULT_LEASE_SECS: i64 = 15 * 60;

/// The outcome of a successful claim.
#[derive(Debug, Clone)]
pub struct ClaimOutcome {
    pub task: Task,
    pub claim_token: String,
}

/// `computeReadiness`: unready if any dependency is missing or not
/// completed. Returns the unready subset.
pub fn compute_readiness(store: &StateStore, team: &str, id: &str) -> StateResult<Vec<String>> {
    let task = store
        .read_task(team, id)?
        .ok_or_else(|| StateError::TaskNotFound { id: id.to_string() })?;
    let mut unready = Vec::new();
    for dep_id in task.dependencies() {
        match store.read_task(team, dep_id)? {
            Some(dep) if dep.status == TaskStatus::Completed => {}
            _ => unready.push(dep_id.clone()),
        }
    }
    Ok(unready)
}

/// `claimTask(team, id, worker, expectedVersion?)`.
pub fn claim_task(
    store: &StateStore,
    locks: &LockConfig,
    team: &str,
    id: &str,
    worker: &str,
    expected_version: Option<u64>,
) -> StateResult<ClaimOutcome> {
    let unready = compute_readiness(store, team, id)?;
    if !unready.is_empty() {
        return Err(StateError::BlockedDependency {
            id: id.to_string(),
            dependencies: unready,
        });
    }

    let lock_path = store.root().task_claim_lock(team, id);
    let _lock = acquire_lock(&lock_path, locks.write_lock_timeout(), locks.write_lock_stale())?;

    let current = store
        .read_task(team, id)?
        .ok_or_else(|| StateError::TaskNotFound { id: id.to_string() })?;

    if let Some(expected) = expected_version {
        if current.version != expected {
            return Err(StateError::ClaimConflict {
                id: id.to_string(),
                reason: format!("expected version {expected}, found {}", current.version),
            });
        }
    }

    if current.status == TaskStatus::InProgress {
        return Err(StateError::ClaimConflict {
            id: id.to_string(),
            reason: "already claimed".to_string(),
        });
    }

    let token = new_uuid();
    let leased_until = (chrono::Utc::now() + chrono::Duration::seconds(DEFAULT_LEASE_SECS))
        .to_rfc3339();

    let updated = store.update_task(
        team,
        id,
        TaskPatch {
            status: Some(TaskStatus::InProgress),
            owner: Some(Some(worker.to_string())),
            claim: Some(Some(Claim {
                owner: worker.to_string(),
                token: token.clone(),
                leased_until,
            })),
            ..Default::default()
        },
    )?;

    Ok(ClaimOutcome {
        task: updated,
        claim_token: token,
    })
}

/// `transitionTaskStatus(team, id, from, to, claimToken)`.
pub fn transition_task_status(
    store: &StateStore,
    locks: &LockConfig,
    team: &str,
    id: &str,
    from: TaskStatus,
    to: TaskStatus,
    claim_token: &str,
) -> StateResult<Task> {
    if !is_allowed_transition(from, to) {
        return Err(StateError::InvalidTransition {
            from: from.as_wire().to_string(),
            to: to.as_wire().to_string(),
        });
    }

    let lock_path = store.root().task_claim_lock(team, id);
    let _lock = acquire_lock(&lock_path, locks.write_lock_timeout(), locks.write_lock_stale())?;

    let current = store
        .read_task(team, id)?
        .ok_or_else(|| StateError::TaskNotFound { id: id.to_string() })?;

    if current.status != from {
        return Err(StateError::InvalidTransition {
            from: from.as_wire().to_string(),
            to: to.as_wire().to_string(),
        });
    }
    match &current.claim {
        Some(claim) if claim.token == claim_token => {}
        _ => {
            return Err(StateError::ClaimConflict {
                id: id.to_string(),
                reason: "claim token mismatch".to_string(),
            })
        }
    }

    let completed_at = if to.is_terminal() {
        Some(Some(now_rfc3339()))
    } else {
        None
    };

    let updated = store.update_task(
        team,
        id,
        TaskPatch {
            status: Some(to),
            completed_at,
            ..Default::default()
        },
    )?;

    if let Some(event_type) = event_type_for_status(to) {
        let reason = match event_type {
            EventType::WorkerStopped => updated.error.clone(),
            _ => None,
        };
        store.append_team_event(
            team,
            NewTeamEvent {
                event_type,
                worker: updated.owner.clone().unwrap_or_default(),
                task_id: Some(id.to_string()),
                message_id: None,
                reason,
            },
        )?;
    }

    Ok(updated)
}

/// `releaseTaskClaim(team, id, claimToken, worker)`. Idempotent: a task
/// already `pending` with no claim, owned by `worker`, is a no-op success.
pub fn release_task_claim(
    store: &StateStore,
    locks: &LockConfig,
    team: &str,
    id: &str,
    claim_token: &str,
    worker: &str,
) -> StateResult<Task> {
    let lock_path = store.root().task_claim_lock(team, id);
    let _lock = acquire_lock(&lock_path, locks.write_lock_timeout(), locks.write_lock_stale())?;

    let current = store
        .read_task(team, id)?
        .ok_or_else(|| StateError::TaskNotFound { id: id.to_string() })?;

    if current.status == TaskStatus::Pending && current.claim.is_none() && current.owner.is_none() {
        return Ok(current);
    }

    let token_matches = current
        .claim
        .as_ref()
        .map(|c| c.token == claim_token)
        .unwrap_or(false);
    let owner_matches = current.status == TaskStatus::InProgress
        && current.owner.as_deref() == Some(worker);

    if !token_matches && !owner_matches {
        return Err(StateError::ClaimConflict {
            id: id.to_string(),
            reason: "claim token and owner mismatch".to_string(),
        });
    }

    store.update_task(
        team,
        id,
        TaskPatch {
            status: Some(TaskStatus::Pending),
            owner: Some(None),
            claim: Some(None),
            ..Default::default()
        },
    )
}

fn is_allowed_transition(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    matches!(
        (from, to),
        (Pending, InProgress)
            | (InProgress, Completed)
            | (InProgress, Failed)
            | (Pending, Blocked)
            | (Blocked, Pending)
            | (InProgress, Pending)
    )
}
