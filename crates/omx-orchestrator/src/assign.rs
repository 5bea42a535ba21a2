//! `assignTask`: leader-side policy gates plus claim-and-dispatch, combining
//! the core FSM with the bootstrap dispatch protocol and its rollback.

use crate::adapter::MultiplexerAdapter;
use crate::bootstrap::{self, rollback_claim, DispatchOptions};
use crate::error::DispatchError;
use omx_core::config::LockConfig;
use omx_core::schema::{ApprovalStatus, Manifest};
use omx_core::{tasks, StateError, StateStore};

/// Reserved worker name that `delegation_only` forbids assigning to.
pub const LEADER_FIXED_WORKER: &str = "leader-fixed";

/// Assign task `task_id` to `worker`, enforcing manifest policy, claiming
/// the task, writing its inbox, and dispatching the pane trigger. Any
/// failure after the claim succeeds rolls the claim back.
#[allow(clippy::too_many_arguments)]
pub async fn assign_task(
    store: &StateStore,
    locks: &LockConfig,
    adapter: &dyn MultiplexerAdapter,
    manifest: &Manifest,
    team: &str,
    task_id: &str,
    worker: &str,
    pane_id: &str,
    inbox_markdown: &str,
    opts: &DispatchOptions,
) -> Result<(), DispatchError> {
    if manifest.policy.delegation_only && worker == LEADER_FIXED_WORKER {
        return Err(DispatchError::State(StateError::DelegationOnlyViolation {
            worker: worker.to_string(),
        }));
    }

    let task = store
        .read_task(team, task_id)
        .map_err(DispatchError::State)?
        .ok_or_else(|| DispatchError::State(StateError::TaskNotFound { id: task_id.to_string() }))?;

    if manifest.policy.plan_approval_required && task.requires_code_change == Some(true) {
        let approved = store
            .read_approval(team, task_id)
            .map_err(DispatchError::State)?
            .is_some_and(|a| a.status == ApprovalStatus::Approved);
        if !approved {
            return Err(DispatchError::State(StateError::PlanApprovalRequired {
                id: task_id.to_string(),
            }));
        }
    }

    let claimed = tasks::claim_task(store, locks, team, task_id, worker, Some(task.version))
        .map_err(DispatchError::State)?;

    let dispatch_result = bootstrap::dispatch(
        store,
        adapter,
        team,
        worker,
        pane_id,
        inbox_markdown,
        false,
        opts,
    )
    .await;

    if let Err(err) = dispatch_result {
        return Err(rollback_claim(
            store,
            locks,
            team,
            task_id,
            &claimed.claim_token,
            worker,
            err,
        ));
    }

    Ok(())
}
