//! Worker dispatch protocol (bootstrap and follow-up task assignment):
//! write inbox, wait for pane readiness, deliver a trigger, verify delivery.

use crate::adapter::{guard, ControlKey, MultiplexerAdapter};
use crate::error::DispatchError;
use omx_core::config::{LockConfig, SendStrategy};
use omx_core::StateStore;
use std::time::Duration;
use tracing::{debug, warn};

const READY_MARKERS: &[&str] = &["›", ">"];
const TRUST_PROMPT_MARKER: &str = "Trust this folder";
const MAX_VERIFY_ROUNDS: u32 = 6;
const INITIAL_BACKOFF_MS: u64 = 300;
const MAX_BACKOFF_MS: u64 = 8_000;
const CAPTURE_LINES: u32 = 200;

/// Tunables governing one dispatch call. Constructed from [`omx_core::config::RuntimeEnv`]
/// by the caller; tests can override fields directly.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub ready_timeout: Duration,
    pub skip_ready_wait: bool,
    pub send_strategy: SendStrategy,
    pub auto_trust: bool,
}

/// Write the worker's inbox and, for an initial dispatch, wait for the pane
/// to be ready before sending the trigger. Returns once delivery is
/// verified or the retry budget is exhausted.
pub async fn dispatch(
    store: &StateStore,
    adapter: &dyn MultiplexerAdapter,
    team: &str,
    worker: &str,
    pane_id: &str,
    inbox_markdown: &str,
    initial: bool,
    opts: &DispatchOptions,
) -> Result<(), DispatchError> {
    store
        .write_worker_inbox(team, worker, inbox_markdown)
        .map_err(DispatchError::State)?;

    if initial && !opts.skip_ready_wait {
        wait_for_ready(adapter, pane_id, opts).await?;
    }

    let trigger = format!("Read and follow the instructions in workers/{worker}/inbox.md");
    guard::validate_trigger(&trigger).map_err(DispatchError::Adapter)?;

    verify_delivery(adapter, pane_id, &trigger, opts).await
}

async fn wait_for_ready(
    adapter: &dyn MultiplexerAdapter,
    pane_id: &str,
    opts: &DispatchOptions,
) -> Result<(), DispatchError> {
    let deadline = tokio::time::Instant::now() + opts.ready_timeout;
    let mut backoff_ms = INITIAL_BACKOFF_MS;
    loop {
        let capture = adapter
            .capture_pane(pane_id, CAPTURE_LINES)
            .await
            .map_err(DispatchError::Adapter)?;
        let tail = capture.lines().rev().take(5).collect::<Vec<_>>().join("\n");

        if opts.auto_trust && tail.contains(TRUST_PROMPT_MARKER) {
            debug!(pane_id, "auto-dismissing trust prompt");
            adapter
                .send_keys_control(pane_id, ControlKey::SubmitLine)
                .await
                .map_err(DispatchError::Adapter)?;
            adapter
                .send_keys_control(pane_id, ControlKey::SubmitLine)
                .await
                .map_err(DispatchError::Adapter)?;
        } else if is_ready(&tail) {
            return Ok(());
        }

        if tokio::time::Instant::now() >= deadline {
            return Err(DispatchError::ReadyTimeout);
        }
        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
    }
}

fn is_ready(tail: &str) -> bool {
    let trimmed = tail.trim_end();
    READY_MARKERS.iter().any(|m| trimmed.ends_with(m)) || trimmed.contains("% left") || trimmed.contains("model:")
}

async fn verify_delivery(
    adapter: &dyn MultiplexerAdapter,
    pane_id: &str,
    trigger: &str,
    opts: &DispatchOptions,
) -> Result<(), DispatchError> {
    for round in 1..=MAX_VERIFY_ROUNDS {
        adapter
            .send_keys_literal(pane_id, trigger)
            .await
            .map_err(DispatchError::Adapter)?;

        submit(adapter, pane_id, round, opts).await?;

        let capture = adapter
            .capture_pane(pane_id, CAPTURE_LINES)
            .await
            .map_err(DispatchError::Adapter)?;
        if capture.contains(trigger) {
            return Ok(());
        }

        warn!(pane_id, round, "trigger not visible in pane capture, retrying");
    }

    Err(DispatchError::WorkerNotifyFailed {
        reason: format!("verification failed after {MAX_VERIFY_ROUNDS} rounds"),
    })
}

async fn submit(
    adapter: &dyn MultiplexerAdapter,
    pane_id: &str,
    round: u32,
    opts: &DispatchOptions,
) -> Result<(), DispatchError> {
    let use_queue = match opts.send_strategy {
        SendStrategy::Queue => true,
        SendStrategy::Interrupt => false,
        SendStrategy::Auto => round % 2 == 0,
    };

    if opts.send_strategy == SendStrategy::Interrupt {
        adapter
            .send_keys_control(pane_id, ControlKey::Interrupt)
            .await
            .map_err(DispatchError::Adapter)?;
    }
    if use_queue {
        adapter
            .send_keys_control(pane_id, ControlKey::Tab)
            .await
            .map_err(DispatchError::Adapter)?;
    }
    adapter
        .send_keys_control(pane_id, ControlKey::SubmitLine)
        .await
        .map_err(DispatchError::Adapter)
}

/// Rollback for a post-claim dispatch failure: release the claim and write
/// a cancelled inbox so the worker never executes stale instructions. If
/// release fails too, the combined error is surfaced.
pub fn rollback_claim(
    store: &StateStore,
    locks: &LockConfig,
    team: &str,
    task_id: &str,
    claim_token: &str,
    worker: &str,
    dispatch_error: DispatchError,
) -> DispatchError {
    let cancelled = format!("# Cancelled\n\nAssignment of task {task_id} was rolled back: {dispatch_error}.\n");
    if let Err(write_err) = store.write_worker_inbox(team, worker, &cancelled) {
        return DispatchError::WorkerNotifyFailed {
            reason: format!("{dispatch_error}; additionally failed to write cancelled inbox: {write_err}"),
        };
    }
    match omx_core::tasks::release_task_claim(store, locks, team, task_id, claim_token, worker) {
        Ok(_) => dispatch_error,
        Err(release_err) => DispatchError::WorkerNotifyFailed {
            reason: format!("{dispatch_error}; additionally failed to release claim: {release_err}"),
        },
    }
}
