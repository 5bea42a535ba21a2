//! Mailbox operations: direct send, broadcast, notification/delivery
//! stamping, serialized under the per-recipient lock.

use crate::config::LockConfig;
use crate::error::StateResult;
use crate::io::acquire_lock;
use crate::schema::{EventType, MailboxMessage, NewTeamEvent, TeamConfig};
use crate::state::StateStore;

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn new_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// `sendDirect(team, from, to, body)`.
pub fn send_direct(
    store: &StateStore,
    locks: &LockConfig,
    team: &str,
    from: &str,
    to: &str,
    body: &str,
) -> StateResult<MailboxMessage> {
    let lock_path = store.root().mailbox_lock(team, to);
    let _lock = acquire_lock(&lock_path, locks.write_lock_timeout(), locks.write_lock_stale())?;

    let mut mailbox = store.read_mailbox(team, to)?;
    let message = MailboxMessage {
        message_id: new_uuid(),
        from_worker: from.to_string(),
        to_worker: to.to_string(),
        body: body.to_string(),
        created_at: now_rfc3339(),
        notified_at: None,
        delivered_at: None,
        unknown_fields: Default::default(),
    };
    mailbox.messages.push(message.clone());
    store.write_mailbox(team, to, &mailbox)?;

    store.append_team_event(
        team,
        NewTeamEvent {
            event_type: EventType::MessageReceived,
            worker: to.to_string(),
            task_id: None,
            message_id: Some(message.message_id.clone()),
            reason: None,
        },
    )?;

    Ok(message)
}

/// `broadcast(team, from, body)`: one direct send per other worker.
pub fn broadcast(
    store: &StateStore,
    locks: &LockConfig,
    config: &TeamConfig,
    team: &str,
    from: &str,
    body: &str,
) -> StateResult<Vec<MailboxMessage>> {
    let mut sent = Vec::new();
    for worker in &config.workers {
        if worker.name == from {
            continue;
        }
        sent.push(send_direct(store, locks, team, from, &worker.name, body)?);
    }
    Ok(sent)
}

/// Stamp `notified_at` on a message. Returns `false` if the message is
/// absent.
pub fn mark_notified(
    store: &StateStore,
    locks: &LockConfig,
    team: &str,
    worker: &str,
    message_id: &str,
) -> StateResult<bool> {
    let lock_path = store.root().mailbox_lock(team, worker);
    let _lock = acquire_lock(&lock_path, locks.write_lock_timeout(), locks.write_lock_stale())?;

    let mut mailbox = store.read_mailbox(team, worker)?;
    let Some(msg) = mailbox.messages.iter_mut().find(|m| m.message_id == message_id) else {
        return Ok(false);
    };
    msg.notified_at = Some(now_rfc3339());
    store.write_mailbox(team, worker, &mailbox)?;
    Ok(true)
}

/// Stamp `delivered_at` on a message. Returns `false` if the message is
/// absent.
pub fn mark_delivered(
    store: &StateStore,
    locks: &LockConfig,
    team: &str,
    worker: &str,
    message_id: &str,
) -> StateResult<bool> {
    let lock_path = store.root().mailbox_lock(team, worker);
    let _lock = acquire_lock(&lock_path, locks.write_lock_timeout(), locks.write_lock_stale())?;

    let mut mailbox = store.read_mailbox(team, worker)?;
    let Some(msg) = mailbox.messages.iter_mut().find(|m| m.message_id == message_id) else {
        return Ok(false);
    };
    msg.delivered_at = Some(now_rfc3339());
    store.write_mailbox(team, worker, &mailbox)?;
    Ok(true)
}

pub fn list_messages(store: &StateStore, team: &str, worker: &str) -> StateResult<Vec<MailboxMessage>> {
    Ok(store.read_mailbox(team, worker)?.messages)
}
