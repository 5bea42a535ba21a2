//! `handle(ToolRequest) -> ToolResponse`: the single entry point tool calls
//! go through. State tools read/write mode-scoped JSON blobs directly;
//! team tools are 1:1 wrappers over `omx-core`'s state store, task FSM and
//! mailbox operations.

use omx_core::config::LockConfig;
use omx_core::paths::{sanitize_external_name, sanitize_team_name, StateRoot};
use omx_core::schema::{
    AckStatus, EventType, Heartbeat, NewTeamEvent, ShutdownAck, ShutdownRequest, TaskStatus,
    WorkerIdentity, WorkerState, WorkerStatus,
};
use omx_core::state::{NewTask, TaskPatch};
use omx_core::{lifecycle, mailbox, tasks, StateStore};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

/// Closed set of mode names a state tool may address.
pub(crate) const MODES: &[&str] = &[
    "autopilot",
    "ultrapilot",
    "team",
    "pipeline",
    "ralph",
    "ultrawork",
    "ultraqa",
    "ecomode",
    "ralplan",
];

#[derive(Debug, Clone, Deserialize)]
pub struct ToolRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolContent {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolResponse {
    pub content: Vec<ToolContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl ToolResponse {
    fn ok(value: Value) -> Self {
        Self {
            content: vec![ToolContent {
                content_type: "text".to_string(),
                text: value.to_string(),
            }],
            is_error: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent {
                content_type: "text".to_string(),
                text: json!({ "error": message.into() }).to_string(),
            }],
            is_error: Some(true),
        }
    }
}

/// Tunables for a handler instance. Lock timeouts are the only thing a tool
/// call needs beyond what's resolved per-request from `workingDirectory`.
pub struct ToolContext {
    pub locks: LockConfig,
}

impl Default for ToolContext {
    fn default() -> Self {
        Self { locks: LockConfig::default() }
    }
}

pub fn handle(ctx: &ToolContext, req: &ToolRequest) -> ToolResponse {
    let result = dispatch(ctx, &req.name, &req.arguments);
    match result {
        Ok(value) => ToolResponse::ok(value),
        Err(message) => ToolResponse::error(message),
    }
}

fn dispatch(ctx: &ToolContext, name: &str, args: &Value) -> Result<Value, String> {
    match name {
        "state_read" => state_read(args),
        "state_write" => state_write(args),
        "state_clear" => state_clear(args),
        "state_list_active" => state_list_active(args),
        "state_get_status" => state_get_status(args),

        "send" => team_send(ctx, args),
        "broadcast" => team_broadcast(ctx, args),
        "mailbox_list" => team_mailbox_list(ctx, args),
        "mailbox_mark_delivered" => team_mailbox_mark(ctx, args, mailbox::mark_delivered),
        "mailbox_mark_notified" => team_mailbox_mark(ctx, args, mailbox::mark_notified),

        "task_create" => team_task_create(ctx, args),
        "task_read" => team_task_read(ctx, args),
        "task_list" => team_task_list(ctx, args),
        "task_update" => team_task_update(ctx, args),
        "task_claim" => team_task_claim(ctx, args),
        "task_release" => team_task_release(ctx, args),
        "task_transition" => team_task_transition(ctx, args),
        "task_readiness" => team_task_readiness(ctx, args),

        "config_read" => team_config_read(ctx, args),
        "manifest_read" => team_manifest_read(ctx, args),

        "worker_status_read" => team_worker_status_read(ctx, args),
        "worker_status_write" => team_worker_status_write(ctx, args),
        "worker_heartbeat_read" => team_worker_heartbeat_read(ctx, args),
        "worker_heartbeat_write" => team_worker_heartbeat_write(ctx, args),
        "worker_identity_read" => team_worker_identity_read(ctx, args),
        "worker_identity_write" => team_worker_identity_write(ctx, args),
        "worker_write_inbox" => team_worker_write_inbox(ctx, args),
        "worker_read_inbox" => team_worker_read_inbox(ctx, args),

        "append_event" => team_append_event(ctx, args),
        "read_events" => team_read_events(ctx, args),

        "write_shutdown_request" => team_write_shutdown_request(ctx, args),
        "read_shutdown_request" => team_read_shutdown_request(ctx, args),
        "write_shutdown_ack" => team_write_shutdown_ack(ctx, args),
        "read_shutdown_ack" => team_read_shutdown_ack(ctx, args),

        "read_monitor_snapshot" => team_read_monitor_snapshot(ctx, args),
        "write_monitor_snapshot" => team_write_monitor_snapshot(ctx, args),
        "read_approval" => team_read_approval(ctx, args),
        "write_approval" => team_write_approval(ctx, args),

        "summary" => team_summary(ctx, args),
        "cleanup" => team_cleanup(ctx, args),

        other => Err(format!("unknown tool '{other}'")),
    }
}

// ---- Argument helpers ------------------------------------------------------

fn str_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("missing required argument '{key}'"))
}

fn opt_str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

fn u64_arg(args: &Value, key: &str) -> Result<u64, String> {
    args.get(key)
        .and_then(|v| v.as_u64())
        .ok_or_else(|| format!("missing required numeric argument '{key}'"))
}

fn opt_u64_arg(args: &Value, key: &str) -> Option<u64> {
    args.get(key).and_then(|v| v.as_u64())
}

fn bool_arg(args: &Value, key: &str, default: bool) -> bool {
    args.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
}

/// Distinguishes "absent" (leave untouched) from "present but null"
/// (explicit clear) for nullable patch fields.
fn patch_nullable_string(args: &Value, key: &str) -> Option<Option<String>> {
    let obj = args.as_object()?;
    if !obj.contains_key(key) {
        return None;
    }
    Some(obj.get(key).and_then(|v| v.as_str()).map(|s| s.to_string()))
}

// ---- Deep merge -------------------------------------------------------------

fn deep_merge(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(patch_map) => {
            if !target.is_object() {
                *target = Value::Object(serde_json::Map::new());
            }
            let target_map = target.as_object_mut().expect("just coerced to object");
            for (k, v) in patch_map {
                deep_merge(target_map.entry(k.clone()).or_insert(Value::Null), v);
            }
        }
        other => *target = other.clone(),
    }
}

// ---- State tools ------------------------------------------------------------

fn mode_state_path(mode: &str, session_id: Option<&str>) -> Result<PathBuf, String> {
    let root = StateRoot::new(Path::new(".")).map_err(|e| e.to_string())?;
    Ok(match session_id {
        Some(sid) => root.scoped_session_state_file(sid, mode),
        None => root.session_state_file(mode),
    })
}

fn validate_mode(mode: &str) -> Result<(), String> {
    if MODES.contains(&mode) {
        Ok(())
    } else {
        Err(format!("unknown mode '{mode}'"))
    }
}

fn state_read(args: &Value) -> Result<Value, String> {
    let mode = str_arg(args, "mode")?;
    validate_mode(mode)?;
    let path = mode_state_path(mode, opt_str_arg(args, "session_id"))?;
    let value: Option<Value> = omx_core::io::read_json(&path).map_err(|e| e.to_string())?;
    Ok(value.unwrap_or_else(|| json!({})))
}

fn state_write(args: &Value) -> Result<Value, String> {
    let mode = str_arg(args, "mode")?;
    validate_mode(mode)?;
    let patch = args
        .get("patch")
        .cloned()
        .ok_or_else(|| "missing required argument 'patch'".to_string())?;
    let path = mode_state_path(mode, opt_str_arg(args, "session_id"))?;
    let mut current: Value = omx_core::io::read_json(&path)
        .map_err(|e| e.to_string())?
        .unwrap_or_else(|| json!({}));
    deep_merge(&mut current, &patch);
    omx_core::io::write_json_atomic(&path, &current).map_err(|e| e.to_string())?;
    Ok(current)
}

fn state_clear(args: &Value) -> Result<Value, String> {
    let mode = str_arg(args, "mode")?;
    validate_mode(mode)?;
    let path = mode_state_path(mode, opt_str_arg(args, "session_id"))?;
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(json!({ "cleared": true })),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(json!({ "cleared": false })),
        Err(e) => Err(e.to_string()),
    }
}

fn state_list_active(args: &Value) -> Result<Value, String> {
    let session_id = opt_str_arg(args, "session_id");
    let mut active = Vec::new();
    for mode in MODES {
        let path = mode_state_path(mode, session_id)?;
        if let Some(value) = omx_core::io::read_json::<Value>(&path).map_err(|e| e.to_string())? {
            if value.get("active").and_then(|v| v.as_bool()).unwrap_or(false) {
                active.push(*mode);
            }
        }
    }
    Ok(json!({ "active_modes": active }))
}

fn state_get_status(args: &Value) -> Result<Value, String> {
    let session_id = opt_str_arg(args, "session_id");
    let mut statuses = serde_json::Map::new();
    for mode in MODES {
        let path = mode_state_path(mode, session_id)?;
        let value = omx_core::io::read_json::<Value>(&path)
            .map_err(|e| e.to_string())?
            .unwrap_or_else(|| json!({ "active": false }));
        statuses.insert((*mode).to_string(), value);
    }
    Ok(Value::Object(statuses))
}

// ---- Team tool plumbing -----------------------------------------------------

/// Ancestor-walk resolution: if `workingDirectory` doesn't contain the team,
/// walk up its ancestors (and `cwd`) looking for a matching
/// `.omx/state/team/<team>/` directory. First match wins; otherwise the
/// caller's `workingDirectory` is used (creating the tree as needed).
fn resolve_state_root(working_directory: &str, team: &str) -> StateRoot {
    let start = PathBuf::from(working_directory);
    let cwd = std::env::current_dir().unwrap_or_else(|_| start.clone());

    let mut candidates = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for base in [start.clone(), cwd] {
        for ancestor in std::iter::once(base.clone()).chain(base.ancestors().skip(1).map(Path::to_path_buf)) {
            if seen.insert(ancestor.clone()) {
                candidates.push(ancestor);
            }
        }
    }

    for candidate in &candidates {
        if candidate.join(".omx").join("state").join("team").join(team).is_dir() {
            return StateRoot::from_existing(candidate.join(".omx").join("state"));
        }
    }

    StateRoot::new(&start).unwrap_or_else(|_| StateRoot::from_existing(start.join(".omx").join("state")))
}

fn team_store(ctx: &ToolContext, args: &Value) -> Result<(StateStore, String), String> {
    let working_directory = opt_str_arg(args, "workingDirectory").unwrap_or(".");
    let raw_team = str_arg(args, "team_name")?;
    let team = sanitize_team_name(raw_team).map_err(|e| e.to_string())?;
    let root = resolve_state_root(working_directory, &team);
    Ok((StateStore::new(root, ctx.locks.clone()), team))
}

fn worker_name(args: &Value, key: &str) -> Result<String, String> {
    sanitize_external_name(str_arg(args, key)?).map_err(|e| e.to_string())
}

// ---- Team tools: mailbox ----------------------------------------------------

fn team_send(ctx: &ToolContext, args: &Value) -> Result<Value, String> {
    let (store, team) = team_store(ctx, args)?;
    let from = worker_name(args, "from")?;
    let to = worker_name(args, "to")?;
    let body = str_arg(args, "body")?;
    let message = mailbox::send_direct(&store, &ctx.locks, &team, &from, &to, body).map_err(|e| e.to_string())?;
    serde_json::to_value(message).map_err(|e| e.to_string())
}

fn team_broadcast(ctx: &ToolContext, args: &Value) -> Result<Value, String> {
    let (store, team) = team_store(ctx, args)?;
    let from = worker_name(args, "from")?;
    let body = str_arg(args, "body")?;
    let config = store
        .read_config(&team)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "team_not_found".to_string())?;
    let sent = mailbox::broadcast(&store, &ctx.locks, &config, &team, &from, body).map_err(|e| e.to_string())?;
    serde_json::to_value(sent).map_err(|e| e.to_string())
}

fn team_mailbox_list(ctx: &ToolContext, args: &Value) -> Result<Value, String> {
    let (store, team) = team_store(ctx, args)?;
    let worker = worker_name(args, "worker")?;
    let messages = mailbox::list_messages(&store, &team, &worker).map_err(|e| e.to_string())?;
    serde_json::to_value(messages).map_err(|e| e.to_string())
}

fn team_mailbox_mark(
    ctx: &ToolContext,
    args: &Value,
    op: fn(&StateStore, &LockConfig, &str, &str, &str) -> omx_core::StateResult<bool>,
) -> Result<Value, String> {
    let (store, team) = team_store(ctx, args)?;
    let worker = worker_name(args, "worker")?;
    let message_id = str_arg(args, "message_id")?;
    let found = op(&store, &ctx.locks, &team, &worker, message_id).map_err(|e| e.to_string())?;
    Ok(json!({ "found": found }))
}

// ---- Team tools: tasks -------------------------------------------------------

fn team_task_create(ctx: &ToolContext, args: &Value) -> Result<Value, String> {
    let (store, team) = team_store(ctx, args)?;
    let depends_on = args
        .get("depends_on")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect());
    let task = store
        .create_task(
            &team,
            NewTask {
                subject: str_arg(args, "subject")?.to_string(),
                description: str_arg(args, "description")?.to_string(),
                requires_code_change: args.get("requires_code_change").and_then(|v| v.as_bool()),
                depends_on,
            },
        )
        .map_err(|e| e.to_string())?;
    serde_json::to_value(task).map_err(|e| e.to_string())
}

fn team_task_read(ctx: &ToolContext, args: &Value) -> Result<Value, String> {
    let (store, team) = team_store(ctx, args)?;
    let id = str_arg(args, "id")?;
    let task = store.read_task(&team, id).map_err(|e| e.to_string())?;
    serde_json::to_value(task).map_err(|e| e.to_string())
}

fn team_task_list(ctx: &ToolContext, args: &Value) -> Result<Value, String> {
    let (store, team) = team_store(ctx, args)?;
    let tasks = store.list_tasks(&team).map_err(|e| e.to_string())?;
    serde_json::to_value(tasks).map_err(|e| e.to_string())
}

fn team_task_update(ctx: &ToolContext, args: &Value) -> Result<Value, String> {
    let (store, team) = team_store(ctx, args)?;
    let id = str_arg(args, "id")?;

    let status = match opt_str_arg(args, "status") {
        Some(s) => Some(TaskStatus::from_wire(s).ok_or_else(|| format!("invalid status '{s}'"))?),
        None => None,
    };

    let patch = TaskPatch {
        status,
        subject: opt_str_arg(args, "subject").map(str::to_string),
        description: opt_str_arg(args, "description").map(str::to_string),
        owner: patch_nullable_string(args, "owner"),
        result: opt_str_arg(args, "result").map(str::to_string),
        error: opt_str_arg(args, "error").map(str::to_string),
        depends_on: args
            .get("depends_on")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect()),
        requires_code_change: args.get("requires_code_change").and_then(|v| v.as_bool()),
        claim: None,
        completed_at: patch_nullable_string(args, "completed_at"),
    };

    let task = store.update_task(&team, id, patch).map_err(|e| e.to_string())?;
    serde_json::to_value(task).map_err(|e| e.to_string())
}

fn team_task_claim(ctx: &ToolContext, args: &Value) -> Result<Value, String> {
    let (store, team) = team_store(ctx, args)?;
    let id = str_arg(args, "id")?;
    let worker = worker_name(args, "worker")?;
    let outcome = tasks::claim_task(&store, &ctx.locks, &team, id, &worker, opt_u64_arg(args, "expected_version"))
        .map_err(|e| e.to_string())?;
    Ok(json!({ "task": outcome.task, "claim_token": outcome.claim_token }))
}

fn team_task_release(ctx: &ToolContext, args: &Value) -> Result<Value, String> {
    let (store, team) = team_store(ctx, args)?;
    let id = str_arg(args, "id")?;
    let claim_token = str_arg(args, "claim_token")?;
    let worker = worker_name(args, "worker")?;
    let task = tasks::release_task_claim(&store, &ctx.locks, &team, id, claim_token, &worker)
        .map_err(|e| e.to_string())?;
    serde_json::to_value(task).map_err(|e| e.to_string())
}

fn team_task_transition(ctx: &ToolContext, args: &Value) -> Result<Value, String> {
    let (store, team) = team_store(ctx, args)?;
    let id = str_arg(args, "id")?;
    let from_s = str_arg(args, "from")?;
    let to_s = str_arg(args, "to")?;
    let from = TaskStatus::from_wire(from_s).ok_or_else(|| format!("invalid status '{from_s}'"))?;
    let to = TaskStatus::from_wire(to_s).ok_or_else(|| format!("invalid status '{to_s}'"))?;
    let claim_token = str_arg(args, "claim_token")?;
    let task = tasks::transition_task_status(&store, &ctx.locks, &team, id, from, to, claim_token)
        .map_err(|e| e.to_string())?;
    serde_json::to_value(task).map_err(|e| e.to_string())
}

fn team_task_readiness(ctx: &ToolContext, args: &Value) -> Result<Value, String> {
    let (store, team) = team_store(ctx, args)?;
    let id = str_arg(args, "id")?;
    let unready = tasks::compute_readiness(&store, &team, id).map_err(|e| e.to_string())?;
    Ok(json!({ "unready_dependencies": unready }))
}

// ---- Team tools: config / manifest ------------------------------------------

fn team_config_read(ctx: &ToolContext, args: &Value) -> Result<Value, String> {
    let (store, team) = team_store(ctx, args)?;
    let config = store.read_config(&team).map_err(|e| e.to_string())?;
    serde_json::to_value(config).map_err(|e| e.to_string())
}

fn team_manifest_read(ctx: &ToolContext, args: &Value) -> Result<Value, String> {
    let (store, team) = team_store(ctx, args)?;
    let manifest = store.read_manifest(&team).map_err(|e| e.to_string())?;
    serde_json::to_value(manifest).map_err(|e| e.to_string())
}

// ---- Team tools: workers -----------------------------------------------------

fn team_worker_status_read(ctx: &ToolContext, args: &Value) -> Result<Value, String> {
    let (store, team) = team_store(ctx, args)?;
    let worker = worker_name(args, "worker")?;
    let status = store.read_worker_status(&team, &worker).map_err(|e| e.to_string())?;
    serde_json::to_value(status).map_err(|e| e.to_string())
}

fn team_worker_status_write(ctx: &ToolContext, args: &Value) -> Result<Value, String> {
    let (store, team) = team_store(ctx, args)?;
    let worker = worker_name(args, "worker")?;
    let state_s = str_arg(args, "state")?;
    let state: WorkerState = serde_json::from_value(json!(state_s)).map_err(|_| format!("invalid worker state '{state_s}'"))?;
    let status = WorkerStatus {
        state,
        current_task_id: opt_str_arg(args, "current_task_id").map(str::to_string),
        reason: opt_str_arg(args, "reason").map(str::to_string),
        updated_at: chrono::Utc::now().to_rfc3339(),
        unknown_fields: Default::default(),
    };
    store.write_worker_status(&team, &worker, &status).map_err(|e| e.to_string())?;
    serde_json::to_value(status).map_err(|e| e.to_string())
}

fn team_worker_heartbeat_read(ctx: &ToolContext, args: &Value) -> Result<Value, String> {
    let (store, team) = team_store(ctx, args)?;
    let worker = worker_name(args, "worker")?;
    let hb = store.read_worker_heartbeat(&team, &worker).map_err(|e| e.to_string())?;
    serde_json::to_value(hb).map_err(|e| e.to_string())
}

fn team_worker_heartbeat_write(ctx: &ToolContext, args: &Value) -> Result<Value, String> {
    let (store, team) = team_store(ctx, args)?;
    let worker = worker_name(args, "worker")?;
    let heartbeat = Heartbeat {
        pid: u64_arg(args, "pid")? as u32,
        last_turn_at: chrono::Utc::now().to_rfc3339(),
        turn_count: u64_arg(args, "turn_count")?,
        alive: bool_arg(args, "alive", true),
        unknown_fields: Default::default(),
    };
    store.write_worker_heartbeat(&team, &worker, &heartbeat).map_err(|e| e.to_string())?;
    serde_json::to_value(heartbeat).map_err(|e| e.to_string())
}

fn team_worker_identity_read(ctx: &ToolContext, args: &Value) -> Result<Value, String> {
    let (store, team) = team_store(ctx, args)?;
    let worker = worker_name(args, "worker")?;
    let identity = store.read_worker_identity(&team, &worker).map_err(|e| e.to_string())?;
    serde_json::to_value(identity).map_err(|e| e.to_string())
}

fn team_worker_identity_write(ctx: &ToolContext, args: &Value) -> Result<Value, String> {
    let (store, team) = team_store(ctx, args)?;
    let worker = worker_name(args, "worker")?;
    let assigned_tasks = args
        .get("assigned_tasks")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    let identity = WorkerIdentity {
        name: worker.clone(),
        index: u64_arg(args, "index")? as u32,
        role: opt_str_arg(args, "role").map(str::to_string),
        assigned_tasks,
        pid: opt_u64_arg(args, "pid").map(|p| p as u32),
        pane_id: opt_str_arg(args, "pane_id").map(str::to_string),
        unknown_fields: Default::default(),
    };
    store.write_worker_identity(&team, &worker, &identity).map_err(|e| e.to_string())?;
    serde_json::to_value(identity).map_err(|e| e.to_string())
}

fn team_worker_write_inbox(ctx: &ToolContext, args: &Value) -> Result<Value, String> {
    let (store, team) = team_store(ctx, args)?;
    let worker = worker_name(args, "worker")?;
    let markdown = str_arg(args, "markdown")?;
    store.write_worker_inbox(&team, &worker, markdown).map_err(|e| e.to_string())?;
    Ok(json!({ "written": true }))
}

fn team_worker_read_inbox(ctx: &ToolContext, args: &Value) -> Result<Value, String> {
    let (store, team) = team_store(ctx, args)?;
    let worker = worker_name(args, "worker")?;
    let markdown = store.read_worker_inbox(&team, &worker).map_err(|e| e.to_string())?;
    Ok(json!({ "markdown": markdown }))
}

// ---- Team tools: events ------------------------------------------------------

fn parse_event_type(s: &str) -> Result<EventType, String> {
    serde_json::from_value(json!(s)).map_err(|_| format!("invalid event type '{s}'"))
}

fn team_append_event(ctx: &ToolContext, args: &Value) -> Result<Value, String> {
    let (store, team) = team_store(ctx, args)?;
    let event_type = parse_event_type(str_arg(args, "event_type")?)?;
    let event = store
        .append_team_event(
            &team,
            NewTeamEvent {
                event_type,
                worker: opt_str_arg(args, "worker").unwrap_or_default().to_string(),
                task_id: opt_str_arg(args, "task_id").map(str::to_string),
                message_id: opt_str_arg(args, "message_id").map(str::to_string),
                reason: opt_str_arg(args, "reason").map(str::to_string),
            },
        )
        .map_err(|e| e.to_string())?;
    serde_json::to_value(event).map_err(|e| e.to_string())
}

fn team_read_events(ctx: &ToolContext, args: &Value) -> Result<Value, String> {
    let (store, team) = team_store(ctx, args)?;
    let events = store.read_events(&team).map_err(|e| e.to_string())?;
    serde_json::to_value(events).map_err(|e| e.to_string())
}

// ---- Team tools: shutdown handshake -------------------------------------------

fn team_write_shutdown_request(ctx: &ToolContext, args: &Value) -> Result<Value, String> {
    let (store, team) = team_store(ctx, args)?;
    let worker = worker_name(args, "worker")?;
    let request = ShutdownRequest {
        requested_at: chrono::Utc::now().to_rfc3339(),
        requested_by: str_arg(args, "requested_by")?.to_string(),
        unknown_fields: Default::default(),
    };
    store.write_shutdown_request(&team, &worker, &request).map_err(|e| e.to_string())?;
    serde_json::to_value(request).map_err(|e| e.to_string())
}

fn team_read_shutdown_request(ctx: &ToolContext, args: &Value) -> Result<Value, String> {
    let (store, team) = team_store(ctx, args)?;
    let worker = worker_name(args, "worker")?;
    let request = store.read_shutdown_request(&team, &worker).map_err(|e| e.to_string())?;
    serde_json::to_value(request).map_err(|e| e.to_string())
}

fn team_write_shutdown_ack(ctx: &ToolContext, args: &Value) -> Result<Value, String> {
    let (store, team) = team_store(ctx, args)?;
    let worker = worker_name(args, "worker")?;
    let status_s = str_arg(args, "status")?;
    let status: AckStatus = serde_json::from_value(json!(status_s)).map_err(|_| format!("invalid ack status '{status_s}'"))?;
    let ack = ShutdownAck {
        status,
        reason: opt_str_arg(args, "reason").map(str::to_string),
        updated_at: chrono::Utc::now().to_rfc3339(),
        unknown_fields: Default::default(),
    };
    store.write_shutdown_ack(&team, &worker, &ack).map_err(|e| e.to_string())?;
    serde_json::to_value(ack).map_err(|e| e.to_string())
}

fn team_read_shutdown_ack(ctx: &ToolContext, args: &Value) -> Result<Value, String> {
    let (store, team) = team_store(ctx, args)?;
    let worker = worker_name(args, "worker")?;
    let ack = store.read_shutdown_ack(&team, &worker).map_err(|e| e.to_string())?;
    serde_json::to_value(ack).map_err(|e| e.to_string())
}

// ---- Team tools: snapshots / approvals -----------------------------------------

fn team_read_monitor_snapshot(ctx: &ToolContext, args: &Value) -> Result<Value, String> {
    let (store, team) = team_store(ctx, args)?;
    let snapshot = store.read_monitor_snapshot(&team).map_err(|e| e.to_string())?;
    serde_json::to_value(snapshot).map_err(|e| e.to_string())
}

fn team_write_monitor_snapshot(ctx: &ToolContext, args: &Value) -> Result<Value, String> {
    let (store, team) = team_store(ctx, args)?;
    let snapshot = args
        .get("snapshot")
        .cloned()
        .ok_or_else(|| "missing required argument 'snapshot'".to_string())?;
    let snapshot = serde_json::from_value(snapshot).map_err(|e| e.to_string())?;
    store.write_monitor_snapshot(&team, &snapshot).map_err(|e| e.to_string())?;
    Ok(json!({ "written": true }))
}

fn team_read_approval(ctx: &ToolContext, args: &Value) -> Result<Value, String> {
    let (store, team) = team_store(ctx, args)?;
    let task_id = str_arg(args, "task_id")?;
    let record = store.read_approval(&team, task_id).map_err(|e| e.to_string())?;
    serde_json::to_value(record).map_err(|e| e.to_string())
}

fn team_write_approval(ctx: &ToolContext, args: &Value) -> Result<Value, String> {
    let (store, team) = team_store(ctx, args)?;
    let record = args
        .get("record")
        .cloned()
        .ok_or_else(|| "missing required argument 'record'".to_string())?;
    let record = serde_json::from_value(record).map_err(|e| e.to_string())?;
    store.write_approval(&team, &record).map_err(|e| e.to_string())?;
    Ok(json!({ "written": true }))
}

// ---- Team tools: summary / cleanup ---------------------------------------------

fn team_summary(ctx: &ToolContext, args: &Value) -> Result<Value, String> {
    let (store, team) = team_store(ctx, args)?;
    let config = store
        .read_config(&team)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "team_not_found".to_string())?;
    let tasks = store.list_tasks(&team).map_err(|e| e.to_string())?;

    let mut workers = Vec::new();
    for worker in &config.workers {
        let status = store.read_worker_status(&team, &worker.name).map_err(|e| e.to_string())?;
        workers.push(json!({
            "name": worker.name,
            "state": status.state.as_wire_string(),
            "current_task_id": status.current_task_id,
        }));
    }

    let pending = tasks.iter().filter(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::Blocked)).count();
    let in_progress = tasks.iter().filter(|t| t.status == TaskStatus::InProgress).count();
    let completed = tasks.iter().filter(|t| t.status == TaskStatus::Completed).count();
    let failed = tasks.iter().filter(|t| t.status == TaskStatus::Failed).count();

    Ok(json!({
        "team": team,
        "task_count": tasks.len(),
        "pending": pending,
        "in_progress": in_progress,
        "completed": completed,
        "failed": failed,
        "workers": workers,
    }))
}

fn team_cleanup(ctx: &ToolContext, args: &Value) -> Result<Value, String> {
    let (store, team) = team_store(ctx, args)?;
    lifecycle::destroy_team(&store, &team).map_err(|e| e.to_string())?;
    Ok(json!({ "removed": true }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use omx_core::config::{DisplayMode as EnvDisplayMode, RuntimeEnv, SendStrategy};
    use omx_core::lifecycle::{start_team, StartTeamRequest};
    use omx_core::schema::LeaderInfo;

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

    fn seed(working_directory: &str, team: &str) {
        let root = StateRoot::new(Path::new(working_directory)).unwrap();
        let store = StateStore::new(root, LockConfig::default());
        start_team(
            &store,
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
    }

    #[test]
    fn unknown_tool_is_reported_as_json_error() {
        let ctx = ToolContext::default();
        let resp = handle(&ctx, &ToolRequest { name: "nonsense".to_string(), arguments: json!({}) });
        assert_eq!(resp.is_error, Some(true));
        assert!(resp.content[0].text.contains("unknown tool"));
    }

    #[test]
    fn state_write_then_read_round_trips_and_preserves_runtime_context() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();

        let first = state_write(&json!({
            "mode": "autopilot",
            "patch": {"active": true, "runtime_context": {"cwd": "/tmp"}}
        }))
        .unwrap();
        assert_eq!(first["runtime_context"]["cwd"], "/tmp");

        let second = state_write(&json!({
            "mode": "autopilot",
            "patch": {"current_phase": "plan"}
        }))
        .unwrap();
        assert_eq!(second["runtime_context"]["cwd"], "/tmp");
        assert_eq!(second["current_phase"], "plan");

        let read_back = state_read(&json!({"mode": "autopilot"})).unwrap();
        assert_eq!(read_back, second);
    }

    #[test]
    fn state_read_rejects_unknown_mode() {
        let err = state_read(&json!({"mode": "not-a-mode"})).unwrap_err();
        assert!(err.contains("unknown mode"));
    }

    #[test]
    fn team_tool_round_trips_task_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let wd = dir.path().to_str().unwrap();
        seed(wd, "alpha");
        let ctx = ToolContext::default();

        let created = team_task_create(
            &ctx,
            &json!({"workingDirectory": wd, "team_name": "alpha", "subject": "s", "description": "d"}),
        )
        .unwrap();
        assert_eq!(created["id"], "1");

        let claimed = team_task_claim(
            &ctx,
            &json!({"workingDirectory": wd, "team_name": "alpha", "id": "1", "worker": "worker-1"}),
        )
        .unwrap();
        assert_eq!(claimed["task"]["status"], "in_progress");
    }

    #[test]
    fn ancestor_walk_finds_team_from_nested_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let wd = dir.path().to_str().unwrap();
        seed(wd, "beta");
        let nested = dir.path().join("src").join("nested");
        std::fs::create_dir_all(&nested).unwrap();

        let ctx = ToolContext::default();
        let result = team_config_read(
            &ctx,
            &json!({"workingDirectory": nested.to_str().unwrap(), "team_name": "beta"}),
        )
        .unwrap();
        assert_eq!(result["name"], "beta");
    }
}
