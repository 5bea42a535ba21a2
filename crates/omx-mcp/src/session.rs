//! Session lifecycle hooks run around each leader launch.
//!
//! Every step here is independently fault-isolated: a failure is logged at
//! `warn` and swallowed, never propagated to the launch path. A partially
//! failed pre-launch (say, a stale session.json that couldn't be removed)
//! must not block the new session from starting.

use omx_core::io::{read_json, write_json_atomic};
use omx_core::paths::StateRoot;
use omx_orchestrator::overlay::{self, OverlayContext};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub started_at: String,
    pub project: String,
    pub pid: u32,
    pub instructions_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionHistoryEntry {
    session_id: String,
    started_at: String,
    ended_at: String,
    project: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct SessionHistory {
    #[serde(default)]
    entries: Vec<SessionHistoryEntry>,
}

#[cfg(unix)]
fn pid_is_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
fn pid_is_alive(_pid: u32) -> bool {
    true
}

fn history_path(root: &StateRoot) -> std::path::PathBuf {
    root.root().join("session-history.json")
}

/// Everything needed to (re)generate a launch's instructions file.
pub struct LaunchInputs<'a> {
    pub project: &'a str,
    pub session_id: &'a str,
    pub instructions_path: &'a Path,
    pub overlay_ctx: &'a OverlayContext,
}

/// Run the full pre-launch sequence: stale-session cleanup, a fresh
/// `session.json`, and a freshly generated+applied instructions file.
/// Each sub-step is isolated; one failing does not skip the others.
pub fn pre_launch(root: &StateRoot, inputs: &LaunchInputs<'_>, now: &str) {
    cleanup_stale_session(root);
    write_session_record(root, inputs, now);
    write_instructions(inputs, now);
}

/// Run the full post-launch sequence: strip the instructions file, archive
/// the session, and cancel any modes left active under this session.
pub fn post_launch(root: &StateRoot, now: &str) {
    let record = strip_instructions_and_load_record(root);
    archive_session(root, record.as_ref(), now);
    if let Some(record) = &record {
        cancel_active_modes(root, &record.session_id, now);
    }
    remove_session_json(root);
}

fn cleanup_stale_session(root: &StateRoot) {
    let path = root.session_json();
    let existing: Option<SessionRecord> = match read_json(&path) {
        Ok(v) => v,
        Err(err) => {
            tracing::warn!(%err, "pre-launch: failed reading session.json, treating as absent");
            return;
        }
    };
    let Some(record) = existing else {
        return;
    };
    if pid_is_alive(record.pid) {
        return;
    }
    tracing::info!(
        session_id = %record.session_id,
        pid = record.pid,
        "pre-launch: removing stale prior session"
    );
    strip_overlay_file(Path::new(&record.instructions_path));
    if let Err(err) = std::fs::remove_file(&path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(%err, "pre-launch: failed removing stale session.json");
        }
    }
}

fn write_session_record(root: &StateRoot, inputs: &LaunchInputs<'_>, now: &str) {
    let record = SessionRecord {
        session_id: inputs.session_id.to_string(),
        started_at: now.to_string(),
        project: inputs.project.to_string(),
        pid: std::process::id(),
        instructions_path: inputs.instructions_path.display().to_string(),
    };
    if let Err(err) = write_json_atomic(&root.session_json(), &record) {
        tracing::warn!(%err, "pre-launch: failed writing session.json");
    }
}

fn write_instructions(inputs: &LaunchInputs<'_>, now: &str) {
    let overlay_text = overlay::generate(inputs.overlay_ctx, now);
    let existing = std::fs::read_to_string(inputs.instructions_path).unwrap_or_default();
    let applied = overlay::apply(&existing, &overlay_text);
    if let Err(err) = std::fs::write(inputs.instructions_path, applied) {
        tracing::warn!(
            path = %inputs.instructions_path.display(),
            %err,
            "pre-launch: failed writing instructions file"
        );
    }
}

fn strip_overlay_file(path: &Path) {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return;
    };
    let stripped = overlay::strip(&contents);
    if let Err(err) = std::fs::write(path, stripped) {
        tracing::warn!(path = %path.display(), %err, "failed stripping runtime overlay");
    }
}

fn strip_instructions_and_load_record(root: &StateRoot) -> Option<SessionRecord> {
    let record: Option<SessionRecord> = match read_json(&root.session_json()) {
        Ok(v) => v,
        Err(err) => {
            tracing::warn!(%err, "post-launch: failed reading session.json");
            None
        }
    };
    if let Some(record) = &record {
        strip_overlay_file(Path::new(&record.instructions_path));
    }
    record
}

fn archive_session(root: &StateRoot, record: Option<&SessionRecord>, now: &str) {
    let Some(record) = record else {
        return;
    };
    let path = history_path(root);
    let mut history: SessionHistory = match read_json(&path) {
        Ok(Some(h)) => h,
        Ok(None) => SessionHistory::default(),
        Err(err) => {
            tracing::warn!(%err, "post-launch: failed reading session-history.json, starting fresh");
            SessionHistory::default()
        }
    };
    history.entries.push(SessionHistoryEntry {
        session_id: record.session_id.clone(),
        started_at: record.started_at.clone(),
        ended_at: now.to_string(),
        project: record.project.clone(),
    });
    if let Err(err) = write_json_atomic(&path, &history) {
        tracing::warn!(%err, "post-launch: failed writing session-history.json");
    }
}

fn cancel_active_modes(root: &StateRoot, session_id: &str, now: &str) {
    for mode in crate::tools::MODES {
        let path = root.scoped_session_state_file(session_id, mode);
        let mut value: serde_json::Value = match read_json(&path) {
            Ok(Some(v)) => v,
            Ok(None) => continue,
            Err(err) => {
                tracing::warn!(%err, mode = %mode, "post-launch: failed reading mode state, skipping");
                continue;
            }
        };
        let is_active = value.get("active").and_then(|v| v.as_bool()).unwrap_or(false);
        if !is_active {
            continue;
        }
        if let Some(obj) = value.as_object_mut() {
            obj.insert("active".to_string(), serde_json::Value::Bool(false));
            obj.insert("completed_at".to_string(), serde_json::Value::String(now.to_string()));
        }
        if let Err(err) = write_json_atomic(&path, &value) {
            tracing::warn!(%err, mode = %mode, "post-launch: failed writing cancelled mode state");
        }
    }
}

fn remove_session_json(root: &StateRoot) {
    let path = root.session_json();
    if let Err(err) = std::fs::remove_file(&path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(%err, "post-launch: failed removing session.json");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> OverlayContext {
        OverlayContext {
            session_id: "s1".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn pre_launch_writes_session_json_and_instructions() {
        let dir = tempfile::tempdir().unwrap();
        let root = StateRoot::new(dir.path()).unwrap();
        let instructions = dir.path().join("AGENTS.md");
        std::fs::write(&instructions, "# base instructions\n").unwrap();

        pre_launch(
            &root,
            &LaunchInputs {
                project: "demo",
                session_id: "s1",
                instructions_path: &instructions,
                overlay_ctx: &ctx(),
            },
            "2026-01-01T00:00:00Z",
        );

        let record: SessionRecord = read_json(&root.session_json()).unwrap().unwrap();
        assert_eq!(record.session_id, "s1");
        assert_eq!(record.pid, std::process::id());

        let contents = std::fs::read_to_string(&instructions).unwrap();
        assert!(contents.contains("base instructions"));
        assert!(contents.contains(overlay::RUNTIME_START));
    }

    #[test]
    fn stale_session_with_dead_pid_is_cleaned_up_before_new_launch() {
        let dir = tempfile::tempdir().unwrap();
        let root = StateRoot::new(dir.path()).unwrap();
        let instructions = dir.path().join("AGENTS.md");
        std::fs::write(&instructions, "# base\n").unwrap();

        let stale = SessionRecord {
            session_id: "old".to_string(),
            started_at: "2020-01-01T00:00:00Z".to_string(),
            project: "demo".to_string(),
            pid: 999_999_999,
            instructions_path: instructions.display().to_string(),
        };
        write_json_atomic(&root.session_json(), &stale).unwrap();
        let overlay_text = overlay::generate(&ctx(), "2020-01-01T00:00:00Z");
        std::fs::write(&instructions, overlay::apply("# base\n", &overlay_text)).unwrap();

        pre_launch(
            &root,
            &LaunchInputs {
                project: "demo",
                session_id: "new",
                instructions_path: &instructions,
                overlay_ctx: &ctx(),
            },
            "2026-01-01T00:00:00Z",
        );

        let record: SessionRecord = read_json(&root.session_json()).unwrap().unwrap();
        assert_eq!(record.session_id, "new");
        let contents = std::fs::read_to_string(&instructions).unwrap();
        assert_eq!(contents.matches(overlay::RUNTIME_START).count(), 1);
    }

    #[test]
    fn post_launch_strips_archives_and_removes_session_json() {
        let dir = tempfile::tempdir().unwrap();
        let root = StateRoot::new(dir.path()).unwrap();
        let instructions = dir.path().join("AGENTS.md");
        std::fs::write(&instructions, "# base\n").unwrap();

        pre_launch(
            &root,
            &LaunchInputs {
                project: "demo",
                session_id: "s1",
                instructions_path: &instructions,
                overlay_ctx: &ctx(),
            },
            "2026-01-01T00:00:00Z",
        );

        let mode_path = root.scoped_session_state_file("s1", "autopilot");
        write_json_atomic(&mode_path, &serde_json::json!({"active": true})).unwrap();

        post_launch(&root, "2026-01-01T01:00:00Z");

        assert!(read_json::<SessionRecord>(&root.session_json()).unwrap().is_none());
        let contents = std::fs::read_to_string(&instructions).unwrap();
        assert!(!contents.contains(overlay::RUNTIME_START));

        let history: SessionHistory = read_json(&history_path(&root)).unwrap().unwrap();
        assert_eq!(history.entries.len(), 1);
        assert_eq!(history.entries[0].session_id, "s1");

        let mode_state: serde_json::Value = read_json(&mode_path).unwrap().unwrap();
        assert_eq!(mode_state["active"], false);
        assert_eq!(mode_state["completed_at"], "2026-01-01T01:00:00Z");
    }
}
