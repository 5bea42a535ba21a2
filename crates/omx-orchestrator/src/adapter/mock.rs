//! In-memory adapter for tests: no tmux process required. Records every
//! call and lets tests script pane captures and injected errors.

use super::{ControlKey, MultiplexerAdapter, PaneInfo, SplitOpts};
use crate::error::AdapterError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub enum MockCall {
    ListPanes { target: String },
    SplitPane { target: String },
    KillPane { pane_id: String },
    SendKeysLiteral { pane_id: String, text: String },
    SendKeysControl { pane_id: String, key: ControlKey },
    CapturePane { pane_id: String },
}

#[derive(Default)]
struct MockState {
    calls: Vec<MockCall>,
    panes: HashMap<String, PaneData>,
    next_pane_seq: u32,
    leader_pane_id: Option<String>,
    send_keys_error: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct PaneData {
    alive: bool,
    pid: Option<u32>,
    capture: String,
    current_command: String,
    start_command: String,
}

/// Scriptable in-memory [`MultiplexerAdapter`]. Every listed pane starts
/// alive; tests call [`MockAdapter::set_capture`], [`MockAdapter::kill`], or
/// [`MockAdapter::set_send_keys_error`] to script failure scenarios.
#[derive(Default)]
pub struct MockAdapter {
    state: Mutex<MockState>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_leader_pane(&self, pane_id: impl Into<String>) {
        self.state.lock().unwrap().leader_pane_id = Some(pane_id.into());
    }

    /// Register a pane as alive, as if created by a prior `splitPane`.
    pub fn seed_pane(&self, pane_id: impl Into<String>, pid: u32) {
        let mut state = self.state.lock().unwrap();
        state.panes.insert(
            pane_id.into(),
            PaneData {
                alive: true,
                pid: Some(pid),
                ..Default::default()
            },
        );
    }

    pub fn set_capture(&self, pane_id: &str, text: impl Into<String>) {
        let mut state = self.state.lock().unwrap();
        if let Some(pane) = state.panes.get_mut(pane_id) {
            pane.capture = text.into();
        }
    }

    pub fn kill(&self, pane_id: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(pane) = state.panes.get_mut(pane_id) {
            pane.alive = false;
        }
    }

    pub fn set_send_keys_error(&self, error: Option<String>) {
        self.state.lock().unwrap().send_keys_error = error;
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl MultiplexerAdapter for MockAdapter {
    async fn list_panes(&self, target: &str) -> Result<Vec<PaneInfo>, AdapterError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MockCall::ListPanes { target: target.to_string() });
        Ok(state
            .panes
            .iter()
            .map(|(id, data)| PaneInfo {
                pane_id: id.clone(),
                current_command: data.current_command.clone(),
                start_command: data.start_command.clone(),
            })
            .collect())
    }

    async fn split_pane(&self, target: &str, opts: &SplitOpts) -> Result<String, AdapterError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MockCall::SplitPane { target: target.to_string() });
        state.next_pane_seq += 1;
        let pane_id = format!("%{}", state.next_pane_seq);
        state.panes.insert(
            pane_id.clone(),
            PaneData {
                alive: true,
                pid: Some(10_000 + state.next_pane_seq),
                start_command: opts.start_command.clone().unwrap_or_default(),
                ..Default::default()
            },
        );
        Ok(pane_id)
    }

    async fn kill_pane(&self, pane_id: &str) -> Result<(), AdapterError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MockCall::KillPane { pane_id: pane_id.to_string() });
        if let Some(pane) = state.panes.get_mut(pane_id) {
            pane.alive = false;
        }
        Ok(())
    }

    async fn send_keys_literal(&self, pane_id: &str, text: &str) -> Result<(), AdapterError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MockCall::SendKeysLiteral {
            pane_id: pane_id.to_string(),
            text: text.to_string(),
        });
        if let Some(err) = state.send_keys_error.take() {
            return Err(AdapterError::CommandFailed { reason: err });
        }
        if let Some(pane) = state.panes.get_mut(pane_id) {
            pane.capture.push_str(text);
        }
        Ok(())
    }

    async fn send_keys_control(&self, pane_id: &str, key: ControlKey) -> Result<(), AdapterError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MockCall::SendKeysControl {
            pane_id: pane_id.to_string(),
            key,
        });
        if key == ControlKey::SubmitLine {
            if let Some(pane) = state.panes.get_mut(pane_id) {
                pane.capture.push('\n');
            }
        }
        Ok(())
    }

    async fn capture_pane(&self, pane_id: &str, _last_n_lines: u32) -> Result<String, AdapterError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MockCall::CapturePane { pane_id: pane_id.to_string() });
        Ok(state.panes.get(pane_id).map(|p| p.capture.clone()).unwrap_or_default())
    }

    async fn is_pane_alive(&self, pane_id: &str) -> Result<bool, AdapterError> {
        Ok(self.state.lock().unwrap().panes.get(pane_id).is_some_and(|p| p.alive))
    }

    async fn get_pane_pid(&self, pane_id: &str) -> Result<Option<u32>, AdapterError> {
        Ok(self.state.lock().unwrap().panes.get(pane_id).and_then(|p| p.pid))
    }

    async fn current_leader_pane_id(&self) -> Result<Option<String>, AdapterError> {
        Ok(self.state.lock().unwrap().leader_pane_id.clone())
    }
}
