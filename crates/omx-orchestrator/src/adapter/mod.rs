//! `MultiplexerAdapter`: the capability surface the orchestrator drives to
//! spawn and talk to worker panes. Two implementations ship: [`tmux::TmuxAdapter`]
//! against a real tmux server, and [`mock::MockAdapter`] for tests.

pub mod guard;
pub mod mock;
pub mod tmux;

use crate::error::AdapterError;
use async_trait::async_trait;

/// One pane as reported by `listPanes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneInfo {
    pub pane_id: String,
    pub current_command: String,
    pub start_command: String,
}

/// Options for `splitPane`.
#[derive(Debug, Clone, Default)]
pub struct SplitOpts {
    pub vertical: bool,
    pub size_percent: Option<u8>,
    pub start_command: Option<String>,
}

/// A non-literal control key understood by `sendKeys`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKey {
    /// Submit the current line (Enter).
    SubmitLine,
    /// Interrupt the running program (Ctrl-C).
    Interrupt,
    /// Tab, used to cycle UI focus before a submit.
    Tab,
}

/// Capability surface a transport must provide for the core to drive worker
/// panes. The adapter distinguishes a literal text send (no shell
/// metacharacter interpretation) from a control-key send.
#[async_trait]
pub trait MultiplexerAdapter: Send + Sync {
    async fn list_panes(&self, target: &str) -> Result<Vec<PaneInfo>, AdapterError>;

    async fn split_pane(&self, target: &str, opts: &SplitOpts) -> Result<String, AdapterError>;

    /// No-op if the pane is already absent.
    async fn kill_pane(&self, pane_id: &str) -> Result<(), AdapterError>;

    async fn send_keys_literal(&self, pane_id: &str, text: &str) -> Result<(), AdapterError>;

    async fn send_keys_control(&self, pane_id: &str, key: ControlKey) -> Result<(), AdapterError>;

    async fn capture_pane(&self, pane_id: &str, last_n_lines: u32) -> Result<String, AdapterError>;

    async fn is_pane_alive(&self, pane_id: &str) -> Result<bool, AdapterError>;

    async fn get_pane_pid(&self, pane_id: &str) -> Result<Option<u32>, AdapterError>;

    /// The pane the calling (leader) process is itself running in, when
    /// discoverable.
    async fn current_leader_pane_id(&self) -> Result<Option<String>, AdapterError>;
}
