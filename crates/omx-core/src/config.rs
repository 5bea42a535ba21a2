//! Ambient configuration: an `omx.toml` tunables file plus an explicit
//! `RuntimeEnv` struct capturing process environment at construction time.
//!
//! Design note: rather than reading `std::env::var` scattered across the
//! call graph, every env-sensitive entry point takes a `RuntimeEnv` value.
//! Tests construct one directly instead of mutating process environment.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Operator-tunable defaults, read from `<project>/omx.toml`. Any value not
/// present in the file falls back to the built-in default; an explicit
/// environment variable (see [`RuntimeEnv`]) takes precedence over both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub core: CoreConfig,
    #[serde(default)]
    pub locks: LockConfig,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            core: CoreConfig::default(),
            locks: LockConfig::default(),
            bootstrap: BootstrapConfig::default(),
        }
    }
}

impl Config {
    /// Load `<project>/omx.toml`, falling back to defaults if absent or
    /// unparseable. Never fails the caller; a malformed config is logged
    /// and treated as absent, matching the state store's "parse failure is
    /// absence" posture.
    pub fn load(project_root: &Path) -> Self {
        let path = project_root.join("omx.toml");
        match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|err| {
                tracing::warn!(path = %path.display(), %err, "ignoring malformed omx.toml");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Max concurrent workers per team, hard-ceilinged at 20 regardless of
    /// this value.
    #[serde(default = "default_max_workers")]
    pub max_workers_ceiling: u32,
    /// Default claim lease duration in seconds.
    #[serde(default = "default_claim_lease_secs")]
    pub claim_lease_secs: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_workers_ceiling: default_max_workers(),
            claim_lease_secs: default_claim_lease_secs(),
        }
    }
}

fn default_max_workers() -> u32 {
    20
}

fn default_claim_lease_secs() -> u64 {
    15 * 60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_write_lock_timeout_ms")]
    pub write_lock_timeout_ms: u64,
    #[serde(default = "default_write_lock_stale_secs")]
    pub write_lock_stale_secs: u64,
    #[serde(default = "default_team_lock_stale_secs")]
    pub team_lock_stale_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            write_lock_timeout_ms: default_write_lock_timeout_ms(),
            write_lock_stale_secs: default_write_lock_stale_secs(),
            team_lock_stale_secs: default_team_lock_stale_secs(),
        }
    }
}

fn default_write_lock_timeout_ms() -> u64 {
    5_000
}

fn default_write_lock_stale_secs() -> u64 {
    30
}

fn default_team_lock_stale_secs() -> u64 {
    5 * 60
}

impl LockConfig {
    pub fn write_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.write_lock_timeout_ms)
    }

    pub fn write_lock_stale(&self) -> Duration {
        Duration::from_secs(self.write_lock_stale_secs)
    }

    pub fn team_lock_stale(&self) -> Duration {
        Duration::from_secs(self.team_lock_stale_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default = "default_mailbox_retry_horizon_secs")]
    pub mailbox_retry_horizon_secs: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            mailbox_retry_horizon_secs: default_mailbox_retry_horizon_secs(),
        }
    }
}

fn default_mailbox_retry_horizon_secs() -> u64 {
    15
}

/// Submission strategy for delivering a trigger message to a worker pane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendStrategy {
    Auto,
    Queue,
    Interrupt,
}

impl std::str::FromStr for SendStrategy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queue" => Ok(Self::Queue),
            "interrupt" => Ok(Self::Interrupt),
            _ => Ok(Self::Auto),
        }
    }
}

/// Explicit capture of the process environment variables listed in the
/// external interfaces section, read once at process start and threaded
/// through constructors rather than re-read ad hoc.
#[derive(Debug, Clone)]
pub struct RuntimeEnv {
    pub team_worker: Option<String>,
    pub ready_timeout_ms: u64,
    pub skip_ready_wait: bool,
    pub mouse_enabled: bool,
    pub send_strategy: SendStrategy,
    pub strict_submit: bool,
    pub auto_trust: bool,
    pub all_idle_cooldown_ms: u64,
    pub session_id: Option<String>,
    pub display_mode: DisplayMode,
    pub approval_mode: String,
    pub sandbox_mode: String,
    pub network_access: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    SplitPane,
    Auto,
}

impl RuntimeEnv {
    /// Read the environment variables documented in the external interfaces
    /// section, applying the documented defaults.
    pub fn from_process_env() -> Self {
        let ready_timeout_ms = std::env::var("OMX_TEAM_READY_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(|v| v.max(5_000))
            .unwrap_or(45_000);

        let skip_ready_wait = env_flag("OMX_TEAM_SKIP_READY_WAIT");
        let mouse_enabled = std::env::var("OMX_TEAM_MOUSE").ok().as_deref() != Some("0");
        let send_strategy = std::env::var("OMX_TEAM_SEND_STRATEGY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(SendStrategy::Auto);
        let strict_submit = env_flag("OMX_TEAM_STRICT_SUBMIT");
        let auto_trust = std::env::var("OMX_TEAM_AUTO_TRUST").ok().as_deref() != Some("0");
        let all_idle_cooldown_ms = std::env::var("OMX_TEAM_ALL_IDLE_COOLDOWN_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(500);
        let session_id = std::env::var("OMX_SESSION_ID")
            .ok()
            .or_else(|| std::env::var("CODEX_SESSION_ID").ok());
        let display_mode = match std::env::var("OMX_TEAM_DISPLAY_MODE").ok().as_deref() {
            Some("tmux") | Some("in_process") => DisplayMode::SplitPane,
            _ => DisplayMode::Auto,
        };
        let approval_mode =
            std::env::var("OMX_APPROVAL_MODE").unwrap_or_else(|_| "unknown".to_string());
        let sandbox_mode =
            std::env::var("OMX_SANDBOX_MODE").unwrap_or_else(|_| "unknown".to_string());
        let network_access = std::env::var("OMX_NETWORK_ACCESS").ok().as_deref() != Some("0");

        Self {
            team_worker: std::env::var("OMX_TEAM_WORKER").ok().filter(|v| !v.is_empty()),
            ready_timeout_ms,
            skip_ready_wait,
            mouse_enabled,
            send_strategy,
            strict_submit,
            auto_trust,
            all_idle_cooldown_ms,
            session_id,
            display_mode,
            approval_mode,
            sandbox_mode,
            network_access,
        }
    }

    /// `true` when this process is a worker process (disallows starting a
    /// nested team, per `nested_team_disallowed`).
    pub fn is_worker(&self) -> bool {
        self.team_worker.is_some()
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).ok().as_deref() == Some("1")
}
