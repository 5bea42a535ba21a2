//! Error categories for adapter, bootstrap, monitor and shutdown operations.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("pane {pane_id} is unavailable: {reason}")]
    PaneUnavailable { pane_id: String, reason: String },

    #[error("adapter command failed: {reason}")]
    CommandFailed { reason: String },

    #[error("trigger message rejected: {reason}")]
    TriggerRejected { reason: String },

    #[error("refused to operate on protected pane {pane_id}")]
    ProtectedPane { pane_id: String },
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    State(#[from] omx_core::StateError),

    #[error("worker_notify_failed: {reason}")]
    WorkerNotifyFailed { reason: String },

    #[error("worker pane never became ready within the configured timeout")]
    ReadyTimeout,
}

impl DispatchError {
    pub fn category(&self) -> String {
        match self {
            Self::Adapter(_) => "worker_notify_failed".to_string(),
            Self::State(source) => source.category(),
            Self::WorkerNotifyFailed { reason } => format!("worker_notify_failed:{reason}"),
            Self::ReadyTimeout => "worker_notify_failed:ready_timeout".to_string(),
        }
    }
}
