//! Typed error categories for the state store and task lifecycle.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by state/task/claim/mailbox mutations.
///
/// Variants map 1:1 onto the stringly-tagged error categories on the wire
/// (see `category()`), so a caller across a process boundary can recover the
/// same taxonomy from a serialized tool response.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("invalid team name: {name}")]
    InvalidTeamName { name: String },

    #[error("invalid status: {status}")]
    InvalidStatus { status: String },

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("task not found: {id}")]
    TaskNotFound { id: String },

    #[error("team not found: {team}")]
    TeamNotFound { team: String },

    #[error("claim conflict on task {id}: {reason}")]
    ClaimConflict { id: String, reason: String },

    #[error("task {id} blocked on dependencies: {dependencies:?}")]
    BlockedDependency { id: String, dependencies: Vec<String> },

    #[error("worker notify failed: {reason}")]
    WorkerNotifyFailed { reason: String },

    #[error("worker assignment failed: {reason}")]
    WorkerAssignmentFailed { reason: String },

    #[error("plan approval required for task {id}")]
    PlanApprovalRequired { id: String },

    #[error("delegation_only policy forbids assigning to {worker}")]
    DelegationOnlyViolation { worker: String },

    #[error("shutdown rejected by {worker}: {reason}")]
    ShutdownRejected { worker: String, reason: String },

    #[error("nested team disallowed")]
    NestedTeamDisallowed,

    #[error("leader session conflict: team {team} already active for this session")]
    LeaderSessionConflict { team: String },

    #[error("lock timeout on {path} after {waited_ms}ms")]
    LockTimeout { path: PathBuf, waited_ms: u64 },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StateError {
    /// The stringly-tagged category used on the wire (tool responses, logs).
    pub fn category(&self) -> String {
        match self {
            Self::InvalidTeamName { .. } => "invalid_team_name".to_string(),
            Self::InvalidStatus { .. } => "invalid_status".to_string(),
            Self::InvalidTransition { .. } => "invalid_transition".to_string(),
            Self::TaskNotFound { .. } => "task_not_found".to_string(),
            Self::TeamNotFound { .. } => "team_not_found".to_string(),
            Self::ClaimConflict { .. } => "claim_conflict".to_string(),
            Self::BlockedDependency { .. } => "blocked_dependency".to_string(),
            Self::WorkerNotifyFailed { .. } => "worker_notify_failed".to_string(),
            Self::WorkerAssignmentFailed { reason } => {
                format!("worker_assignment_failed:{reason}")
            }
            Self::PlanApprovalRequired { .. } => "plan_approval_required".to_string(),
            Self::DelegationOnlyViolation { .. } => "delegation_only_violation".to_string(),
            Self::ShutdownRejected { worker, reason } => {
                format!("shutdown_rejected:{worker}:{reason}")
            }
            Self::NestedTeamDisallowed => "nested_team_disallowed".to_string(),
            Self::LeaderSessionConflict { .. } => "leader_session_conflict".to_string(),
            Self::LockTimeout { .. } => "lock_timeout".to_string(),
            Self::Io { .. } => "io_error".to_string(),
            Self::Json { .. } => "json_error".to_string(),
        }
    }
}

pub type StateResult<T> = Result<T, StateError>;
