//! On-disk record types. Every record carries `unknown_fields` via
//! `#[serde(flatten)]` so a sibling tool's extra fields round-trip losslessly
//! even though this crate doesn't interpret them.

mod approval;
mod event;
mod mailbox;
mod shutdown;
mod snapshot;
mod task;
mod team;
mod worker;

pub use approval::{ApprovalRecord, ApprovalStatus};
pub use event::{EventType, NewTeamEvent, TeamEvent};
pub use mailbox::{Mailbox, MailboxMessage};
pub use shutdown::{AckStatus, ShutdownAck, ShutdownRequest};
pub use snapshot::{MonitorSnapshot, SummarySnapshot};
pub use task::{Claim, Task, TaskStatus};
pub use team::{
    DisplayMode, LeaderInfo, Manifest, Permissions, Policy, TeamConfig, WorkerInfo,
    MANIFEST_SCHEMA_VERSION, MAX_WORKERS_ABSOLUTE_CEILING,
};
pub use worker::{Heartbeat, WorkerIdentity, WorkerState, WorkerStatus};
