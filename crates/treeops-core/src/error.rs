use thiserror::Error;

use crate::tree::NodeId;

#[derive(Debug, Error)]
pub enum TreeopsError {
    #[error("not initialized: run 'treeops init'")]
    NotInitialized,

    #[error("service not found: {0}")]
    ServiceNotFound(NodeId),

    #[error("vm not found: {0}")]
    VmNotFound(u64),

    #[error("{0}")]
    AlreadyAttached(String),

    #[error("invalid attachment: {0}")]
    InvalidAttachment(String),

    #[error("resource {resource} is not attached to service {service}")]
    NotAttached { service: NodeId, resource: String },

    #[error("invalid action: {0}")]
    InvalidAction(String),

    #[error("invalid direction: {0} (expected 1 or -1)")]
    InvalidDirection(i8),

    #[error("resources of service {root} are no longer eligible: {}", reasons.join("; "))]
    IneligibleResources { root: NodeId, reasons: Vec<String> },

    #[error("unknown stage method: {0}")]
    UnknownMethod(String),

    #[error("queue entry not found: {0}")]
    EntryNotFound(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("queue {0} is held by another process")]
    QueueBusy(String),

    #[error("event sink error: {0}")]
    EventSink(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TreeopsError>;

/// Failure of a single resource's lifecycle call.
///
/// Kept apart from [`TreeopsError`] so the dispatcher can isolate it per
/// resource instead of propagating it with `?`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResourceError {
    #[error("not eligible: {0}")]
    Ineligible(String),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("nested run failed: {0}")]
    Nested(String),
}
