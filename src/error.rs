use derive_more::Display;

use crate::message::{ClientId, GroupId};

/// Failure carried inside a [`Reply`](crate::Reply), correlated to the request
/// it answers.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum ReplyError {
    #[display(
        fmt = "{}: the group ({}) of {} does not match the group ({}) of the stream",
        stream,
        request_group,
        client_id,
        stream_group
    )]
    GroupMismatch {
        stream: String,
        client_id: ClientId,
        request_group: GroupId,
        stream_group: GroupId,
    },
    #[display(fmt = "{}: the stream is closed", stream)]
    AlreadyClosed { stream: String },
    /// Replication engine failure, e.g. not leader or engine gone.
    #[display(fmt = "raft: {}", message)]
    Raft { message: String },
    #[display(fmt = "state machine: {}", message)]
    StateMachine { message: String },
}

impl std::error::Error for ReplyError {}

impl ReplyError {
    pub fn is_already_closed(&self) -> bool {
        matches!(self, Self::AlreadyClosed { .. })
    }
}

/// Transport-level error signal that terminates a stream.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum Status {
    #[display(fmt = "rejected: {}", _0)]
    Rejected(ReplyError),
    #[display(fmt = "internal: {}", _0)]
    Internal(String),
}

impl Status {
    /// Looks through context layers for the fault that actually happened.
    pub fn from_error(err: &crate::Error) -> Self {
        if let Some(cause) = err.chain().find_map(|cause| cause.downcast_ref::<ReplyError>()) {
            return Self::Rejected(cause.clone());
        }
        Self::Internal(err.root_cause().to_string())
    }
}
