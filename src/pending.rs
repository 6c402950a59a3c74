use std::{fmt, sync::OnceLock};

use crate::{
    error::ReplyError,
    message::{Reply, Request},
    refcount::Retained,
};

/// An ordered request waiting in the sliding window, first for submission and
/// then for its reply to be emitted.
pub struct PendingRequest {
    request: Retained<Request>,
    reply: OnceLock<Reply>,
    rejection: Option<ReplyError>,
}

impl PendingRequest {
    pub fn new(request: Retained<Request>) -> Self {
        Self {
            request,
            reply: OnceLock::new(),
            rejection: None,
        }
    }

    /// A request that keeps its place in the window but is answered with
    /// `cause` instead of being submitted.
    pub fn rejected(request: Retained<Request>, cause: ReplyError) -> Self {
        Self {
            rejection: Some(cause),
            ..Self::new(request)
        }
    }

    pub fn request(&self) -> &Retained<Request> {
        &self.request
    }

    pub fn rejection(&self) -> Option<&ReplyError> {
        self.rejection.as_ref()
    }

    pub fn seq_num(&self) -> u64 {
        self.request.seq_num()
    }

    pub fn is_first(&self) -> bool {
        self.request.is_first()
    }

    pub fn has_reply(&self) -> bool {
        self.reply.get().is_some()
    }

    pub fn reply(&self) -> Option<&Reply> {
        self.reply.get()
    }

    pub fn set_reply(&self, reply: Reply) {
        if let Err(reply) = self.reply.set(reply) {
            panic!(
                "reply is already set: request={}, reply={}, rejected={reply}",
                *self.request,
                self.reply.get().map(ToString::to_string).unwrap_or_default()
            )
        }
    }

    pub fn fail(&self, cause: ReplyError) {
        self.set_reply(Reply::failure(self.request.header, cause))
    }

    /// Gives up the retained request and hands out the reply.
    pub fn into_reply(self) -> Option<Reply> {
        let Self { request, reply, .. } = self;
        drop(request);
        reply.into_inner()
    }
}

impl fmt::Display for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reply() {
            Some(reply) => write!(f, "{}:{reply}", self.seq_num()),
            None => write!(f, "{}:pending", self.seq_num()),
        }
    }
}

pub enum PendingEntry {
    Request(PendingRequest),
    /// No more requests will arrive on the stream. Sorts after every real
    /// entry and counts as replied, so draining stops right after it.
    EndOfStream,
}

impl PendingEntry {
    pub fn seq_num(&self) -> u64 {
        match self {
            Self::Request(pending) => pending.seq_num(),
            Self::EndOfStream => u64::MAX,
        }
    }

    pub fn has_reply(&self) -> bool {
        match self {
            Self::Request(pending) => pending.has_reply(),
            Self::EndOfStream => true,
        }
    }

    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }
}

impl fmt::Display for PendingEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request(pending) => pending.fmt(f),
            Self::EndOfStream => write!(f, "COMPLETED"),
        }
    }
}
