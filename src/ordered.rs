use std::{
    fmt,
    sync::{Arc, OnceLock},
};

use tracing::{debug, warn};

use crate::{
    error::ReplyError,
    message::{GroupId, Reply, Request},
    pending::{PendingEntry, PendingRequest},
    refcount::RefCounted,
    registry::StreamRegistry,
    stream::{RequestStream, StreamCore},
    window::SlidingWindow,
};

/// The replication group an ordered stream serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupBinding {
    /// No request accepted yet.
    Unbound,
    Bound(GroupId),
}

impl GroupBinding {
    /// Whether tearing down `group` concerns this stream. An unbound stream
    /// could end up in any group, so it matches every group.
    pub fn matches(&self, group: GroupId) -> bool {
        match self {
            Self::Unbound => true,
            Self::Bound(bound) => *bound == group,
        }
    }
}

/// A client stream whose replies go out in sequence number order.
pub struct OrderedStream {
    core: StreamCore,
    window: SlidingWindow,
    group: OnceLock<GroupId>,
    registry: Arc<StreamRegistry>,
}

impl OrderedStream {
    pub(crate) fn new(core: StreamCore, capacity: usize, registry: Arc<StreamRegistry>) -> Self {
        Self {
            window: SlidingWindow::new(core.name(), capacity),
            core,
            group: OnceLock::new(),
            registry,
        }
    }

    pub fn group_binding(&self) -> GroupBinding {
        match self.group.get() {
            Some(&group) => GroupBinding::Bound(group),
            None => GroupBinding::Unbound,
        }
    }

    /// Number of requests still waiting in the window.
    pub fn outstanding(&self) -> usize {
        self.window.len()
    }

    fn submit_pending(self: &Arc<Self>, pending: &PendingRequest, rejected: &mut Vec<(u64, Reply)>) {
        let seq_num = pending.seq_num();
        if let Some(cause) = pending.rejection() {
            rejected.push((seq_num, Reply::failure(pending.request().header, cause.clone())));
            return;
        }
        let this = self.clone();
        self.core.submit(pending.request().clone(), move |reply| {
            this.receive_reply(seq_num, reply)
        });
    }

    fn receive_reply(&self, seq_num: u64, reply: Reply) {
        if self
            .window
            .receive_reply(seq_num, reply, |entry| self.send_reply(entry))
        {
            self.close(true)
        }
    }

    fn send_reply(&self, ready: PendingEntry) {
        assert!(ready.has_reply());
        match ready {
            // closing happens once the window lets go of its lock
            PendingEntry::EndOfStream => debug!(stream = %self.core.name(), "end of stream drained"),
            PendingEntry::Request(pending) => {
                let seq_num = pending.seq_num();
                let Some(reply) = pending.into_reply() else {
                    unreachable!()
                };
                debug!(stream = %self.core.name(), seq_num, %reply, "send reply");
                self.core.response_next(reply)
            }
        }
    }

    /// Closes the stream, with a completion signal if `complete`. Idempotent.
    pub fn close(&self, complete: bool) {
        if self.core.set_close() {
            debug!(stream = %self.core.name(), complete, "close");
            if complete {
                self.core.response_completed();
            }
            self.cleanup();
        }
    }
}

impl RequestStream for OrderedStream {
    fn core(&self) -> &StreamCore {
        &self.core
    }

    fn process_client_request(
        self: &Arc<Self>,
        request: &RefCounted<Request>,
    ) -> crate::Result<()> {
        let request = request.retain();
        if self.core.is_closed() {
            return Err(ReplyError::AlreadyClosed {
                stream: self.core.name().into(),
            }
            .into());
        }

        let request_group = request.header.group_id;
        // the first request decides the group of the stream
        let stream_group = *self.group.get_or_init(|| request_group);
        let pending = if request_group == stream_group {
            PendingRequest::new(request)
        } else {
            let cause = ReplyError::GroupMismatch {
                stream: self.core.name().into(),
                client_id: request.header.client_id,
                request_group,
                stream_group,
            };
            debug!(stream = %self.core.name(), %cause, "group mismatch");
            PendingRequest::rejected(request, cause)
        };

        let mut rejected = Vec::new();
        self.window
            .received_request(pending, |pending| self.submit_pending(pending, &mut rejected))?;
        for (seq_num, reply) in rejected {
            self.receive_reply(seq_num, reply)
        }
        Ok(())
    }

    fn on_completed(self: &Arc<Self>) {
        if self
            .window
            .end_of_requests(|entry| self.send_reply(entry))
        {
            self.close(true)
        }
    }

    fn on_error(self: &Arc<Self>, err: crate::Error) {
        warn!(stream = %self.core.name(), %err, "on_error");
        self.close(false)
    }

    fn cleanup(&self) {
        self.window.close();
        self.registry.deregister(self.core.id());
    }
}

impl fmt::Debug for OrderedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedStream")
            .field("name", &self.core.name())
            .field("group", &self.group_binding())
            .field("closed", &self.core.is_closed())
            .finish()
    }
}
