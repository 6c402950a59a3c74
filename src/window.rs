//! Server side of the sliding window protocol.
//!
//! Clients tag ordered requests with consecutive sequence numbers. The window
//! submits them in that order, exactly once each, and puts replies back into
//! that order however the replication engine finishes them.
//!
//! All state sits behind one lock and every callback runs while it is held,
//! which is what keeps concurrent completions from reordering emissions.
//! Callbacks must therefore never call back into the same window.

use std::{collections::BTreeMap, mem::take, sync::Mutex};

use tracing::debug;

use crate::{
    error::ReplyError,
    message::Reply,
    pending::{PendingEntry, PendingRequest},
};

#[derive(Default)]
struct State {
    entries: BTreeMap<u64, PendingEntry>,
    /// Unset until the first request of the stream arrives.
    next_to_process: Option<u64>,
    end_of_requests: bool,
    closed: bool,
}

impl State {
    fn process_requests_from_head(&mut self, mut submit: impl FnMut(&PendingRequest)) {
        let Some(mut next) = self.next_to_process else {
            return;
        };
        while let Some(PendingEntry::Request(pending)) = self.entries.get(&next) {
            submit(pending);
            next += 1;
        }
        self.next_to_process = Some(next)
    }

    fn send_replies_from_head(&mut self, mut emit: impl FnMut(PendingEntry)) -> bool {
        while let Some(head) = self.entries.first_entry() {
            if !head.get().has_reply() {
                return false;
            }
            let entry = head.remove();
            let end = entry.is_end_of_stream();
            emit(entry);
            if end {
                return true;
            }
        }
        false
    }
}

pub struct SlidingWindow {
    name: String,
    capacity: usize,
    state: Mutex<State>,
}

impl SlidingWindow {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            name: name.into(),
            capacity,
            state: Default::default(),
        }
    }

    /// Buffers `pending` and hands every request that is now contiguous with
    /// the submitted prefix to `submit`, in order.
    ///
    /// After end of requests or close this fails with
    /// [`ReplyError::AlreadyClosed`]; anything else it fails with is a
    /// protocol fault of the client.
    pub fn received_request(
        &self,
        pending: PendingRequest,
        submit: impl FnMut(&PendingRequest),
    ) -> crate::Result<()> {
        let mut state = self.state.lock().unwrap();
        let seq_num = pending.seq_num();
        if state.closed || state.end_of_requests {
            debug!(window = %self.name, seq_num, closed = state.closed, "request after end of requests");
            return Err(ReplyError::AlreadyClosed {
                stream: self.name.clone(),
            }
            .into());
        }
        if seq_num == u64::MAX {
            crate::bail!("{}: reserved seq={seq_num}", self.name)
        }
        if state.entries.contains_key(&seq_num) {
            crate::bail!("{}: duplicate request seq={seq_num}", self.name)
        }
        if state.entries.len() >= self.capacity {
            crate::bail!(
                "{}: window is full ({} requests outstanding)",
                self.name,
                state.entries.len()
            )
        }
        let next_to_process = state.next_to_process;
        match next_to_process {
            None if pending.is_first() || seq_num == 0 => {
                if let Some((&held, _)) = state.entries.first_key_value() {
                    if held < seq_num {
                        crate::bail!(
                            "{}: held request seq={held} precedes first request seq={seq_num}",
                            self.name
                        )
                    }
                }
                debug!(window = %self.name, seq_num, "first request");
                state.next_to_process = Some(seq_num)
            }
            Some(next) if seq_num < next => crate::bail!(
                "{}: non-monotonic request seq={seq_num}, expected at least {next}",
                self.name
            ),
            _ => debug!(window = %self.name, seq_num, "got request"),
        }
        state.entries.insert(seq_num, PendingEntry::Request(pending));
        state.process_requests_from_head(submit);
        Ok(())
    }

    /// Records the reply for `seq_num` and emits every reply that is now
    /// ready, lowest sequence number first.
    ///
    /// Returns true once the end-of-stream marker has been emitted.
    pub fn receive_reply(&self, seq_num: u64, reply: Reply, emit: impl FnMut(PendingEntry)) -> bool {
        let mut state = self.state.lock().unwrap();
        match state.entries.get(&seq_num) {
            Some(PendingEntry::Request(pending)) => pending.set_reply(reply),
            _ => {
                debug!(window = %self.name, seq_num, closed = state.closed, "reply for unknown request ignored");
                return false;
            }
        }
        state.send_replies_from_head(emit)
    }

    /// Marks that no more requests will arrive.
    ///
    /// Returns true if nothing is left to emit, so the stream can close right
    /// away. Otherwise the end-of-stream marker is emitted after the last
    /// reply, through [`SlidingWindow::receive_reply`] or this call.
    pub fn end_of_requests(&self, emit: impl FnMut(PendingEntry)) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.end_of_requests {
            return false;
        }
        state.end_of_requests = true;
        if state.entries.is_empty() {
            return true;
        }
        debug!(window = %self.name, outstanding = state.entries.len(), "put end of requests");
        state.entries.insert(u64::MAX, PendingEntry::EndOfStream);
        state.send_replies_from_head(emit)
    }

    /// Drops everything still buffered. Replies arriving later are ignored.
    pub fn close(&self) {
        let entries = {
            let mut state = self.state.lock().unwrap();
            state.closed = true;
            take(&mut state.entries)
        };
        if !entries.is_empty() {
            debug!(window = %self.name, released = entries.len(), "close");
        }
        // release hooks run outside the lock
        drop(entries)
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
