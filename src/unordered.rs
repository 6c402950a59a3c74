use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    error::ReplyError,
    message::Request,
    refcount::RefCounted,
    stream::{RequestStream, StreamCore},
};

#[derive(Default)]
struct InFlight {
    /// call id -> completion task. Sequence numbers are not used here.
    calls: HashMap<u64, JoinHandle<()>>,
    completing: bool,
}

/// A client stream whose replies go out as soon as they are ready.
pub struct UnorderedStream {
    core: StreamCore,
    in_flight: Mutex<InFlight>,
}

impl UnorderedStream {
    pub(crate) fn new(core: StreamCore) -> Self {
        Self {
            core,
            in_flight: Default::default(),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().unwrap().calls.len()
    }
}

impl RequestStream for UnorderedStream {
    fn core(&self) -> &StreamCore {
        &self.core
    }

    fn process_client_request(
        self: &Arc<Self>,
        request: &RefCounted<Request>,
    ) -> crate::Result<()> {
        let request = request.retain();
        let call_id = request.header.call_id;
        let entry = request.header.entry;
        // insertion and completion exclude each other, so a request is either
        // awaited by on_completed or rejected here
        let mut in_flight = self.in_flight.lock().unwrap();
        if in_flight.completing || self.core.is_closed() {
            return Err(ReplyError::AlreadyClosed {
                stream: self.core.name().into(),
            }
            .into());
        }
        if in_flight.calls.contains_key(&call_id) {
            crate::bail!("{}: call #{call_id} is already in flight", self.core.name())
        }
        let this = self.clone();
        let call = self.core.submit(request, move |reply| {
            if !reply.is_success() {
                info!(stream = %this.core.name(), call_id, %entry, %reply, "failed request");
            }
            this.core.response_next(reply);
            this.in_flight.lock().unwrap().calls.remove(&call_id);
        });
        in_flight.calls.insert(call_id, call);
        Ok(())
    }

    fn on_completed(self: &Arc<Self>) {
        let calls = {
            let mut in_flight = self.in_flight.lock().unwrap();
            in_flight.completing = true;
            in_flight.calls.drain().collect::<Vec<_>>()
        };
        debug!(stream = %self.core.name(), in_flight = calls.len(), "completing");
        let this = self.clone();
        self.core.spawner().spawn(async move {
            for (call_id, call) in calls {
                if let Err(err) = call.await {
                    debug!(stream = %this.core.name(), call_id, %err, "call did not settle");
                }
            }
            if this.core.set_close() {
                debug!(stream = %this.core.name(), "close");
                this.core.response_completed();
            }
        });
    }

    fn on_error(self: &Arc<Self>, err: crate::Error) {
        warn!(stream = %self.core.name(), %err, "on_error");
        self.in_flight.lock().unwrap().completing = true;
        self.core.set_close();
    }
}
