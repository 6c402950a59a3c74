//! What ordered and unordered client streams have in common: decoding and
//! wrapping inbound requests, submitting them to the replication engine,
//! serialized outbound emission and the close latch.

use std::sync::{
    atomic::{AtomicBool, Ordering::SeqCst},
    Arc, Mutex,
};

use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::{
    engine::Engine,
    error::{ReplyError, Status},
    message::{Frame, Reply, Request},
    model::Responder,
    refcount::{RefCounted, Retained},
    task::BackgroundSpawner,
};

struct Outbound {
    responder: Box<dyn Responder>,
    /// Set once completion or an error went out; nothing may follow.
    terminated: bool,
}

pub struct StreamCore {
    id: u64,
    name: String,
    outbound: Mutex<Outbound>,
    is_closed: AtomicBool,
    engine: Engine,
    spawner: BackgroundSpawner,
}

impl StreamCore {
    pub(crate) fn new(
        id: u64,
        name: String,
        responder: Box<dyn Responder>,
        engine: Engine,
        spawner: BackgroundSpawner,
    ) -> Self {
        debug!(stream = %name, "new stream");
        Self {
            id,
            name,
            outbound: Mutex::new(Outbound {
                responder,
                terminated: false,
            }),
            is_closed: AtomicBool::new(false),
            engine,
            spawner,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spawner(&self) -> &BackgroundSpawner {
        &self.spawner
    }

    pub fn response_next(&self, reply: Reply) {
        let mut outbound = self.outbound.lock().unwrap();
        if outbound.terminated {
            trace!(stream = %self.name, %reply, "reply after termination dropped");
            return;
        }
        if let Err(err) = outbound.responder.on_next(reply) {
            debug!(stream = %self.name, %err, "failed to send reply");
        }
    }

    pub fn response_completed(&self) {
        let mut outbound = self.outbound.lock().unwrap();
        if std::mem::replace(&mut outbound.terminated, true) {
            return;
        }
        // the client may be gone already
        if let Err(err) = outbound.responder.on_completed() {
            trace!(stream = %self.name, %err, "failed on_completed, ignored");
        }
    }

    fn response_status(&self, status: Status) {
        let mut outbound = self.outbound.lock().unwrap();
        if std::mem::replace(&mut outbound.terminated, true) {
            return;
        }
        if let Err(err) = outbound.responder.on_error(status) {
            trace!(stream = %self.name, %err, "failed on_error, ignored");
        }
    }

    /// Wins the close latch at most once over the lifetime of the stream.
    pub fn set_close(&self) -> bool {
        self.is_closed
            .compare_exchange(false, true, SeqCst, SeqCst)
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed.load(SeqCst)
    }

    /// Closes the stream with an error signal unless it is closed already.
    pub fn response_error(&self, err: &crate::Error, context: impl FnOnce() -> String) -> bool {
        if !self.set_close() {
            return false;
        }
        let status = Status::from_error(err);
        debug!(stream = %self.name, context = %context(), %status, "failed");
        self.response_status(status);
        true
    }

    /// Submits the request to the replication engine and hands the outcome to
    /// `reply_handler` from a completion task. Engine failures arrive as
    /// failure replies.
    pub fn submit(
        &self,
        request: Retained<Request>,
        reply_handler: impl FnOnce(Reply) + Send + 'static,
    ) -> JoinHandle<()> {
        let engine = self.engine.clone();
        let name = self.name.clone();
        self.spawner.spawn(async move {
            let header = request.header;
            let reply = match engine.submit(request).await {
                Ok(reply) => reply,
                Err(err) => {
                    debug!(stream = %name, call_id = header.call_id, %err, "submission failed");
                    Reply::failure(
                        header,
                        ReplyError::Raft {
                            message: err.to_string(),
                        },
                    )
                }
            };
            reply_handler(reply)
        })
    }
}

/// Inbound half of a client stream, driven by the transport.
pub trait RequestStream
where
    Self: Send + Sync + Sized + 'static,
{
    fn core(&self) -> &StreamCore;

    /// Takes over a freshly decoded request. Whatever needs the request past
    /// this call retains it.
    fn process_client_request(self: &Arc<Self>, request: &RefCounted<Request>)
        -> crate::Result<()>;

    /// The client signalled that no more requests will follow.
    fn on_completed(self: &Arc<Self>);

    /// The transport failed underneath the stream.
    fn on_error(self: &Arc<Self>, err: crate::Error);

    /// Runs once after the stream closed on a fault.
    fn cleanup(&self) {}

    fn id(&self) -> u64 {
        self.core().id()
    }

    fn name(&self) -> &str {
        self.core().name()
    }

    fn is_closed(&self) -> bool {
        self.core().is_closed()
    }

    fn on_next(self: &Arc<Self>, frame: Frame) -> crate::Result<()> {
        let request = match frame.decode() {
            Ok(request) => request,
            Err(err) => {
                let len = frame.len();
                frame.release();
                self.response_error(&err, || format!("decode {len}-byte frame in {}", self.name()));
                return Err(err);
            }
        };
        let request = RefCounted::wrap(request, frame.into_release());
        if let Err(err) = self.process_client_request(&request) {
            let already_closed = err
                .downcast_ref::<ReplyError>()
                .is_some_and(ReplyError::is_already_closed);
            if already_closed {
                debug!(stream = %self.name(), request = %request.get(), "rejected, stream is closed");
            } else {
                self.response_error(&err, || {
                    format!("on_next for {} in {}", request.get(), self.name())
                });
            }
            return Err(err);
        }
        Ok(())
    }

    fn response_error(&self, err: &crate::Error, context: impl FnOnce() -> String) -> bool {
        if self.core().response_error(err, context) {
            self.cleanup();
            true
        } else {
            false
        }
    }
}
