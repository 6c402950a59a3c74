//! Seam to the replication engine.
//!
//! Streams hand each request over together with a [`Promise`] and await it on
//! a completion task. The engine keeps the request retained for as long as it
//! needs the payload and resolves the promise with a reply, which may itself
//! carry a failure. A promise dropped unresolved, or a stopped engine, fails
//! the submission.

use tokio::sync::oneshot;

use crate::{
    message::{Reply, Request},
    model::{event_channel, EventSender, EventSource},
    refcount::Retained,
};

#[derive(Debug)]
pub struct Promise(oneshot::Sender<Reply>);

impl Promise {
    pub fn resolve(self, reply: Reply) -> crate::Result<()> {
        self.0
            .send(reply)
            .map_err(|reply| crate::err!("submission of {reply} abandoned"))
    }
}

pub type Submission = (Retained<Request>, Promise);

#[derive(Clone)]
pub struct Engine(EventSender<Submission>);

impl Engine {
    pub async fn submit(&self, request: Retained<Request>) -> crate::Result<Reply> {
        let (sender, receiver) = oneshot::channel();
        self.0.send((request, Promise(sender)))?;
        receiver
            .await
            .map_err(|_| crate::err!("engine dropped the submission"))
    }
}

pub type EngineSource = EventSource<Submission>;

pub fn engine_channel() -> (Engine, EngineSource) {
    let (sender, source) = event_channel();
    (Engine(sender), source)
}
