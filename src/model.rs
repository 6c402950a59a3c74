use derive_more::From;

use crate::{error::Status, message::Reply};

#[derive(Debug, From)]
pub struct EventSource<M>(tokio::sync::mpsc::UnboundedReceiver<M>);

impl<M> EventSource<M> {
    pub async fn next(&mut self) -> crate::Result<M> {
        self.0
            .recv()
            .await
            .ok_or(crate::err!("unexpected source closing"))
    }

    pub fn try_next(&mut self) -> Option<M> {
        self.0.try_recv().ok()
    }
}

#[derive(Debug, From)]
pub struct EventSender<M>(tokio::sync::mpsc::UnboundedSender<M>);

impl<M> Clone for EventSender<M> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<M> EventSender<M> {
    pub fn send(&self, message: M) -> crate::Result<()> {
        self.0
            .send(message)
            .map_err(|_| crate::err!("unexpected event channel closing"))
    }
}

/// A thin wrapper around Tokio's unbounded MPSC channel.
///
/// Wrapped to integrate with `crate::Result`.
pub fn event_channel<M>() -> (EventSender<M>, EventSource<M>) {
    let channel = tokio::sync::mpsc::unbounded_channel();
    (EventSender(channel.0), EventSource(channel.1))
}

/// Outbound half of a client stream.
///
/// Calls are serialized by the owning stream, so implementations never see
/// two emissions at once. None of them may block.
pub trait Responder
where
    Self: Send + 'static,
{
    fn on_next(&mut self, reply: Reply) -> crate::Result<()>;

    fn on_error(&mut self, status: Status) -> crate::Result<()>;

    fn on_completed(&mut self) -> crate::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Reply(Reply),
    Error(Status),
    Completed,
}

impl Responder for EventSender<Response> {
    fn on_next(&mut self, reply: Reply) -> crate::Result<()> {
        self.send(Response::Reply(reply))
    }

    fn on_error(&mut self, status: Status) -> crate::Result<()> {
        self.send(Response::Error(status))
    }

    fn on_completed(&mut self) -> crate::Result<()> {
        self.send(Response::Completed)
    }
}

pub fn response_channel() -> (EventSender<Response>, EventSource<Response>) {
    event_channel()
}
