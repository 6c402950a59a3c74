use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::{message::GroupId, ordered::OrderedStream, stream::RequestStream};

/// Open ordered streams of one server, so they can be torn down together when
/// a group leaves the server.
#[derive(Default)]
pub struct StreamRegistry {
    streams: DashMap<u64, Arc<OrderedStream>>,
}

impl StreamRegistry {
    pub fn register(&self, stream: Arc<OrderedStream>) {
        let id = stream.id();
        let previous = self.streams.insert(id, stream);
        assert!(previous.is_none(), "stream {id} registered twice");
    }

    pub fn deregister(&self, id: u64) -> Option<Arc<OrderedStream>> {
        self.streams.remove(&id).map(|(_, stream)| stream)
    }

    pub fn get(&self, id: u64) -> Option<Arc<OrderedStream>> {
        self.streams.get(&id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Closes and removes every stream bound to `group`, and every stream not
    /// bound yet. Streams registered meanwhile may be missed; streams closed
    /// meanwhile by another path are closed again, which does nothing.
    pub fn close_all_for_group(&self, group: GroupId) -> usize {
        self.close_where(|stream| stream.group_binding().matches(group))
    }

    pub fn close_all(&self) -> usize {
        self.close_where(|_| true)
    }

    fn close_where(&self, predicate: impl Fn(&OrderedStream) -> bool) -> usize {
        // closing deregisters, which must not happen under a shard lock
        let streams = self
            .streams
            .iter()
            .filter(|entry| predicate(entry.value().as_ref()))
            .map(|entry| entry.value().clone())
            .collect::<Vec<_>>();
        for stream in &streams {
            debug!(stream = %stream.name(), "force close");
            stream.close(true);
            self.deregister(stream.id());
        }
        streams.len()
    }
}
