use std::sync::{
    atomic::{AtomicU64, Ordering::SeqCst},
    Arc,
};

use tracing::debug;

use crate::{
    config::Config,
    engine::Engine,
    message::GroupId,
    model::Responder,
    ordered::OrderedStream,
    registry::StreamRegistry,
    stream::StreamCore,
    task::BackgroundMonitor,
    unordered::UnorderedStream,
};

/// Client-facing entry point of a server: opens ordered and unordered
/// streams in front of the replication engine.
pub struct ClientProtocolService {
    config: Config,
    engine: Engine,
    monitor: BackgroundMonitor,
    registry: Arc<StreamRegistry>,
    stream_count: AtomicU64,
}

impl ClientProtocolService {
    pub fn new(config: Config, engine: Engine) -> Self {
        Self {
            config,
            engine,
            monitor: Default::default(),
            registry: Default::default(),
            stream_count: AtomicU64::new(0),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.config.server_id
    }

    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    fn new_core(&self, kind: &str, responder: impl Responder) -> StreamCore {
        let id = self.stream_count.fetch_add(1, SeqCst);
        StreamCore::new(
            id,
            format!("{}-{kind}{id}", self.config.server_id),
            Box::new(responder),
            self.engine.clone(),
            self.monitor.spawner(),
        )
    }

    pub fn ordered(&self, responder: impl Responder) -> Arc<OrderedStream> {
        let stream = Arc::new(OrderedStream::new(
            self.new_core("OrderedStream", responder),
            self.config.window_capacity,
            self.registry.clone(),
        ));
        self.registry.register(stream.clone());
        stream
    }

    pub fn unordered(&self, responder: impl Responder) -> Arc<UnorderedStream> {
        Arc::new(UnorderedStream::new(
            self.new_core("UnorderedStream", responder),
        ))
    }

    /// For when `group` is removed from this server.
    pub fn close_all_ordered(&self, group: GroupId) -> usize {
        debug!(server = %self.config.server_id, %group, "close all ordered streams");
        self.registry.close_all_for_group(group)
    }

    /// Closes every ordered stream and drops all pending completions.
    pub fn shutdown(&self) {
        let closed = self.registry.close_all();
        debug!(server = %self.config.server_id, closed, "shutdown");
        self.monitor.cancel()
    }
}
