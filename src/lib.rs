pub mod config;
pub mod engine;
pub mod error;
pub mod message;
pub mod model;
pub mod ordered;
pub mod pending;
pub mod refcount;
pub mod registry;
pub mod service;
pub mod stream;
pub mod task;
pub mod unordered;
pub mod window;

pub use anyhow::{anyhow as err, bail, Error, Result};

pub use crate::config::Config;
pub use crate::engine::Engine;
pub use crate::error::{ReplyError, Status};
pub use crate::message::{
    ClientId, Frame, GroupId, Reply, Request, RequestHeader, SlidingWindowEntry,
};
pub use crate::model::{Responder, Response};
pub use crate::ordered::{GroupBinding, OrderedStream};
pub use crate::refcount::{RefCounted, Retained};
pub use crate::service::ClientProtocolService;
pub use crate::stream::RequestStream;
pub use crate::unordered::UnorderedStream;
