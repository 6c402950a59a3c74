#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering::SeqCst},
        Arc,
    },
    time::Duration,
};

use metronome::{
    engine::{engine_channel, EngineSource, Submission},
    message::encode_request,
    model::{response_channel, EventSender, EventSource},
    ClientId, ClientProtocolService, Config, Frame, GroupId, Reply, RequestHeader, Response,
    SlidingWindowEntry,
};
use tokio::time::{sleep, timeout};

const TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn header(call_id: u64, group: u64, entry: SlidingWindowEntry) -> RequestHeader {
    RequestHeader {
        client_id: ClientId(1),
        call_id,
        group_id: GroupId(group),
        entry,
    }
}

/// Ordered request `seq_num` for group 1, first in stream when `seq_num` is 0.
pub fn ordered_header(seq_num: u64) -> RequestHeader {
    let entry = if seq_num == 0 {
        SlidingWindowEntry::first(0)
    } else {
        SlidingWindowEntry::next(seq_num)
    };
    header(seq_num, 1, entry)
}

/// Hands out frames and counts how many of them were released.
#[derive(Debug, Clone, Default)]
pub struct Buffers(Arc<AtomicUsize>);

impl Buffers {
    pub fn frame(&self, header: &RequestHeader) -> Frame {
        let count = self.0.clone();
        let buf = encode_request(header, format!("op-{}", header.call_id).as_bytes()).unwrap();
        Frame::new(buf, move || {
            count.fetch_add(1, SeqCst);
        })
    }

    pub fn garbage(&self) -> Frame {
        let count = self.0.clone();
        Frame::new(&b"\x01\x02"[..], move || {
            count.fetch_add(1, SeqCst);
        })
    }

    pub fn released(&self) -> usize {
        self.0.load(SeqCst)
    }
}

pub struct TestEngine(EngineSource);

impl TestEngine {
    pub async fn next(&mut self) -> Submission {
        timeout(TIMEOUT, self.0.next())
            .await
            .expect("no submission")
            .unwrap()
    }

    /// Next `n` submissions by call id, whatever order the completion tasks
    /// got scheduled in.
    pub async fn take(&mut self, n: usize) -> Vec<Submission> {
        let mut submissions = Vec::new();
        for _ in 0..n {
            submissions.push(self.next().await)
        }
        submissions.sort_by_key(|(request, _)| request.header.call_id);
        submissions
    }

    pub async fn assert_idle(&mut self) {
        sleep(Duration::from_millis(50)).await;
        assert!(self.0.try_next().is_none(), "unexpected submission");
    }
}

/// Answers with the request payload, letting go of the request first.
pub fn echo((request, promise): Submission) {
    let reply = Reply::success(request.header, request.payload.clone());
    drop(request);
    promise.resolve(reply).unwrap()
}

pub fn setup() -> (ClientProtocolService, TestEngine) {
    setup_with(Config::new("s0"))
}

pub fn setup_with(config: Config) -> (ClientProtocolService, TestEngine) {
    init_tracing();
    let (engine, source) = engine_channel();
    (ClientProtocolService::new(config, engine), TestEngine(source))
}

pub fn responder() -> (EventSender<Response>, Client) {
    let (sender, source) = response_channel();
    (sender, Client(source))
}

pub struct Client(EventSource<Response>);

impl Client {
    pub async fn recv(&mut self) -> Response {
        timeout(TIMEOUT, self.0.next())
            .await
            .expect("no response")
            .unwrap()
    }

    pub async fn reply(&mut self) -> Reply {
        match self.recv().await {
            Response::Reply(reply) => reply,
            response => panic!("expected reply, got {response:?}"),
        }
    }

    pub async fn assert_silent(&mut self) {
        sleep(Duration::from_millis(50)).await;
        if let Some(response) = self.0.try_next() {
            panic!("unexpected {response:?}")
        }
    }
}
