use std::{fmt, io::Cursor};

use bytes::Bytes;
use derive_more::{Display, From};
use serde::{Deserialize, Serialize};

use crate::error::ReplyError;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From, Serialize, Deserialize,
)]
#[display(fmt = "client-{}", _0)]
pub struct ClientId(pub u64);

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From, Serialize, Deserialize,
)]
#[display(fmt = "group-{}", _0)]
pub struct GroupId(pub u64);

/// Ordering token attached by ordered-mode clients. Unordered streams ignore
/// it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, Serialize, Deserialize,
)]
#[display(fmt = "seq={} first={}", seq_num, is_first)]
pub struct SlidingWindowEntry {
    pub seq_num: u64,
    pub is_first: bool,
}

impl SlidingWindowEntry {
    pub fn first(seq_num: u64) -> Self {
        Self {
            seq_num,
            is_first: true,
        }
    }

    pub fn next(seq_num: u64) -> Self {
        Self {
            seq_num,
            is_first: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestHeader {
    pub client_id: ClientId,
    /// Unique per client and stream, not globally.
    pub call_id: u64,
    pub group_id: GroupId,
    pub entry: SlidingWindowEntry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub header: RequestHeader,
    pub payload: Bytes,
}

impl Request {
    pub fn seq_num(&self) -> u64 {
        self.header.entry.seq_num
    }

    pub fn is_first(&self) -> bool {
        self.header.entry.is_first
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let RequestHeader {
            client_id,
            call_id,
            group_id,
            entry,
        } = &self.header;
        write!(
            f,
            "{client_id}#{call_id}@{group_id} ({entry}, {} bytes)",
            self.payload.len()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Header of the request this reply answers.
    pub request: RequestHeader,
    pub result: Result<Bytes, ReplyError>,
}

impl Reply {
    pub fn success(request: RequestHeader, message: impl Into<Bytes>) -> Self {
        Self {
            request,
            result: Ok(message.into()),
        }
    }

    pub fn failure(request: RequestHeader, cause: ReplyError) -> Self {
        Self {
            request,
            result: Err(cause),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn call_id(&self) -> u64 {
        self.request.call_id
    }

    pub fn seq_num(&self) -> u64 {
        self.request.entry.seq_num
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.request.client_id, self.request.call_id)?;
        match &self.result {
            Ok(message) => write!(f, " OK ({} bytes)", message.len()),
            Err(cause) => write!(f, " FAILED ({cause})"),
        }
    }
}

/// Inbound request buffer as handed over by the transport.
///
/// The release hook returns the buffer to its owner. It runs exactly once:
/// either explicitly, through [`Frame::into_release`] once the decoded request
/// has taken it over, or when the frame is dropped.
pub struct Frame {
    buf: Bytes,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Frame {
    pub fn new(buf: impl Into<Bytes>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            buf: buf.into(),
            release: Some(Box::new(release)),
        }
    }

    /// A frame whose buffer is not pooled, so releasing it does nothing.
    pub fn unpooled(buf: impl Into<Bytes>) -> Self {
        Self::new(buf, || {})
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Decodes the header and slices the payload out of the frame without
    /// copying it.
    pub fn decode(&self) -> crate::Result<Request> {
        let mut cursor = Cursor::new(&self.buf[..]);
        let header = bincode::deserialize_from::<_, RequestHeader>(&mut cursor)?;
        let payload = self.buf.slice(cursor.position() as usize..);
        Ok(Request { header, payload })
    }

    pub fn release(self) {
        drop(self)
    }

    /// Hands the release hook over to a new owner; the frame itself no longer
    /// releases anything when dropped.
    pub fn into_release(mut self) -> Box<dyn FnOnce() + Send> {
        self.release.take().unwrap_or_else(|| Box::new(|| {}))
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release()
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("len", &self.buf.len())
            .field("released", &self.release.is_none())
            .finish()
    }
}

/// Client-side counterpart of [`Frame::decode`].
pub fn encode_request(header: &RequestHeader, payload: &[u8]) -> crate::Result<Bytes> {
    let mut buf = bincode::serialize(header)?;
    buf.extend_from_slice(payload);
    Ok(buf.into())
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering::SeqCst},
        Arc,
    };

    use super::*;

    fn header() -> RequestHeader {
        RequestHeader {
            client_id: ClientId(7),
            call_id: 42,
            group_id: GroupId(1),
            entry: SlidingWindowEntry::first(0),
        }
    }

    #[test]
    fn payload_is_sliced_from_frame() {
        let buf = encode_request(&header(), b"increment").unwrap();
        let frame = Frame::unpooled(buf.clone());
        let request = frame.decode().unwrap();
        assert_eq!(request.header, header());
        assert_eq!(&request.payload[..], b"increment");
        let start = buf.as_ptr() as usize;
        let payload = request.payload.as_ptr() as usize;
        assert!(payload > start && payload < start + buf.len());
    }

    #[test]
    fn truncated_frame_fails_to_decode() {
        let buf = encode_request(&header(), b"").unwrap();
        let frame = Frame::unpooled(buf.slice(..buf.len() - 1));
        assert!(frame.decode().is_err());
    }

    #[test]
    fn frame_releases_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let frame = Frame::new(Bytes::from_static(b"x"), {
            let count = count.clone();
            move || {
                count.fetch_add(1, SeqCst);
            }
        });
        let release = frame.into_release();
        assert_eq!(count.load(SeqCst), 0);
        release();
        assert_eq!(count.load(SeqCst), 1);

        let frame = Frame::new(Bytes::from_static(b"x"), {
            let count = count.clone();
            move || {
                count.fetch_add(1, SeqCst);
            }
        });
        frame.release();
        assert_eq!(count.load(SeqCst), 2);
    }
}
