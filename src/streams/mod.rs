//! Stream abstractions
//!
//! A [`ByteStream`] is a lazy, finite, non-restartable sequence of byte
//! chunks. Every upload and download path in the gateway flows through
//! this trait so that arbitrarily large files never need to be held in
//! memory.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

use crate::Result;

pub mod file;
pub mod hash;
pub mod http;
pub mod meter;
pub mod zip;

pub use file::FileStreamReader;
pub use hash::HashStreamReader;
pub use http::{RequestStreamReader, ResponseStreamReader};
pub use meter::MeteredStreamReader;
pub use zip::{ZipEntries, ZipEntry, ZipStreamReader};

/// Pull-based byte stream. `next_chunk` returns `None` at end of stream;
/// reading is the unit of suspension during a transfer.
#[async_trait]
pub trait ByteStream: Send {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>>;

    /// Total bytes this stream will yield, when known.
    fn size(&self) -> Option<u64> {
        None
    }

    fn content_type(&self) -> Option<String> {
        None
    }

    /// True iff this stream represents a byte-range subset.
    fn partial(&self) -> bool {
        false
    }

    /// `bytes start-end/total`, present iff partial.
    fn content_range(&self) -> Option<String> {
        None
    }
}

pub type BoxByteStream = Box<dyn ByteStream + Unpin>;

/// A zero-length stream, used for empty-folder archive entries.
pub struct EmptyStream;

#[async_trait]
impl ByteStream for EmptyStream {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        Ok(None)
    }

    fn size(&self) -> Option<u64> {
        Some(0)
    }
}

/// An in-memory stream over a single buffer. Mostly useful in tests and
/// for small generated payloads.
pub struct MemoryStream {
    data: Option<Bytes>,
    len: u64,
}

impl MemoryStream {
    pub fn new(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let len = data.len() as u64;
        Self {
            data: Some(data),
            len,
        }
    }
}

#[async_trait]
impl ByteStream for MemoryStream {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        Ok(self.data.take().filter(|d| !d.is_empty()))
    }

    fn size(&self) -> Option<u64> {
        Some(self.len)
    }
}

/// Adapt a [`ByteStream`] into a `futures::Stream` of io-flavored results,
/// the shape both `axum::body::Body::from_stream` and
/// `reqwest::Body::wrap_stream` accept.
pub fn into_stream(
    stream: BoxByteStream,
) -> impl Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send {
    futures::stream::unfold(stream, |mut stream| async move {
        match stream.next_chunk().await {
            Ok(Some(chunk)) => Some((Ok(chunk), stream)),
            Ok(None) => None,
            Err(err) => Some((Err(std::io::Error::other(err.to_string())), stream)),
        }
    })
}

/// Convert a [`ByteStream`] into an axum response body for zero-copy
/// streaming to the client.
pub fn into_body(stream: BoxByteStream) -> axum::body::Body {
    axum::body::Body::from_stream(into_stream(stream))
}

/// Drain a stream into a single buffer. Loads the whole content into
/// memory; only for small payloads and tests.
pub async fn collect(mut stream: BoxByteStream) -> Result<Bytes> {
    let mut buffer = Vec::new();
    while let Some(chunk) = stream.next_chunk().await? {
        buffer.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(buffer))
}
