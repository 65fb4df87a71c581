//! Byte-counting pass-through stream
//!
//! Counts every byte that flows through and emits a tracing event with
//! the total once the wrapped stream reaches end of stream.

use async_trait::async_trait;
use bytes::Bytes;

use crate::Result;

use super::{BoxByteStream, ByteStream};

enum Direction {
    Download,
    Upload,
}

pub struct MeteredStreamReader {
    inner: BoxByteStream,
    direction: Direction,
    path: String,
    transferred: u64,
    reported: bool,
}

impl MeteredStreamReader {
    pub fn download(inner: BoxByteStream, path: impl Into<String>) -> Self {
        Self::new(inner, Direction::Download, path)
    }

    pub fn upload(inner: BoxByteStream, path: impl Into<String>) -> Self {
        Self::new(inner, Direction::Upload, path)
    }

    fn new(inner: BoxByteStream, direction: Direction, path: impl Into<String>) -> Self {
        Self {
            inner,
            direction,
            path: path.into(),
            transferred: 0,
            reported: false,
        }
    }

    /// Bytes seen so far.
    pub fn transferred(&self) -> u64 {
        self.transferred
    }
}

#[async_trait]
impl ByteStream for MeteredStreamReader {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        match self.inner.next_chunk().await? {
            Some(chunk) => {
                self.transferred += chunk.len() as u64;
                Ok(Some(chunk))
            }
            None => {
                if !self.reported {
                    self.reported = true;
                    match self.direction {
                        Direction::Download => tracing::info!(
                            path = %self.path,
                            bytes_downloaded = self.transferred,
                            "download complete"
                        ),
                        Direction::Upload => tracing::info!(
                            path = %self.path,
                            bytes_uploaded = self.transferred,
                            "upload complete"
                        ),
                    }
                }
                Ok(None)
            }
        }
    }

    fn size(&self) -> Option<u64> {
        self.inner.size()
    }

    fn content_type(&self) -> Option<String> {
        self.inner.content_type()
    }

    fn partial(&self) -> bool {
        self.inner.partial()
    }

    fn content_range(&self) -> Option<String> {
        self.inner.content_range()
    }
}
