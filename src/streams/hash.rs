//! Hashing pass-through stream

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::Result;

use super::{BoxByteStream, ByteStream};

/// Wraps another stream and accumulates a sha256 digest over every chunk
/// that passes through. The digest becomes available once the inner stream
/// is exhausted.
pub struct HashStreamReader {
    inner: BoxByteStream,
    hasher: Option<Sha256>,
    digest: Option<String>,
}

impl HashStreamReader {
    pub fn new(inner: BoxByteStream) -> Self {
        Self {
            inner,
            hasher: Some(Sha256::new()),
            digest: None,
        }
    }

    /// Hex digest of everything read so far; None until EOF.
    pub fn digest_hex(&self) -> Option<&str> {
        self.digest.as_deref()
    }
}

#[async_trait]
impl ByteStream for HashStreamReader {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        match self.inner.next_chunk().await? {
            Some(chunk) => {
                if let Some(hasher) = self.hasher.as_mut() {
                    hasher.update(&chunk);
                }
                Ok(Some(chunk))
            }
            None => {
                if let Some(hasher) = self.hasher.take() {
                    self.digest = Some(format!("{:x}", hasher.finalize()));
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
