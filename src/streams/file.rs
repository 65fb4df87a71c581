//! File-backed stream reader with byte-range support

use std::path::Path;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};

use crate::{Error, Result};

/// Reads a file as a stream of chunks. When constructed with an inclusive
/// byte range `[start, end]` the reader seeks to `start` first and never
/// yields bytes past `end`; `size` then reports the range length rather
/// than the file length.
pub struct FileStreamReader {
    file: File,
    chunk_size: usize,
    total_size: u64,
    range: Option<(u64, u64)>,
    remaining: u64,
}

impl FileStreamReader {
    pub async fn open(
        path: impl AsRef<Path>,
        range: Option<(u64, u64)>,
        chunk_size: usize,
    ) -> Result<Self> {
        let path = path.as_ref();
        let mut file = File::open(path)
            .await
            .map_err(|_| Error::not_found(path.display().to_string()))?;
        let total_size = file.metadata().await?.len();

        let range = match range {
            Some((start, end)) if start <= end && start < total_size => {
                // Clamp the end to the last byte actually present.
                Some((start, end.min(total_size.saturating_sub(1))))
            }
            Some(_) => None,
            None => None,
        };

        let remaining = match range {
            Some((start, end)) => {
                file.seek(SeekFrom::Start(start)).await?;
                end - start + 1
            }
            None => total_size,
        };

        Ok(Self {
            file,
            chunk_size,
            total_size,
            range,
            remaining,
        })
    }
}

#[async_trait]
impl super::ByteStream for FileStreamReader {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let want = self.chunk_size.min(self.remaining as usize);
        let mut buf = BytesMut::with_capacity(want);
        let read = (&mut self.file).take(want as u64).read_buf(&mut buf).await?;
        if read == 0 {
            self.remaining = 0;
            return Ok(None);
        }
        self.remaining -= read as u64;
        Ok(Some(buf.freeze()))
    }

    fn size(&self) -> Option<u64> {
        match self.range {
            Some((start, end)) => Some(end - start + 1),
            None => Some(self.total_size),
        }
    }

    fn partial(&self) -> bool {
        self.range.is_some()
    }

    fn content_range(&self) -> Option<String> {
        self.range
            .map(|(start, end)| format!("bytes {}-{}/{}", start, end, self.total_size))
    }
}
