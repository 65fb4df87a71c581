//! Streaming zip container writer
//!
//! Emits a valid zip archive from an ordered sequence of (name, stream)
//! pairs without materializing the archive or any entry in memory: file
//! entries are deflated chunk by chunk behind a data descriptor, and only
//! the growing central-directory index is buffered until the end.

use std::collections::VecDeque;
use std::io::Write;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{Datelike, Timelike, Utc};
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::{Error, Result};

use super::{BoxByteStream, ByteStream};

const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const DATA_DESCRIPTOR_SIG: u32 = 0x0807_4b50;
const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
const END_OF_CENTRAL_SIG: u32 = 0x0605_4b50;
const VERSION: u16 = 20;
// bit 3: sizes in data descriptor; bit 11: UTF-8 names
const FLAG_DESCRIPTOR: u16 = 0x0008;
const FLAG_UTF8: u16 = 0x0800;
const METHOD_STORED: u16 = 0;
const METHOD_DEFLATED: u16 = 8;

/// One archive member. A name ending in `/` denotes a directory entry;
/// its stream is expected to be empty.
pub struct ZipEntry {
    pub name: String,
    pub stream: BoxByteStream,
}

impl ZipEntry {
    pub fn new(name: impl Into<String>, stream: BoxByteStream) -> Self {
        Self {
            name: name.into(),
            stream,
        }
    }
}

/// Source of archive members, pulled lazily as the archive is streamed.
#[async_trait]
pub trait ZipEntries: Send {
    async fn next_entry(&mut self) -> Result<Option<ZipEntry>>;
}

#[async_trait]
impl ZipEntries for VecDeque<ZipEntry> {
    async fn next_entry(&mut self) -> Result<Option<ZipEntry>> {
        Ok(self.pop_front())
    }
}

struct CentralRecord {
    name: Vec<u8>,
    is_dir: bool,
    crc: u32,
    compressed: u64,
    uncompressed: u64,
    local_offset: u64,
}

struct EntryState {
    name: Vec<u8>,
    stream: BoxByteStream,
    encoder: Option<DeflateEncoder<Vec<u8>>>,
    crc: crc32fast::Hasher,
    compressed: u64,
    uncompressed: u64,
    local_offset: u64,
}

enum State {
    Next,
    Streaming(EntryState),
    Done,
}

pub struct ZipStreamReader {
    source: Box<dyn ZipEntries + Unpin>,
    state: State,
    offset: u64,
    central: Vec<CentralRecord>,
    dos_time: u16,
    dos_date: u16,
}

impl ZipStreamReader {
    pub fn new(source: Box<dyn ZipEntries + Unpin>) -> Self {
        let now = Utc::now();
        let (dos_time, dos_date) = dos_datetime(
            now.year(),
            now.month(),
            now.day(),
            now.hour(),
            now.minute(),
            now.second(),
        );
        Self {
            source,
            state: State::Next,
            offset: 0,
            central: Vec::new(),
            dos_time,
            dos_date,
        }
    }

    fn emit(&mut self, buf: BytesMut) -> Bytes {
        self.offset += buf.len() as u64;
        buf.freeze()
    }

    fn local_header(&self, name: &[u8], is_dir: bool) -> BytesMut {
        let mut buf = BytesMut::with_capacity(30 + name.len());
        buf.put_u32_le(LOCAL_HEADER_SIG);
        buf.put_u16_le(VERSION);
        let flags = if is_dir {
            FLAG_UTF8
        } else {
            FLAG_UTF8 | FLAG_DESCRIPTOR
        };
        buf.put_u16_le(flags);
        buf.put_u16_le(if is_dir { METHOD_STORED } else { METHOD_DEFLATED });
        buf.put_u16_le(self.dos_time);
        buf.put_u16_le(self.dos_date);
        buf.put_u32_le(0); // crc, deferred to the data descriptor
        buf.put_u32_le(0); // compressed size
        buf.put_u32_le(0); // uncompressed size
        buf.put_u16_le(name.len() as u16);
        buf.put_u16_le(0); // extra field length
        buf.put_slice(name);
        buf
    }

    fn data_descriptor(record: &CentralRecord) -> BytesMut {
        let mut buf = BytesMut::with_capacity(16);
        buf.put_u32_le(DATA_DESCRIPTOR_SIG);
        buf.put_u32_le(record.crc);
        buf.put_u32_le(clamp_u32(record.compressed));
        buf.put_u32_le(clamp_u32(record.uncompressed));
        buf
    }

    fn central_directory(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        let start = self.offset;
        for record in &self.central {
            buf.put_u32_le(CENTRAL_HEADER_SIG);
            buf.put_u16_le(VERSION); // version made by
            buf.put_u16_le(VERSION); // version needed
            let flags = if record.is_dir {
                FLAG_UTF8
            } else {
                FLAG_UTF8 | FLAG_DESCRIPTOR
            };
            buf.put_u16_le(flags);
            buf.put_u16_le(if record.is_dir {
                METHOD_STORED
            } else {
                METHOD_DEFLATED
            });
            buf.put_u16_le(self.dos_time);
            buf.put_u16_le(self.dos_date);
            buf.put_u32_le(record.crc);
            buf.put_u32_le(clamp_u32(record.compressed));
            buf.put_u32_le(clamp_u32(record.uncompressed));
            buf.put_u16_le(record.name.len() as u16);
            buf.put_u16_le(0); // extra field length
            buf.put_u16_le(0); // comment length
            buf.put_u16_le(0); // disk number
            buf.put_u16_le(0); // internal attributes
            buf.put_u32_le(if record.is_dir { 0x10 } else { 0 });
            buf.put_u32_le(clamp_u32(record.local_offset));
            buf.put_slice(&record.name);
        }
        let size = buf.len() as u64;
        buf.put_u32_le(END_OF_CENTRAL_SIG);
        buf.put_u16_le(0); // this disk
        buf.put_u16_le(0); // central directory disk
        buf.put_u16_le(self.central.len() as u16);
        buf.put_u16_le(self.central.len() as u16);
        buf.put_u32_le(clamp_u32(size));
        buf.put_u32_le(clamp_u32(start));
        buf.put_u16_le(0); // comment length
        buf
    }
}

#[async_trait]
impl ByteStream for ZipStreamReader {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        loop {
            match &mut self.state {
                State::Next => match self.source.next_entry().await? {
                    None => {
                        let buf = self.central_directory();
                        self.state = State::Done;
                        return Ok(Some(self.emit(buf)));
                    }
                    Some(entry) => {
                        let name = entry.name.clone().into_bytes();
                        let is_dir = entry.name.ends_with('/');
                        let header = self.local_header(&name, is_dir);
                        if is_dir {
                            // Directory entries carry no data and no descriptor.
                            self.central.push(CentralRecord {
                                name,
                                is_dir: true,
                                crc: 0,
                                compressed: 0,
                                uncompressed: 0,
                                local_offset: self.offset,
                            });
                        } else {
                            self.state = State::Streaming(EntryState {
                                name,
                                stream: entry.stream,
                                encoder: Some(DeflateEncoder::new(
                                    Vec::new(),
                                    Compression::default(),
                                )),
                                crc: crc32fast::Hasher::new(),
                                compressed: 0,
                                uncompressed: 0,
                                local_offset: self.offset,
                            });
                        }
                        return Ok(Some(self.emit(header)));
                    }
                },
                State::Streaming(entry) => match entry.stream.next_chunk().await? {
                    Some(chunk) => {
                        entry.crc.update(&chunk);
                        entry.uncompressed += chunk.len() as u64;
                        let encoder = entry
                            .encoder
                            .as_mut()
                            .ok_or_else(|| Error::internal("zip encoder already finished"))?;
                        encoder.write_all(&chunk)?;
                        let produced = std::mem::take(encoder.get_mut());
                        if produced.is_empty() {
                            continue;
                        }
                        entry.compressed += produced.len() as u64;
                        let buf = BytesMut::from(&produced[..]);
                        return Ok(Some(self.emit(buf)));
                    }
                    None => {
                        let encoder = entry
                            .encoder
                            .take()
                            .ok_or_else(|| Error::internal("zip encoder already finished"))?;
                        let tail = encoder.finish()?;
                        entry.compressed += tail.len() as u64;

                        let record = CentralRecord {
                            name: std::mem::take(&mut entry.name),
                            is_dir: false,
                            crc: entry.crc.clone().finalize(),
                            compressed: entry.compressed,
                            uncompressed: entry.uncompressed,
                            local_offset: entry.local_offset,
                        };

                        let mut buf = BytesMut::from(&tail[..]);
                        buf.extend_from_slice(&Self::data_descriptor(&record));
                        self.central.push(record);
                        self.state = State::Next;
                        return Ok(Some(self.emit(buf)));
                    }
                },
                State::Done => return Ok(None),
            }
        }
    }

    fn content_type(&self) -> Option<String> {
        Some("application/zip".to_string())
    }
}

fn clamp_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

fn dos_datetime(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> (u16, u16) {
    let year = (year.clamp(1980, 2107) - 1980) as u16;
    let date = (year << 9) | ((month as u16) << 5) | (day as u16);
    let time = ((hour as u16) << 11) | ((minute as u16) << 5) | ((second / 2) as u16);
    (time, date)
}
