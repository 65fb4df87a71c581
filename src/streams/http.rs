//! HTTP-backed stream readers
//!
//! [`ResponseStreamReader`] wraps an in-flight backend response body;
//! [`RequestStreamReader`] wraps an inbound request body so uploads can be
//! forwarded chunk by chunk without buffering.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;

use crate::Result;

pub struct ResponseStreamReader {
    inner: BoxStream<'static, reqwest::Result<Bytes>>,
    size: Option<u64>,
    content_type: Option<String>,
    partial: bool,
    content_range: Option<String>,
}

impl ResponseStreamReader {
    pub fn new(response: reqwest::Response) -> Self {
        let size = response.content_length();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        let content_range = response
            .headers()
            .get(reqwest::header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        let partial = response.status() == reqwest::StatusCode::PARTIAL_CONTENT;

        Self {
            inner: response.bytes_stream().boxed(),
            size,
            content_type,
            partial,
            content_range,
        }
    }
}

#[async_trait]
impl super::ByteStream for ResponseStreamReader {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        match self.inner.next().await {
            Some(chunk) => Ok(Some(chunk?)),
            None => Ok(None),
        }
    }

    fn size(&self) -> Option<u64> {
        self.size
    }

    fn content_type(&self) -> Option<String> {
        self.content_type
            .clone()
            .or_else(|| Some("application/octet-stream".to_string()))
    }

    fn partial(&self) -> bool {
        self.partial
    }

    fn content_range(&self) -> Option<String> {
        self.content_range.clone()
    }
}

pub struct RequestStreamReader {
    inner: BoxStream<'static, std::result::Result<Bytes, axum::Error>>,
    size: Option<u64>,
}

impl RequestStreamReader {
    pub fn new(body: axum::body::Body, content_length: Option<u64>) -> Self {
        Self {
            inner: body.into_data_stream().boxed(),
            size: content_length,
        }
    }
}

#[async_trait]
impl super::ByteStream for RequestStreamReader {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        match self.inner.next().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(err)) => Err(crate::Error::internal(format!(
                "request body read failed: {err}"
            ))),
            None => Ok(None),
        }
    }

    fn size(&self) -> Option<u64> {
        self.size
    }
}
