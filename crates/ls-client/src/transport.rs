//! HTTP transport used by the session
//!
//! The session only needs one capability from the network: POST a
//! form-encoded body and read the response back line by line. That
//! capability is the [`HttpTransport`] trait; [`ReqwestTransport`] is the
//! production implementation and `testing::ScriptedTransport` the test one.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::error::{TransportError, TransportResult};

/// Default connection timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default timeout for a whole control request
pub const DEFAULT_CONTROL_TIMEOUT: Duration = Duration::from_secs(30);

/// Response body as a stream of raw chunks
pub type ByteStream = Pin<Box<dyn Stream<Item = TransportResult<Bytes>> + Send>>;

/// Which of the two protocol connections a request opens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    /// Long-lived session/bind connection; must not time out while streaming
    Stream,
    /// Short-lived control request
    Control,
}

/// Capability to perform an HTTP POST and read the body line by line
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// POST `body` (already form-encoded) to `url`
    async fn post(
        &self,
        url: Url,
        body: String,
        kind: ConnectionKind,
    ) -> TransportResult<LineReader>;
}

/// Splits a chunked response body into lines
///
/// Both `\n` and `\r\n` terminators are accepted. A trailing line without
/// terminator is returned once the body ends.
pub struct LineReader {
    body: ByteStream,
    buffer: Vec<u8>,
    eof: bool,
}

impl LineReader {
    pub fn new(body: ByteStream) -> Self {
        Self {
            body,
            buffer: Vec::new(),
            eof: false,
        }
    }

    /// Wrap any chunk stream
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = TransportResult<Bytes>> + Send + 'static,
    {
        Self::new(Box::pin(stream))
    }

    /// Read the next line. `Ok(None)` means the body is exhausted.
    ///
    /// Cancel safe: dropping the future between chunks loses no data.
    pub async fn next_line(&mut self) -> TransportResult<Option<String>> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
                let line = self.buffer.drain(..=pos).collect::<Vec<_>>();
                return Ok(Some(decode_line(&line[..line.len() - 1])));
            }

            if self.eof {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                let line = std::mem::take(&mut self.buffer);
                return Ok(Some(decode_line(&line)));
            }

            match self.body.next().await {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => return Err(e),
                None => self.eof = true,
            }
        }
    }

    /// Drain every remaining line
    pub async fn read_to_end(&mut self) -> TransportResult<Vec<String>> {
        let mut lines = Vec::new();
        while let Some(line) = self.next_line().await? {
            lines.push(line);
        }
        Ok(lines)
    }
}

fn decode_line(line: &[u8]) -> String {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

/// [`HttpTransport`] backed by a shared `reqwest::Client`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    control_timeout: Duration,
}

impl ReqwestTransport {
    /// Create a transport with default timeouts
    pub fn new() -> TransportResult<Self> {
        Self::with_config(DEFAULT_CONNECT_TIMEOUT, DEFAULT_CONTROL_TIMEOUT)
    }

    /// Create a transport with custom timeouts
    ///
    /// `connect_timeout` applies to every connection, `control_timeout` only
    /// to control requests; stream connections stay open indefinitely.
    pub fn with_config(connect_timeout: Duration, control_timeout: Duration) -> TransportResult<Self> {
        let client = Client::builder().connect_timeout(connect_timeout).build()?;
        Ok(Self {
            client,
            control_timeout,
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post(
        &self,
        url: Url,
        body: String,
        kind: ConnectionKind,
    ) -> TransportResult<LineReader> {
        debug!(%url, ?kind, "POST");

        let mut request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body);
        if kind == ConnectionKind::Control {
            request = request.timeout(self.control_timeout);
        }

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(TransportError::from));
        Ok(LineReader::from_stream(body))
    }
}
