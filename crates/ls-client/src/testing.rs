//! Test utilities for ls-client
//!
//! - [`ScriptedTransport`]: in-memory [`HttpTransport`] serving scripted
//!   responses and recording every request
//! - [`TestServer`]: axum router bound to a local port, for tests going
//!   through the real reqwest transport

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use url::{form_urlencoded, Url};

use crate::codec::CONTROL_PATH;
use crate::config::ClientConfig;
use crate::error::{Result, TransportError, TransportResult};
use crate::transport::{ConnectionKind, HttpTransport, LineReader};

/// A request seen by [`ScriptedTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub url: Url,
    pub body: String,
    pub kind: ConnectionKind,
}

impl RecordedRequest {
    /// Decoded value of a form parameter
    pub fn param(&self, name: &str) -> Option<String> {
        form_urlencoded::parse(self.body.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }
}

enum ScriptedResponse {
    Lines(Vec<String>),
    Stream {
        head: Vec<String>,
        rx: mpsc::UnboundedReceiver<String>,
        tx: mpsc::WeakUnboundedSender<String>,
    },
    Failure {
        status: u16,
        message: String,
    },
}

/// Sender side of a scripted stream connection
///
/// Dropping the feed ends the response body.
pub struct StreamFeed {
    tx: mpsc::UnboundedSender<String>,
}

impl StreamFeed {
    /// Push one line; returns false once the connection was dropped
    pub fn send_line(&self, line: &str) -> bool {
        self.tx.send(line.to_string()).is_ok()
    }

    /// Whether the reading side went away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// In-memory transport with per-endpoint response queues
///
/// Responses are matched by URL path suffix (e.g. `CONTROL_PATH`) and
/// served in the order they were pushed. A control request with nothing
/// scripted answers `OK`; other endpoints answer HTTP 404. A successful
/// `destroy` pushes `END` into every open stream, as a server would,
/// unless [`hold_streams_on_destroy`](Self::hold_streams_on_destroy) was
/// called.
#[derive(Default)]
pub struct ScriptedTransport {
    requests: Mutex<Vec<RecordedRequest>>,
    responses: Mutex<HashMap<String, VecDeque<ScriptedResponse>>>,
    streams: Mutex<Vec<mpsc::WeakUnboundedSender<String>>>,
    hold_streams: AtomicBool,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, path: &str, response: ScriptedResponse) {
        self.responses
            .lock()
            .entry(path.to_string())
            .or_default()
            .push_back(response);
    }

    /// Leave open streams alone on `destroy`, like a server that never
    /// closes the stream connection
    pub fn hold_streams_on_destroy(&self) {
        self.hold_streams.store(true, Ordering::SeqCst);
    }

    /// Queue a finite response body
    pub fn push_lines(&self, path: &str, lines: &[&str]) {
        self.push(
            path,
            ScriptedResponse::Lines(lines.iter().map(|l| l.to_string()).collect()),
        );
    }

    /// Queue an open-ended response: `head` lines, then whatever is fed
    pub fn push_stream(&self, path: &str, head: &[&str]) -> StreamFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push(
            path,
            ScriptedResponse::Stream {
                head: head.iter().map(|l| l.to_string()).collect(),
                rx,
                tx: tx.downgrade(),
            },
        );
        StreamFeed { tx }
    }

    /// Queue an HTTP error status
    pub fn push_failure(&self, path: &str, status: u16, message: &str) {
        self.push(
            path,
            ScriptedResponse::Failure {
                status,
                message: message.to_string(),
            },
        );
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    /// Requests whose URL path ends with `path`
    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.url.path().ends_with(path))
            .cloned()
            .collect()
    }

    fn next_response(&self, url: &Url) -> Option<ScriptedResponse> {
        let mut responses = self.responses.lock();
        responses
            .iter_mut()
            .find(|(path, queue)| url.path().ends_with(path.as_str()) && !queue.is_empty())
            .and_then(|(_, queue)| queue.pop_front())
    }

    fn end_open_streams(&self) {
        if self.hold_streams.load(Ordering::SeqCst) {
            return;
        }
        for stream in self.streams.lock().drain(..) {
            if let Some(tx) = stream.upgrade() {
                let _ = tx.send("END".to_string());
            }
        }
    }
}

fn line_chunk(line: String) -> TransportResult<Bytes> {
    Ok(Bytes::from(format!("{}\r\n", line)))
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn post(
        &self,
        url: Url,
        body: String,
        kind: ConnectionKind,
    ) -> TransportResult<LineReader> {
        let request = RecordedRequest { url, body, kind };
        let is_control = request.url.path().ends_with(CONTROL_PATH);
        let is_destroy = is_control && request.param("LS_op").as_deref() == Some("destroy");
        self.requests.lock().push(request.clone());

        let response = match self.next_response(&request.url) {
            Some(response) => response,
            None if is_control => ScriptedResponse::Lines(vec!["OK".to_string()]),
            None => ScriptedResponse::Failure {
                status: 404,
                message: format!("nothing scripted for {}", request.url.path()),
            },
        };

        match response {
            ScriptedResponse::Lines(lines) => {
                if is_destroy && lines.first().map(String::as_str) == Some("OK") {
                    self.end_open_streams();
                }
                let chunks = lines.into_iter().map(line_chunk).collect::<Vec<_>>();
                Ok(LineReader::from_stream(stream::iter(chunks)))
            }
            ScriptedResponse::Stream { head, rx, tx } => {
                // Weak, so dropping the feed still ends the body.
                self.streams.lock().push(tx);
                let body = stream::iter(head.into_iter().map(line_chunk))
                    .chain(UnboundedReceiverStream::new(rx).map(line_chunk));
                Ok(LineReader::from_stream(body))
            }
            ScriptedResponse::Failure { status, message } => {
                Err(TransportError::Status { status, message })
            }
        }
    }
}

/// A test server that automatically shuts down when dropped
pub struct TestServer {
    pub addr: SocketAddr,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    /// Serve `router` on an ephemeral local port
    pub async fn start(router: axum::Router) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(TransportError::from)?;
        let addr = listener.local_addr().map_err(TransportError::from)?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        // Give server a moment to start
        tokio::time::sleep(Duration::from_millis(10)).await;

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Get the base URL of the test server
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Client configuration pointing at this server, with short timeouts
    pub fn config(&self, adapter_set: &str) -> ClientConfig {
        ClientConfig {
            connect_timeout_secs: 2,
            control_timeout_secs: 5,
            disconnect_timeout_secs: 2,
            ..ClientConfig::new(self.base_url(), adapter_set)
        }
    }

    /// Shutdown the server gracefully
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Wait for a condition with timeout
pub async fn wait_for<F>(condition: F, timeout: Duration) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;

    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    condition()
}
