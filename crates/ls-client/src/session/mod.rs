//! Stream session: session lifecycle, subscription registry and the
//! background receive task
//!
//! ```text
//! Idle -> Connecting -> Active -> (Rebinding -> Active)* -> Closed
//! ```
//!
//! `connect()` runs the create-session handshake and spawns the receive
//! task. A `LOOP` line on the stream makes the task rebind the same session
//! on a fresh connection and hand over to a new task; every other terminal
//! line clears the session. `disconnect()` destroys the session and joins
//! whichever receive task is current.

mod info;
mod receiver;

pub use info::{derive_control_url, SessionInfo};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::codec::{ControlParams, BIND_SESSION_PATH, CREATE_SESSION_PATH, OK_STATUS};
use crate::config::ClientConfig;
use crate::control::{ControlChannel, ControlOp};
use crate::error::{LsError, Result, TransportError};
use crate::listener::{CloseReason, SessionEvent};
use crate::subscription::{Subscription, SubscriptionMode};
use crate::transport::{ConnectionKind, HttpTransport, LineReader, ReqwestTransport};

/// Capacity of the session event broadcast channel
const EVENT_CAPACITY: usize = 256;

/// How long a receive task gets to stop after the local shutdown signal
const FORCE_CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Lifecycle state of a [`StreamSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Never connected
    Idle,
    /// Create-session handshake in progress
    Connecting,
    /// Receive task running
    Active,
    /// `LOOP` received, bind handshake in progress
    Rebinding,
    /// Session ended (or connect failed)
    Closed,
}

impl SessionState {
    /// Connecting, active or rebinding
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::Active | SessionState::Rebinding
        )
    }
}

/// Result of [`StreamSession::subscribe`]
///
/// The key is registered even when the server rejects the subscription,
/// so the caller can retry or unsubscribe explicitly.
#[derive(Debug)]
pub struct SubscribeOutcome {
    pub key: u32,
    /// Set when the `add` command failed or was not answered `OK`
    pub rejection: Option<LsError>,
}

impl SubscribeOutcome {
    pub fn is_accepted(&self) -> bool {
        self.rejection.is_none()
    }

    /// Key on success, the rejection otherwise
    pub fn into_result(self) -> Result<u32> {
        match self.rejection {
            None => Ok(self.key),
            Some(e) => Err(e),
        }
    }
}

/// Handle of the running receive task
struct Receiver {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
    generation: u64,
}

impl Receiver {
    /// Wait for the task to exit; after `grace`, close the stream locally.
    async fn join(self, grace: Duration) {
        let Receiver {
            mut handle,
            shutdown,
            generation,
        } = self;

        if timeout(grace, &mut handle).await.is_ok() {
            return;
        }

        debug!(generation, "Closing stream connection locally");
        let _ = shutdown.send(true);
        if timeout(FORCE_CLOSE_GRACE, &mut handle).await.is_err() {
            warn!(generation, "Receive task did not stop, aborting it");
            handle.abort();
            let _ = handle.await;
        }
    }
}

/// State shared between the caller and the receive task
struct Shared {
    state: SessionState,
    info: SessionInfo,
    control_url: Url,
    subscriptions: BTreeMap<u32, Arc<Subscription>>,
    current_key: u32,
    receiver: Option<Receiver>,
    generation: u64,
    disconnect_requested: bool,
}

impl Shared {
    fn active_session_id(&self) -> Result<String> {
        match (self.state, self.info.session_id()) {
            (SessionState::Active | SessionState::Rebinding, Some(id)) => Ok(id.to_owned()),
            _ => Err(LsError::NotConnected),
        }
    }

    fn reset(&mut self) {
        self.info.clear();
        self.subscriptions.clear();
        self.current_key = 0;
        self.state = SessionState::Closed;
        self.disconnect_requested = false;
    }
}

struct Inner {
    base_url: Url,
    adapter_set: String,
    user: Option<String>,
    password: Option<String>,
    disconnect_timeout: Duration,
    /// Upper bound on a rebind handshake
    bind_timeout: Duration,
    transport: Arc<dyn HttpTransport>,
    control: ControlChannel,
    shared: Mutex<Shared>,
    events: broadcast::Sender<SessionEvent>,
}

/// Client side of one Lightstreamer session
///
/// # Example
///
/// ```no_run
/// use ls_client::{ChannelListener, ClientConfig, StreamSession, Subscription, SubscriptionMode};
///
/// # async fn example() -> ls_client::Result<()> {
/// let session = StreamSession::new(ClientConfig::new("http://localhost:8080", "DEMO"))?;
/// session.connect().await?;
///
/// let sub = Subscription::new(SubscriptionMode::Merge, ["item1", "item2"], ["last_price"])
///     .with_data_adapter("QUOTE_ADAPTER");
/// let (listener, mut updates) = ChannelListener::channel();
/// sub.add_listener(listener);
///
/// let key = session.subscribe(sub).await?.into_result()?;
/// if let Some(update) = updates.recv().await {
///     println!("{}: {:?}", update.item_name, update.value("last_price"));
/// }
///
/// session.unsubscribe(key).await?;
/// session.disconnect().await?;
/// # Ok(())
/// # }
/// ```
pub struct StreamSession {
    inner: Arc<Inner>,
}

impl StreamSession {
    /// Create a session using the reqwest transport
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport =
            ReqwestTransport::with_config(config.connect_timeout(), config.control_timeout())?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Create a session on a custom transport
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn HttpTransport>) -> Result<Self> {
        let base_url = config.base_url()?;
        let disconnect_timeout = config.disconnect_timeout();
        let bind_timeout = config.control_timeout();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let shared = Shared {
            state: SessionState::Idle,
            info: SessionInfo::new(),
            control_url: base_url.clone(),
            subscriptions: BTreeMap::new(),
            current_key: 0,
            receiver: None,
            generation: 0,
            disconnect_requested: false,
        };

        Ok(Self {
            inner: Arc::new(Inner {
                base_url,
                adapter_set: config.adapter_set,
                user: config.user,
                password: config.password,
                disconnect_timeout,
                bind_timeout,
                control: ControlChannel::new(transport.clone()),
                transport,
                shared: Mutex::new(shared),
                events,
            }),
        })
    }

    pub fn state(&self) -> SessionState {
        self.inner.shared.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.inner.shared.lock().state.is_running()
    }

    /// Snapshot of the session metadata
    pub fn session_info(&self) -> SessionInfo {
        self.inner.shared.lock().info.clone()
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.shared.lock().info.session_id().map(str::to_owned)
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// URL control and bind requests currently go to
    pub fn control_url(&self) -> Url {
        self.inner.shared.lock().control_url.clone()
    }

    pub fn subscription(&self, key: u32) -> Option<Arc<Subscription>> {
        self.inner.shared.lock().subscriptions.get(&key).cloned()
    }

    pub fn subscription_keys(&self) -> Vec<u32> {
        self.inner.shared.lock().subscriptions.keys().copied().collect()
    }

    /// Generation of the running receive task; bumped by every rebind
    pub fn receiver_generation(&self) -> Option<u64> {
        self.inner
            .shared
            .lock()
            .receiver
            .as_ref()
            .map(|r| r.generation)
    }

    /// Subscribe to lifecycle events
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Create a new session and start receiving on its stream connection.
    #[instrument(skip(self), fields(server = %self.inner.base_url))]
    pub async fn connect(&self) -> Result<()> {
        {
            let mut shared = self.inner.shared.lock();
            if shared.state.is_running() {
                return Err(LsError::AlreadyConnected);
            }
            shared.state = SessionState::Connecting;
            shared.disconnect_requested = false;
        }

        let (info, reader) = match self.inner.create_session().await {
            Ok(established) => established,
            Err(e) => {
                warn!(error = %e, "Session creation failed");
                self.inner.shared.lock().state = SessionState::Closed;
                return Err(e);
            }
        };

        let control_url = match derive_control_url(&self.inner.base_url, info.control_address()) {
            Ok(url) => url,
            Err(e) => {
                self.inner.shared.lock().state = SessionState::Closed;
                return Err(e);
            }
        };

        let session_id = info.session_id().unwrap_or_default().to_owned();
        {
            let mut shared = self.inner.shared.lock();
            shared.info = info;
            shared.control_url = control_url;
            shared.subscriptions.clear();
            shared.current_key = 0;
            shared.state = SessionState::Active;
            self.inner.spawn_receiver(&mut shared, reader);
        }

        info!(%session_id, "Session established");
        self.inner.emit(SessionEvent::Connected { session_id });
        Ok(())
    }

    /// Register `subscription` under a new key and send the `add` command.
    #[instrument(skip(self, subscription), fields(mode = %subscription.mode()))]
    pub async fn subscribe(&self, subscription: Subscription) -> Result<SubscribeOutcome> {
        let subscription = Arc::new(subscription);

        let (key, session_id, control_url) = {
            let mut shared = self.inner.shared.lock();
            let session_id = shared.active_session_id()?;
            shared.current_key += 1;
            let key = shared.current_key;
            shared.subscriptions.insert(key, subscription.clone());
            (key, session_id, shared.control_url.clone())
        };

        let snapshot = (subscription.mode() != SubscriptionMode::Raw)
            .then(|| subscription.snapshot().to_string());
        let params = ControlParams::new()
            .with("LS_table", key.to_string())
            .with("LS_data_adapter", subscription.data_adapter())
            .with("LS_mode", subscription.mode().as_str())
            .with("LS_schema", subscription.fields().join(" "))
            .with("LS_id", subscription.items().join(" "))
            .with_opt("LS_snapshot", snapshot);

        let rejection = match self
            .inner
            .control
            .send(&control_url, &session_id, ControlOp::Add, params)
            .await
        {
            Ok(response) if response.is_ok() => {
                info!(key, "Subscription activated");
                None
            }
            Ok(response) => {
                let e = LsError::SubscriptionRejected {
                    key,
                    status: response.describe(),
                };
                warn!(key, error = %e, "Subscription rejected, keeping it registered");
                Some(e)
            }
            Err(e) => {
                warn!(key, error = %e, "Subscription request failed, keeping it registered");
                Some(e)
            }
        };

        Ok(SubscribeOutcome { key, rejection })
    }

    /// Send the `delete` command for `key`; drop it locally only on `OK`.
    #[instrument(skip(self))]
    pub async fn unsubscribe(&self, key: u32) -> Result<()> {
        let (session_id, control_url) = {
            let shared = self.inner.shared.lock();
            if !shared.subscriptions.contains_key(&key) {
                warn!(key, "No subscription registered under this key");
                return Err(LsError::UnknownSubscription(key));
            }
            (shared.active_session_id()?, shared.control_url.clone())
        };

        let response = self
            .inner
            .control
            .send(
                &control_url,
                &session_id,
                ControlOp::Delete,
                ControlParams::new().with("LS_table", key.to_string()),
            )
            .await?;

        if response.is_ok() {
            let mut shared = self.inner.shared.lock();
            // Keys restart with every session; leave a newer session alone.
            if shared.info.session_id() == Some(session_id.as_str()) {
                shared.subscriptions.remove(&key);
            } else {
                debug!(key, %session_id, "Session ended before delete completed");
            }
            drop(shared);
            info!(key, "Unsubscription successful");
            Ok(())
        } else {
            let e = LsError::UnsubscriptionRejected {
                key,
                status: response.describe(),
            };
            warn!(key, error = %e, "Unsubscription rejected");
            Err(e)
        }
    }

    /// Destroy the session and wait for the receive task to exit.
    ///
    /// No listener is called once this returns.
    #[instrument(skip(self))]
    pub async fn disconnect(&self) -> Result<()> {
        let (session_id, control_url) = {
            let mut shared = self.inner.shared.lock();
            if shared.receiver.is_none() {
                warn!("No connection to Lightstreamer");
                return Err(LsError::NotConnected);
            }
            shared.disconnect_requested = true;
            (
                shared.info.session_id().map(str::to_owned),
                shared.control_url.clone(),
            )
        };

        let destroyed = match session_id {
            Some(session_id) => match self
                .inner
                .control
                .send(&control_url, &session_id, ControlOp::Destroy, ControlParams::new())
                .await
            {
                Ok(response) if response.is_ok() => true,
                Ok(response) => {
                    warn!(status = %response.describe(), "Destroy request rejected");
                    false
                }
                Err(e) => {
                    warn!(error = %e, "Destroy request failed");
                    false
                }
            },
            None => false,
        };

        // Server closes the stream after a successful destroy; otherwise
        // close it locally right away.
        let grace = if destroyed {
            self.inner.disconnect_timeout
        } else {
            Duration::ZERO
        };

        // A rebind may install a new receiver while we wait on the old one.
        // A task still binding has no stream for the server to close.
        loop {
            let (receiver, rebinding) = {
                let mut shared = self.inner.shared.lock();
                (
                    shared.receiver.take(),
                    shared.state == SessionState::Rebinding,
                )
            };
            let Some(receiver) = receiver else {
                break;
            };
            receiver
                .join(if rebinding { Duration::ZERO } else { grace })
                .await;
        }

        let was_closed = {
            let mut shared = self.inner.shared.lock();
            let was_closed = shared.state == SessionState::Closed;
            shared.reset();
            was_closed
        };
        if !was_closed {
            self.inner
                .emit(SessionEvent::Closed(CloseReason::Disconnected));
        }

        info!("Disconnected from Lightstreamer");
        Ok(())
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        let mut shared = self.inner.shared.lock();
        shared.disconnect_requested = true;
        if let Some(receiver) = shared.receiver.take() {
            receiver.handle.abort();
        }
    }
}

impl Inner {
    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn create_session(&self) -> Result<(SessionInfo, LineReader)> {
        let url = self.base_url.join(CREATE_SESSION_PATH)?;
        let body = ControlParams::new()
            .with("LS_adapter_set", self.adapter_set.as_str())
            .with_opt("LS_user", self.user.as_deref())
            .with_opt("LS_password", self.password.as_deref())
            .encode();
        self.handshake(url, body).await
    }

    async fn bind(&self, control_url: &Url, session_id: &str) -> Result<(SessionInfo, LineReader)> {
        let url = control_url.join(BIND_SESSION_PATH)?;
        let body = ControlParams::new().with("LS_session", session_id).encode();
        self.handshake(url, body).await
    }

    /// Open a stream connection and read the status and metadata headers.
    async fn handshake(&self, url: Url, body: String) -> Result<(SessionInfo, LineReader)> {
        debug!(%url, "Opening stream connection");
        let mut reader = self
            .transport
            .post(url, body, ConnectionKind::Stream)
            .await?;

        let mut status = None;
        while let Some(line) = reader.next_line().await? {
            if !line.trim().is_empty() {
                status = Some(line);
                break;
            }
        }
        let status = status.ok_or(LsError::Transport(TransportError::Closed))?;

        if status.trim_end() != OK_STATUS {
            let mut diagnostic = vec![status];
            diagnostic.extend(reader.read_to_end().await.unwrap_or_default());
            warn!(?diagnostic, "Server response error");
            return Err(LsError::SessionRejected { diagnostic });
        }

        let mut info = SessionInfo::new();
        while let Some(line) = reader.next_line().await? {
            if line.trim().is_empty() {
                break;
            }
            if !info.parse_line(&line) {
                warn!(%line, "Ignoring malformed session header");
            }
        }

        if info.session_id().is_none() {
            return Err(LsError::ProtocolError(
                "handshake response carries no SessionId".to_string(),
            ));
        }
        Ok((info, reader))
    }

    /// Start a receive task on `reader`; caller holds the shared lock.
    fn spawn_receiver(self: &Arc<Self>, shared: &mut Shared, reader: LineReader) -> u64 {
        shared.generation += 1;
        let generation = shared.generation;
        let (shutdown, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(receiver::receive_loop(
            Arc::clone(self),
            reader,
            shutdown_rx,
            generation,
        ));

        shared.receiver = Some(Receiver {
            handle,
            shutdown,
            generation,
        });
        generation
    }
}
