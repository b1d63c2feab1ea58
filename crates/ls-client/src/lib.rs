//! Lightstreamer Client Library
//!
//! Client side of the Lightstreamer text streaming protocol: a session is
//! created over a long-lived HTTP stream connection, tables are added and
//! removed over short control requests, and update lines read from the
//! stream are decoded and fanned out to per-subscription listeners.
//!
//! # Example
//!
//! ```rust,no_run
//! use ls_client::{ClientConfig, ItemUpdate, StreamSession, Subscription, SubscriptionMode};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let session = StreamSession::new(ClientConfig::new("http://localhost:8080", "DEMO"))?;
//!     session.connect().await?;
//!
//!     let sub = Subscription::new(
//!         SubscriptionMode::Merge,
//!         ["item1", "item2"],
//!         ["stock_name", "last_price"],
//!     )
//!     .with_data_adapter("QUOTE_ADAPTER");
//!     sub.add_listener(|update: &ItemUpdate| {
//!         println!("{} {:?}", update.item_name, update.value("last_price"));
//!     });
//!
//!     let key = session.subscribe(sub).await?.into_result()?;
//!     tokio::time::sleep(std::time::Duration::from_secs(10)).await;
//!
//!     session.unsubscribe(key).await?;
//!     session.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Testing
//!
//! The `testing` module provides an in-memory transport and a local axum
//! server for exercising a session without a real Lightstreamer server:
//!
//! ```rust,ignore
//! use ls_client::testing::ScriptedTransport;
//! use ls_client::codec::CREATE_SESSION_PATH;
//!
//! let transport = ScriptedTransport::new();
//! let feed = transport.push_stream(CREATE_SESSION_PATH, &["OK", "SessionId:S1", ""]);
//! let session = StreamSession::with_transport(config, transport.clone())?;
//! session.connect().await?;
//! feed.send_line("1|42");
//! ```

pub mod codec;
mod config;
mod control;
mod error;
mod listener;
mod session;
mod subscription;
pub mod testing;
pub mod transport;

pub use config::ClientConfig;
pub use control::{ControlChannel, ControlOp, ControlResponse};
pub use error::{LsError, Result, TransportError, TransportResult};
pub use listener::{ChannelListener, CloseReason, SessionEvent, UpdateListener};
pub use session::{
    derive_control_url, SessionInfo, SessionState, StreamSession, SubscribeOutcome,
};
pub use subscription::{ItemUpdate, Subscription, SubscriptionMode};

// Re-export transport types for convenience
pub use transport::{ConnectionKind, HttpTransport, LineReader, ReqwestTransport};
