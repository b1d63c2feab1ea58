//! Listener registration and session event notification

use tokio::sync::mpsc;

use crate::error::LsError;
use crate::subscription::ItemUpdate;

/// Receives item updates of one subscription
///
/// Listeners run on the receive task; they should return quickly.
pub trait UpdateListener: Send + Sync {
    fn on_item_update(&self, update: &ItemUpdate);
}

impl<F> UpdateListener for F
where
    F: Fn(&ItemUpdate) + Send + Sync,
{
    fn on_item_update(&self, update: &ItemUpdate) {
        self(update)
    }
}

/// Listener forwarding every update into an unbounded channel
///
/// Useful when updates are consumed from async code.
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<ItemUpdate>,
}

impl ChannelListener {
    /// Create a listener and the receiving end of its channel
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ItemUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl UpdateListener for ChannelListener {
    fn on_item_update(&self, update: &ItemUpdate) {
        // Receiver gone means nobody is interested any more.
        let _ = self.tx.send(update.clone());
    }
}

/// Why a stream session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Caller requested disconnect()
    Disconnected,
    /// Server sent `END`
    ServerClosed { cause: Option<i32> },
    /// Server sent `ERROR`
    ProtocolError(String),
    /// Server sent `SYNC ERROR`
    SyncLost,
    /// Stream ended or failed without a protocol message
    ConnectionLost,
    /// `LOOP` received but the bind handshake failed
    RebindFailed(String),
}

impl CloseReason {
    /// Error equivalent of a server-initiated termination
    pub fn to_error(&self) -> Option<LsError> {
        match self {
            CloseReason::ServerClosed { cause } => Some(LsError::ServerClosed { cause: *cause }),
            CloseReason::ProtocolError(line) => Some(LsError::ProtocolError(line.clone())),
            CloseReason::SyncLost => Some(LsError::SyncLost),
            CloseReason::RebindFailed(message) => Some(LsError::ProtocolError(message.clone())),
            CloseReason::Disconnected | CloseReason::ConnectionLost => None,
        }
    }
}

/// Lifecycle notifications broadcast by a [`StreamSession`](crate::StreamSession)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Session created and receive task started
    Connected { session_id: String },
    /// Stream connection replaced after `LOOP`
    Rebound { session_id: String, generation: u64 },
    /// Update line skipped (malformed or unknown table)
    UpdateSkipped { table: Option<u32>, reason: String },
    /// Session ended; state has been cleared
    Closed(CloseReason),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_reason_errors() {
        assert!(matches!(
            CloseReason::SyncLost.to_error(),
            Some(LsError::SyncLost)
        ));
        assert!(matches!(
            CloseReason::ServerClosed { cause: Some(8) }.to_error(),
            Some(LsError::ServerClosed { cause: Some(8) })
        ));
        assert!(CloseReason::Disconnected.to_error().is_none());
    }
}
