//! Background receive loop of the stream connection

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::{derive_control_url, Inner, SessionState};
use crate::codec::{classify_line, parse_update_line, StreamLine};
use crate::error::LsError;
use crate::listener::{CloseReason, SessionEvent};
use crate::transport::LineReader;

/// Why the loop stopped reading
enum LoopExit {
    Rebind,
    Close(CloseReason),
}

pub(super) async fn receive_loop(
    inner: Arc<Inner>,
    mut reader: LineReader,
    mut shutdown: watch::Receiver<bool>,
    generation: u64,
) {
    debug!(generation, "Receive loop started");

    let exit = loop {
        let line = tokio::select! {
            biased;
            _ = shutdown.changed() => break LoopExit::Close(CloseReason::Disconnected),
            line = reader.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                warn!(generation, "Stream connection ended without END");
                break LoopExit::Close(CloseReason::ConnectionLost);
            }
            Err(e) => {
                warn!(generation, error = %e, "Stream connection failed");
                break LoopExit::Close(CloseReason::ConnectionLost);
            }
        };

        match classify_line(&line) {
            StreamLine::Blank => {}
            StreamLine::Probe => debug!("PROBE"),
            StreamLine::Preamble => debug!("Preamble"),
            StreamLine::Error(line) => {
                error!(%line, "Server sent ERROR");
                break LoopExit::Close(CloseReason::ProtocolError(line));
            }
            StreamLine::Loop => {
                debug!("LOOP");
                break LoopExit::Rebind;
            }
            StreamLine::SyncError => {
                error!("SYNC ERROR");
                break LoopExit::Close(CloseReason::SyncLost);
            }
            StreamLine::End { cause } => {
                info!(?cause, "Connection closed by the server");
                break LoopExit::Close(CloseReason::ServerClosed { cause });
            }
            StreamLine::Update(line) => inner.dispatch(&line),
        }
    };

    drop(reader);

    match exit {
        LoopExit::Rebind => inner.rebind(generation, shutdown).await,
        LoopExit::Close(reason) => inner.close(generation, reason),
    }
}

impl Inner {
    /// Route an update line to its subscription. Bad lines are skipped.
    fn dispatch(&self, line: &str) {
        let (table, rest) = match parse_update_line(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(%line, error = %e, "Skipping update line");
                self.emit(SessionEvent::UpdateSkipped {
                    table: None,
                    reason: e.to_string(),
                });
                return;
            }
        };

        let subscription = self.shared.lock().subscriptions.get(&table).cloned();
        let Some(subscription) = subscription else {
            let e = LsError::UnknownSubscription(table);
            warn!(table, "No subscription found, skipping update");
            self.emit(SessionEvent::UpdateSkipped {
                table: Some(table),
                reason: e.to_string(),
            });
            return;
        };

        if let Err(e) = subscription.process_line(rest) {
            warn!(table, %line, error = %e, "Skipping update line");
            self.emit(SessionEvent::UpdateSkipped {
                table: Some(table),
                reason: e.to_string(),
            });
        }
    }

    /// Bind a new stream connection to the current session and hand over
    /// to a new receive task. Session and subscriptions are kept as they
    /// are: the server holds subscriptions per session, not per connection.
    pub(super) async fn rebind(
        self: &Arc<Self>,
        generation: u64,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let target = {
            let mut shared = self.shared.lock();
            let session_id = shared.info.session_id().map(str::to_owned);
            match session_id {
                Some(id) if !shared.disconnect_requested => {
                    shared.state = SessionState::Rebinding;
                    Some((id, shared.control_url.clone()))
                }
                _ => None,
            }
        };
        let Some((session_id, control_url)) = target else {
            self.close(generation, CloseReason::Disconnected);
            return;
        };

        info!(%session_id, generation, "Rebinding stream connection");
        let bound = tokio::select! {
            biased;
            _ = shutdown.changed() => {
                debug!(generation, "Rebind interrupted");
                self.close(generation, CloseReason::Disconnected);
                return;
            }
            bound = timeout(self.bind_timeout, self.bind(&control_url, &session_id)) => {
                bound.unwrap_or_else(|_| {
                    Err(LsError::ProtocolError("bind handshake timed out".to_string()))
                })
            }
        };

        match bound {
            Ok((metadata, reader)) => {
                let mut shared = self.shared.lock();
                if shared.disconnect_requested {
                    drop(shared);
                    drop(reader);
                    self.close(generation, CloseReason::Disconnected);
                    return;
                }

                shared.info.merge(metadata);
                match derive_control_url(&self.base_url, shared.info.control_address()) {
                    Ok(url) => shared.control_url = url,
                    Err(e) => warn!(error = %e, "Keeping previous control URL"),
                }
                shared.state = SessionState::Active;
                let next = self.spawn_receiver(&mut shared, reader);
                drop(shared);

                info!(%session_id, generation = next, "Stream connection rebound");
                self.emit(SessionEvent::Rebound {
                    session_id,
                    generation: next,
                });
            }
            Err(e) => {
                error!(error = %e, "Rebind failed");
                self.close(generation, CloseReason::RebindFailed(e.to_string()));
            }
        }
    }

    /// Terminal exit of the receive task: clear the session.
    pub(super) fn close(&self, generation: u64, reason: CloseReason) {
        let reason = {
            let mut shared = self.shared.lock();
            if shared.generation != generation {
                debug!(generation, "Stale receive task exiting");
                return;
            }
            let requested = shared.disconnect_requested;
            shared.receiver = None;
            shared.reset();
            if requested {
                CloseReason::Disconnected
            } else {
                reason
            }
        };

        match &reason {
            CloseReason::Disconnected => info!("Stream connection closed"),
            CloseReason::ServerClosed { .. } | CloseReason::ConnectionLost => {
                warn!(?reason, "Session terminated")
            }
            _ => error!(?reason, "Session terminated"),
        }
        self.emit(SessionEvent::Closed(reason));
    }
}
