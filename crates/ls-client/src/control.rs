//! Control connection: one request, one status line

use std::fmt;
use std::sync::Arc;

use tracing::debug;
use url::Url;

use crate::codec::{ControlParams, CONTROL_PATH, OK_STATUS};
use crate::error::Result;
use crate::transport::{ConnectionKind, HttpTransport};

/// Control operation (`LS_op`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOp {
    /// Create and activate a table
    Add,
    /// Delete a previously created table
    Delete,
    /// Force closure of the session
    Destroy,
}

impl ControlOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlOp::Add => "add",
            ControlOp::Delete => "delete",
            ControlOp::Destroy => "destroy",
        }
    }
}

impl fmt::Display for ControlOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded answer to a control request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlResponse {
    /// First non-empty line of the body
    pub status: String,
    /// Remaining lines, only collected when the status is not `OK`
    pub diagnostic: Vec<String>,
}

impl ControlResponse {
    pub fn is_ok(&self) -> bool {
        self.status == OK_STATUS
    }

    /// Status plus diagnostic lines, for error messages
    pub fn describe(&self) -> String {
        std::iter::once(self.status.as_str())
            .chain(self.diagnostic.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" / ")
    }
}

/// Issues control commands against the session's control endpoint
#[derive(Clone)]
pub struct ControlChannel {
    transport: Arc<dyn HttpTransport>,
}

impl ControlChannel {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    /// Send `op` for `session_id` with the extra `params`
    pub async fn send(
        &self,
        control_url: &Url,
        session_id: &str,
        op: ControlOp,
        params: ControlParams,
    ) -> Result<ControlResponse> {
        let url = control_url.join(CONTROL_PATH)?;
        let body = ControlParams::new()
            .with("LS_session", session_id)
            .with("LS_op", op.as_str())
            .extend(params)
            .encode();

        debug!(%url, %op, "Sending control request");
        let mut reader = self.transport.post(url, body, ConnectionKind::Control).await?;

        let mut status = String::new();
        while let Some(line) = reader.next_line().await? {
            if !line.trim().is_empty() {
                status = line.trim_end().to_string();
                break;
            }
        }

        let diagnostic = if status == OK_STATUS {
            Vec::new()
        } else {
            reader.read_to_end().await.unwrap_or_default()
        };

        debug!(%op, %status, "Control response");
        Ok(ControlResponse { status, diagnostic })
    }
}
