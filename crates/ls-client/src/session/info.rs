//! Session metadata returned by the create/bind handshake

use std::collections::HashMap;
use std::time::Duration;

use url::Url;

use crate::error::{LsError, Result};

pub const SESSION_ID: &str = "SessionId";
pub const CONTROL_ADDRESS: &str = "ControlAddress";
pub const KEEPALIVE_MILLIS: &str = "KeepaliveMillis";
pub const MAX_BANDWIDTH: &str = "MaxBandwidth";

/// Key/value metadata of the current session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionInfo {
    values: HashMap<String, String>,
}

impl SessionInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Merge another handshake's metadata over this one
    pub fn merge(&mut self, other: SessionInfo) {
        self.values.extend(other.values);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.get(SESSION_ID)
    }

    /// `host[:port]` to use for control and bind requests
    pub fn control_address(&self) -> Option<&str> {
        self.get(CONTROL_ADDRESS).filter(|a| !a.trim().is_empty())
    }

    pub fn keepalive(&self) -> Option<Duration> {
        self.get(KEEPALIVE_MILLIS)
            .and_then(|v| v.trim().parse().ok())
            .map(Duration::from_millis)
    }

    /// Bandwidth granted by the server, in kbit/s
    pub fn max_bandwidth(&self) -> Option<f64> {
        self.get(MAX_BANDWIDTH).and_then(|v| v.trim().parse().ok())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Parse one `key:value` header line
    pub(crate) fn parse_line(&mut self, line: &str) -> bool {
        match line.split_once(':') {
            Some((key, value)) => {
                self.insert(key.trim(), value.trim());
                true
            }
            None => false,
        }
    }
}

/// Control URL derived from the base URL and an optional `ControlAddress`.
///
/// The hint replaces host and (when given) port; the scheme is kept.
pub fn derive_control_url(base: &Url, control_address: Option<&str>) -> Result<Url> {
    let Some(address) = control_address.map(str::trim).filter(|a| !a.is_empty()) else {
        return Ok(base.clone());
    };

    let hint = Url::parse(&format!("{}://{}/", base.scheme(), address))?;
    let explicit_port = address
        .rsplit_once(':')
        .and_then(|(_, port)| port.parse::<u16>().ok());

    let mut url = base.clone();
    url.set_host(hint.host_str())?;
    url.set_port(explicit_port.or(base.port()))
        .map_err(|_| LsError::Config(format!("cannot apply control address {}", address)))?;
    Ok(url)
}
