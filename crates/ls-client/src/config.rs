//! Client configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{LsError, Result};

/// Static configuration of a [`StreamSession`](crate::StreamSession)
///
/// Loadable from TOML; every key is optional:
///
/// ```toml
/// server_url = "http://push.example.com:8080"
/// adapter_set = "DEMO"
/// user = "trader"
/// connect_timeout_secs = 5
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base server URL (e.g., "http://localhost:8080")
    pub server_url: String,
    /// Adapter set to open the session on
    pub adapter_set: String,
    pub user: Option<String>,
    pub password: Option<String>,
    /// TCP connect timeout for every connection
    pub connect_timeout_secs: u64,
    /// Total timeout of a control request
    pub control_timeout_secs: u64,
    /// How long disconnect() waits for the server to close the stream
    /// before closing it locally
    pub disconnect_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8080".to_string(),
            adapter_set: "DEMO".to_string(),
            user: None,
            password: None,
            connect_timeout_secs: 10,
            control_timeout_secs: 30,
            disconnect_timeout_secs: 5,
        }
    }
}

impl ClientConfig {
    /// Configuration for `server_url` and `adapter_set`, defaults elsewhere
    pub fn new(server_url: impl Into<String>, adapter_set: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            adapter_set: adapter_set.into(),
            ..Self::default()
        }
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| LsError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            LsError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parsed base URL
    pub fn base_url(&self) -> Result<Url> {
        Ok(Url::parse(&self.server_url)?)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_secs(self.control_timeout_secs)
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_secs(self.disconnect_timeout_secs)
    }
}
