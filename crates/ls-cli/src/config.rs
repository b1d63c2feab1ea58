//! Configuration file handling for ls-cli

use anyhow::{Context, Result};
use ls_client::ClientConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::demo::DEFAULT_DATA_ADAPTER;

/// Configuration for the CLI tool
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Default server URL
    pub server: Option<String>,
    /// Default adapter set
    pub adapter_set: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Data adapter feeding the stock items
    pub data_adapter: Option<String>,
    /// Disable colored output
    pub no_color: Option<bool>,
    pub connect_timeout_secs: Option<u64>,
    pub control_timeout_secs: Option<u64>,
    pub disconnect_timeout_secs: Option<u64>,
}

/// Values given on the command line (or through their env variables)
#[derive(Debug, Default)]
pub struct ArgOverrides<'a> {
    pub server: Option<&'a str>,
    pub adapter_set: Option<&'a str>,
    pub user: Option<&'a str>,
    pub password: Option<&'a str>,
    pub data_adapter: Option<&'a str>,
    pub no_color: bool,
}

impl Config {
    /// Load configuration from the default config file
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("ls-cli");

        Ok(config_dir.join("config.toml"))
    }

    /// Merge CLI arguments over config file values
    pub fn merge_with_args(&self, args: &ArgOverrides<'_>) -> MergedConfig {
        let defaults = ClientConfig::default();
        let pick = |arg: Option<&str>, file: &Option<String>| {
            arg.map(String::from).or_else(|| file.clone())
        };

        let client = ClientConfig {
            server_url: pick(args.server, &self.server).unwrap_or(defaults.server_url),
            adapter_set: pick(args.adapter_set, &self.adapter_set)
                .unwrap_or(defaults.adapter_set),
            user: pick(args.user, &self.user),
            password: pick(args.password, &self.password),
            connect_timeout_secs: self
                .connect_timeout_secs
                .unwrap_or(defaults.connect_timeout_secs),
            control_timeout_secs: self
                .control_timeout_secs
                .unwrap_or(defaults.control_timeout_secs),
            disconnect_timeout_secs: self
                .disconnect_timeout_secs
                .unwrap_or(defaults.disconnect_timeout_secs),
        };

        MergedConfig {
            client,
            data_adapter: pick(args.data_adapter, &self.data_adapter)
                .unwrap_or_else(|| DEFAULT_DATA_ADAPTER.to_string()),
            no_color: args.no_color || self.no_color.unwrap_or(false),
        }
    }
}

/// Fully resolved configuration after merging CLI args
#[derive(Debug, Clone)]
pub struct MergedConfig {
    pub client: ClientConfig,
    pub data_adapter: String,
    pub no_color: bool,
}
