//! ls-cli - Stock-list demo for Lightstreamer servers
//!
//! Opens a session, subscribes to the demo quote items in MERGE mode and
//! prints every update until Enter or Ctrl-C is pressed.

mod config;
mod demo;
mod output;

use anyhow::{Context, Result};
use clap::Parser;
use ls_client::StreamSession;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{ArgOverrides, Config};
use crate::output::{OutputContext, OutputFormat};

#[derive(Parser)]
#[command(name = "ls-cli")]
#[command(author, version, about = "Lightstreamer stock-list demo client")]
#[command(propagate_version = true)]
struct Cli {
    /// Server URL [default: http://localhost:8080]
    #[arg(short, long, env = "LS_SERVER")]
    server: Option<String>,

    /// Adapter set to open the session on [default: DEMO]
    #[arg(short, long, env = "LS_ADAPTER_SET")]
    adapter_set: Option<String>,

    /// User name sent with the session request
    #[arg(long, env = "LS_USER")]
    user: Option<String>,

    /// Password sent with the session request
    #[arg(long, env = "LS_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Data adapter for the subscription [default: QUOTE_ADAPTER]
    #[arg(short, long, env = "LS_DATA_ADAPTER")]
    data_adapter: Option<String>,

    /// Items to subscribe to (comma separated) [default: item1..item12]
    #[arg(long, value_delimiter = ',')]
    items: Vec<String>,

    /// Fields to subscribe to (comma separated)
    #[arg(long, value_delimiter = ',')]
    fields: Vec<String>,

    /// Configuration file path
    #[arg(short, long, env = "LS_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    output: OutputFormat,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Minimal output (for scripting)
    #[arg(short, long)]
    quiet: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Load config file
    let config = if let Some(config_path) = &cli.config {
        Config::load_from(config_path)?
    } else {
        Config::load().unwrap_or_default()
    };

    // Merge CLI args with config
    let merged = config.merge_with_args(&ArgOverrides {
        server: cli.server.as_deref(),
        adapter_set: cli.adapter_set.as_deref(),
        user: cli.user.as_deref(),
        password: cli.password.as_deref(),
        data_adapter: cli.data_adapter.as_deref(),
        no_color: cli.no_color,
    });

    let ctx = OutputContext::new(cli.output, merged.no_color, cli.quiet);

    let items = if cli.items.is_empty() {
        demo::default_items()
    } else {
        cli.items
    };
    let fields = if cli.fields.is_empty() {
        demo::default_fields()
    } else {
        cli.fields
    };

    let session =
        StreamSession::new(merged.client).context("Failed to create Lightstreamer session")?;
    demo::run(&session, items, fields, &merged.data_adapter, &ctx).await
}
