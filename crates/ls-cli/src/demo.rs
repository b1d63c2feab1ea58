//! Stock-list demo: subscribe to the quote items and print every update

use anyhow::{Context, Result};
use ls_client::{
    ChannelListener, CloseReason, SessionEvent, StreamSession, Subscription, SubscriptionMode,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::output::OutputContext;

/// Data adapter of the stock-list demo
pub const DEFAULT_DATA_ADAPTER: &str = "QUOTE_ADAPTER";

/// Fields published for every stock item
pub const DEFAULT_FIELDS: [&str; 5] = ["stock_name", "last_price", "time", "bid", "ask"];

/// Number of stock items the demo adapter publishes
const DEFAULT_ITEM_COUNT: usize = 12;

/// `item1` .. `item12`
pub fn default_items() -> Vec<String> {
    (1..=DEFAULT_ITEM_COUNT).map(|i| format!("item{}", i)).collect()
}

pub fn default_fields() -> Vec<String> {
    DEFAULT_FIELDS.iter().map(|f| f.to_string()).collect()
}

/// Why the streaming loop stopped
enum Stop {
    /// Enter or Ctrl-C
    User,
    /// Session ended on its own
    Closed(CloseReason),
}

/// Connect, stream the stock list until the user stops it, then clean up.
pub async fn run(
    session: &StreamSession,
    items: Vec<String>,
    fields: Vec<String>,
    data_adapter: &str,
    ctx: &OutputContext,
) -> Result<()> {
    ctx.info(&format!("Connecting to {}...", session.base_url()));
    session
        .connect()
        .await
        .context("Unable to connect to Lightstreamer Server")?;
    ctx.success(&format!(
        "Session {} established",
        session.session_id().unwrap_or_default()
    ));

    let mut events = session.events();

    let subscription = Subscription::new(SubscriptionMode::Merge, items.clone(), fields.clone())
        .with_data_adapter(data_adapter);
    let (listener, mut updates) = ChannelListener::channel();
    subscription.add_listener(listener);

    let outcome = session.subscribe(subscription).await?;
    let key = outcome.key;
    if let Some(e) = &outcome.rejection {
        ctx.warn(&format!("Subscription {} rejected: {}", key, e));
    } else {
        ctx.success(&format!(
            "Subscribed to {} item(s) on {}",
            items.len(),
            data_adapter
        ));
    }

    ctx.info(&format!(
        "{:-^80}",
        " HIT CR TO UNSUBSCRIBE AND DISCONNECT FROM LIGHTSTREAMER "
    ));
    ctx.print_header(&fields);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let stop = loop {
        tokio::select! {
            Some(update) = updates.recv() => ctx.print_update(&update, &fields),
            event = events.recv() => match event {
                Ok(SessionEvent::Closed(reason)) => break Stop::Closed(reason),
                Ok(SessionEvent::Rebound { generation, .. }) => {
                    debug!(generation, "Stream connection rebound");
                }
                Ok(SessionEvent::UpdateSkipped { table, reason }) => {
                    ctx.warn(&format!("Skipped update for table {:?}: {}", table, reason));
                }
                Ok(SessionEvent::Connected { .. }) => {}
                Err(RecvError::Lagged(missed)) => warn!(missed, "Missed session events"),
                Err(RecvError::Closed) => break Stop::User,
            },
            _ = stdin.next_line() => break Stop::User,
            _ = tokio::signal::ctrl_c() => break Stop::User,
        }
    };

    match stop {
        Stop::User => {
            if let Err(e) = session.unsubscribe(key).await {
                ctx.warn(&format!("Unsubscribe failed: {}", e));
            }
            session.disconnect().await?;
            ctx.success("DISCONNECTED FROM LIGHTSTREAMER");
            Ok(())
        }
        Stop::Closed(reason) => match reason.to_error() {
            Some(e) => {
                ctx.error(&format!("Session closed: {}", e));
                Err(e.into())
            }
            None => {
                ctx.warn(&format!("Session closed: {:?}", reason));
                Ok(())
            }
        },
    }
}
