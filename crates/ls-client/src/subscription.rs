//! Subscription description, per-item state and update fan-out

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::codec::decode_field;
use crate::error::{LsError, Result};
use crate::listener::UpdateListener;

/// Subscription mode as understood by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubscriptionMode {
    #[default]
    Merge,
    Distinct,
    Raw,
    Command,
}

impl SubscriptionMode {
    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionMode::Merge => "MERGE",
            SubscriptionMode::Distinct => "DISTINCT",
            SubscriptionMode::Raw => "RAW",
            SubscriptionMode::Command => "COMMAND",
        }
    }
}

impl fmt::Display for SubscriptionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionMode {
    type Err = LsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "MERGE" => Ok(SubscriptionMode::Merge),
            "DISTINCT" => Ok(SubscriptionMode::Distinct),
            "RAW" => Ok(SubscriptionMode::Raw),
            "COMMAND" => Ok(SubscriptionMode::Command),
            _ => Err(LsError::Config(format!("unknown subscription mode: {}", s))),
        }
    }
}

/// Last known field values of one item, keyed by field position
///
/// A field is absent until the first update that carries it. A present
/// field holds `None` when the server sent a null value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ItemState {
    values: BTreeMap<usize, Option<String>>,
}

impl ItemState {
    fn get(&self, field: usize) -> Option<&str> {
        self.values.get(&field).and_then(|v| v.as_deref())
    }

    fn merge(&mut self, decoded: Vec<(usize, Option<String>)>) {
        self.values.extend(decoded);
    }

    fn snapshot(&self, field_names: &[String]) -> Vec<(String, Option<String>)> {
        self.values
            .iter()
            .map(|(index, value)| (field_names[*index].clone(), value.clone()))
            .collect()
    }
}

/// One decoded update: the full current state of an item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemUpdate {
    /// 1-based item position
    pub item_pos: u32,
    pub item_name: String,
    /// Every field received so far, in declared order
    pub fields: Vec<(String, Option<String>)>,
    /// Fields actually resent by this update
    pub changed_fields: Vec<String>,
}

impl ItemUpdate {
    /// Current value of a field; `None` for null or never received
    pub fn value(&self, field: &str) -> Option<&str> {
        self.field(field).and_then(|v| v.as_deref())
    }

    /// Raw entry of a field: `None` if never received, `Some(None)` if null
    pub fn field(&self, field: &str) -> Option<&Option<String>> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    /// Whether `field` was carried by this update
    pub fn is_changed(&self, field: &str) -> bool {
        self.changed_fields.iter().any(|f| f == field)
    }
}

/// A logical subscription: what to subscribe to, and what was received
///
/// # Example
///
/// ```
/// use ls_client::{Subscription, SubscriptionMode};
///
/// let sub = Subscription::new(SubscriptionMode::Merge, ["item1", "item2"], ["last_price"])
///     .with_data_adapter("QUOTE_ADAPTER");
/// sub.add_listener(|update: &ls_client::ItemUpdate| {
///     println!("{} -> {:?}", update.item_name, update.value("last_price"));
/// });
///
/// let update = sub.process_line("2|12.5").unwrap();
/// assert_eq!(update.item_name, "item2");
/// ```
pub struct Subscription {
    mode: SubscriptionMode,
    items: Vec<String>,
    fields: Vec<String>,
    data_adapter: String,
    snapshot: bool,
    state: Mutex<BTreeMap<u32, ItemState>>,
    listeners: RwLock<Vec<Arc<dyn UpdateListener>>>,
}

impl Subscription {
    pub fn new<I, F>(mode: SubscriptionMode, items: I, fields: F) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        F: IntoIterator,
        F::Item: Into<String>,
    {
        Self {
            mode,
            items: items.into_iter().map(Into::into).collect(),
            fields: fields.into_iter().map(Into::into).collect(),
            data_adapter: String::new(),
            snapshot: true,
            state: Mutex::new(BTreeMap::new()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Use a named data adapter instead of the adapter set default
    pub fn with_data_adapter(mut self, adapter: impl Into<String>) -> Self {
        self.data_adapter = adapter.into();
        self
    }

    /// Request (or not) the initial snapshot. Ignored in RAW mode.
    pub fn with_snapshot(mut self, snapshot: bool) -> Self {
        self.snapshot = snapshot;
        self
    }

    pub fn mode(&self) -> SubscriptionMode {
        self.mode
    }

    pub fn items(&self) -> &[String] {
        &self.items
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn data_adapter(&self) -> &str {
        &self.data_adapter
    }

    pub fn snapshot(&self) -> bool {
        self.snapshot
    }

    /// Register a listener; listeners are notified in registration order
    pub fn add_listener<L>(&self, listener: L)
    where
        L: UpdateListener + 'static,
    {
        self.listeners.write().push(Arc::new(listener));
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Current state of an item, `None` if nothing was received for it yet
    pub fn item_values(&self, item_pos: u32) -> Option<Vec<(String, Option<String>)>> {
        self.state
            .lock()
            .get(&item_pos)
            .map(|item| item.snapshot(&self.fields))
    }

    /// Decode an `item|field|...` line and merge it into the item state.
    pub fn decode_update_line(&self, line: &str) -> Result<ItemUpdate> {
        let mut tokens = line.split('|');
        let pos_token = tokens.next().unwrap_or_default();
        let item_pos = pos_token
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|pos| *pos >= 1 && *pos as usize <= self.items.len())
            .ok_or_else(|| {
                LsError::malformed(format!(
                    "item position {:?} outside 1..={}",
                    pos_token,
                    self.items.len()
                ))
            })?;

        let raw: Vec<&str> = tokens.collect();
        if raw.len() > self.fields.len() {
            return Err(LsError::malformed(format!(
                "{} field values for {} fields",
                raw.len(),
                self.fields.len()
            )));
        }

        let mut table = self.state.lock();
        let item = table.entry(item_pos).or_default();

        let mut changed_fields = Vec::new();
        let decoded: Vec<(usize, Option<String>)> = raw
            .iter()
            .enumerate()
            .map(|(index, token)| {
                if !token.is_empty() {
                    changed_fields.push(self.fields[index].clone());
                }
                (index, decode_field(token, item.get(index)))
            })
            .collect();
        item.merge(decoded);

        Ok(ItemUpdate {
            item_pos,
            item_name: self.items[item_pos as usize - 1].clone(),
            fields: item.snapshot(&self.fields),
            changed_fields,
        })
    }

    /// Deliver an update to every listener.
    ///
    /// A panicking listener is logged and skipped.
    pub fn notify(&self, update: &ItemUpdate) {
        let listeners = self.listeners.read().clone();
        for (index, listener) in listeners.iter().enumerate() {
            let delivered =
                panic::catch_unwind(AssertUnwindSafe(|| listener.on_item_update(update)));
            if delivered.is_err() {
                warn!(listener = index, item = %update.item_name, "Update listener panicked");
            }
        }
    }

    /// Decode a line and notify listeners with the result
    pub fn process_line(&self, line: &str) -> Result<ItemUpdate> {
        let update = self.decode_update_line(line)?;
        trace!(item = %update.item_name, changed = ?update.changed_fields, "Item update");
        self.notify(&update);
        Ok(update)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("mode", &self.mode)
            .field("items", &self.items)
            .field("fields", &self.fields)
            .field("data_adapter", &self.data_adapter)
            .field("snapshot", &self.snapshot)
            .field("listeners", &self.listener_count())
            .finish()
    }
}
