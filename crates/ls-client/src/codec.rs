//! Wire codec for the Lightstreamer text protocol
//!
//! Covers the three things the protocol puts on the wire:
//! form-encoded control parameters, classified stream lines and
//! differentially encoded field values.

use url::form_urlencoded;

use crate::error::{LsError, Result};

/// Session creation endpoint, relative to the server base URL
pub const CREATE_SESSION_PATH: &str = "lightstreamer/create_session.txt";
/// Stream rebind endpoint, relative to the control URL
pub const BIND_SESSION_PATH: &str = "lightstreamer/bind_session.txt";
/// Control endpoint, relative to the control URL
pub const CONTROL_PATH: &str = "lightstreamer/control.txt";

/// Status token of a successful response
pub const OK_STATUS: &str = "OK";

const PROBE: &str = "PROBE";
const ERROR: &str = "ERROR";
const LOOP: &str = "LOOP";
const SYNC_ERROR: &str = "SYNC ERROR";
const END: &str = "END";
const PREAMBLE: &str = "Preamble";

/// Ordered set of request parameters for a POST body
///
/// Entries with an empty or missing value are dropped at encoding time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlParams {
    entries: Vec<(&'static str, Option<String>)>,
}

impl ControlParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a parameter
    pub fn with(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.entries.push((name, Some(value.into())));
        self
    }

    /// Append a parameter that may be absent
    pub fn with_opt(mut self, name: &'static str, value: Option<impl Into<String>>) -> Self {
        self.entries.push((name, value.map(Into::into)));
        self
    }

    /// Append all entries of `other`, keeping their order
    pub fn extend(mut self, other: ControlParams) -> Self {
        self.entries.extend(other.entries);
        self
    }

    /// Encode as `application/x-www-form-urlencoded`
    pub fn encode(&self) -> String {
        encode_control_params(
            self.entries
                .iter()
                .map(|(name, value)| (*name, value.as_deref())),
        )
    }
}

/// Form-encode parameters, skipping empty or absent values.
///
/// Output order follows input order.
pub fn encode_control_params<'a, I>(params: I) -> String
where
    I: IntoIterator<Item = (&'a str, Option<&'a str>)>,
{
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (name, value) in params {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            serializer.append_pair(name, value);
        }
    }
    serializer.finish()
}

/// Decode one field of an update line.
///
/// `previous` is the last value stored for the same item and field.
pub fn decode_field(raw: &str, previous: Option<&str>) -> Option<String> {
    match raw {
        "$" => Some(String::new()),
        "#" => None,
        "" => previous.map(str::to_owned),
        _ if raw.starts_with('#') || raw.starts_with('$') => Some(raw[1..].to_owned()),
        _ => Some(raw.to_owned()),
    }
}

/// Meaning of one line received on the stream connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamLine {
    /// Empty line, carries nothing
    Blank,
    /// Keepalive heartbeat
    Probe,
    /// Fatal server error; the full line is kept as diagnostic
    Error(String),
    /// Stream must be replaced by a rebind on the same session
    Loop,
    /// Server lost track of the session state
    SyncError,
    /// Session closed by the server
    End { cause: Option<i32> },
    /// Padding sent by the server at stream start
    Preamble,
    /// `table,item|fields...` update
    Update(String),
}

/// Classify a stream line (already stripped of its line terminator).
pub fn classify_line(line: &str) -> StreamLine {
    if line.trim().is_empty() {
        StreamLine::Blank
    } else if line.starts_with(PROBE) {
        StreamLine::Probe
    } else if line.starts_with(ERROR) {
        StreamLine::Error(line.to_owned())
    } else if line.starts_with(LOOP) {
        StreamLine::Loop
    } else if line.starts_with(SYNC_ERROR) {
        StreamLine::SyncError
    } else if line.starts_with(END) {
        let cause = line[END.len()..].trim().parse().ok();
        StreamLine::End { cause }
    } else if line.starts_with(PREAMBLE) {
        StreamLine::Preamble
    } else {
        StreamLine::Update(line.to_owned())
    }
}

/// Split an update line into its table id and the item part.
pub fn parse_update_line(line: &str) -> Result<(u32, &str)> {
    let (table, rest) = line
        .split_once(',')
        .ok_or_else(|| LsError::malformed(format!("missing table separator in {:?}", line)))?;
    let table = table
        .trim()
        .parse::<u32>()
        .map_err(|_| LsError::malformed(format!("invalid table id {:?}", table)))?;
    Ok((table, rest))
}
