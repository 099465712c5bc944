//! Ledger status and event types
//!
//! The node pushes `author_extrinsicUpdate` notifications for a watched
//! order. Each notification's `result` is decoded into a [`StatusEvent`].
//! When the order lands in a block the node attaches the block's events for
//! that extrinsic, which is where success or a dispatch error shows up.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// A storage order as declared on chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageOrder {
    pub cid: String,
    pub size: u64,
    pub tip: u64,
    pub memo: String,
}

impl StorageOrder {
    /// Order with zero tip and empty memo.
    pub fn new(cid: impl Into<String>, size: u64) -> Self {
        Self {
            cid: cid.into(),
            size,
            tip: 0,
            memo: String::new(),
        }
    }
}

/// One status update for a submitted order
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    /// Accepted into the pool or gossiped to peers; keep waiting
    Broadcast,
    /// Included in a block
    InBlock { block: String, events: Vec<ChainEvent> },
    /// Included in a finalized block
    Finalized { block: String, events: Vec<ChainEvent> },
    /// Transport or pool-level failure (dropped, invalid, usurped)
    Error(String),
}

/// An event emitted by the runtime while applying the order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainEvent {
    pub section: String,
    pub method: String,
    #[serde(default, deserialize_with = "event_data")]
    pub data: Vec<Value>,
}

/// Event data is normally a positional array; some nodes send a named
/// object or a lone value instead. Those become a one-element list.
fn event_data<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    })
}

impl ChainEvent {
    pub fn new(section: &str, method: &str, data: Vec<Value>) -> Self {
        Self {
            section: section.to_string(),
            method: method.to_string(),
            data,
        }
    }

    pub fn extrinsic_success() -> Self {
        Self::new("system", "ExtrinsicSuccess", vec![])
    }

    pub fn extrinsic_failed(dispatch_error: Value) -> Self {
        Self::new("system", "ExtrinsicFailed", vec![dispatch_error])
    }

    pub fn is_extrinsic_success(&self) -> bool {
        self.section.eq_ignore_ascii_case("system") && self.method == "ExtrinsicSuccess"
    }

    pub fn is_extrinsic_failed(&self) -> bool {
        self.section.eq_ignore_ascii_case("system") && self.method == "ExtrinsicFailed"
    }

    /// Decoded dispatch error, when this is an `ExtrinsicFailed` event.
    pub fn rejection(&self) -> Option<ChainRejection> {
        if !self.is_extrinsic_failed() {
            return None;
        }
        Some(
            self.data
                .first()
                .map(ChainRejection::decode)
                .unwrap_or_else(|| ChainRejection::new("system", "Unknown", "no dispatch error attached")),
        )
    }
}

/// Why the runtime rejected an order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainRejection {
    pub module: String,
    pub name: String,
    pub description: String,
}

/// Rejections a later run can plausibly get past (funds, pool pressure).
const TRANSIENT_ERRORS: &[&str] = &[
    "InsufficientBalance",
    "InsufficientCurrency",
    "LiquidityRestrictions",
    "FundsUnavailable",
    "Exhausted",
    "Frozen",
    "BelowMinimum",
    "TooManyOrders",
];

impl ChainRejection {
    pub fn new(module: &str, name: &str, description: &str) -> Self {
        Self {
            module: module.to_string(),
            name: name.to_string(),
            description: description.to_string(),
        }
    }

    /// Decode a dispatch error as the node renders it.
    ///
    /// Accepted shapes:
    /// - `"BadOrigin"`
    /// - `{"module": {"section": "market", "name": "...", "docs": ["..."]}}`
    /// - `{"token": "FundsUnavailable"}`, `{"arithmetic": "Overflow"}`
    /// - `{"other": "free text"}`
    pub fn decode(value: &Value) -> Self {
        match value {
            Value::String(name) => Self::new("system", name, ""),
            Value::Object(map) => match map.iter().next() {
                Some((key, inner)) if map.len() == 1 => {
                    Self::decode_keyed(&key.to_ascii_lowercase(), inner)
                }
                _ => Self::new("unknown", "Unknown", &value.to_string()),
            },
            other => Self::new("unknown", "Unknown", &other.to_string()),
        }
    }

    fn decode_keyed(key: &str, inner: &Value) -> Self {
        match (key, inner) {
            ("module", Value::Object(module)) => {
                let section = module
                    .get("section")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or_else(|| module.get("index").map(|i| format!("pallet#{}", i)))
                    .unwrap_or_else(|| "unknown".to_string());
                let name = module
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or_else(|| module.get("error").map(render))
                    .unwrap_or_else(|| "Unknown".to_string());
                let description = match module.get("docs") {
                    Some(Value::Array(lines)) => lines
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::trim)
                        .collect::<Vec<_>>()
                        .join(" "),
                    Some(other) => render(other),
                    None => String::new(),
                };
                Self::new(&section, &name, &description)
            }
            ("other", inner) => Self::new("system", "Other", &render(inner)),
            (key, inner) => Self::new(key, &render(inner), ""),
        }
    }

    /// True when retrying from the same identity on a later run may succeed.
    pub fn is_transient(&self) -> bool {
        TRANSIENT_ERRORS.iter().any(|t| *t == self.name)
    }
}

impl std::fmt::Display for ChainRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.module, self.name)?;
        if !self.description.is_empty() {
            write!(f, ": {}", self.description)?;
        }
        Ok(())
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Decode the `result` of an `author_extrinsicUpdate` notification.
///
/// Returns `None` for statuses that carry no decision (retracted,
/// finalityTimeout) and for shapes we do not recognise.
pub fn parse_status(result: &Value) -> Option<StatusEvent> {
    match result {
        Value::String(s) => match s.as_str() {
            "ready" | "future" => Some(StatusEvent::Broadcast),
            "dropped" | "invalid" | "usurped" => Some(StatusEvent::Error(format!("transaction {}", s))),
            other => {
                debug!(status = %other, "Ignoring unrecognised status");
                None
            }
        },
        Value::Object(map) => {
            let (key, inner) = map.iter().next()?;
            match key.as_str() {
                "broadcast" | "ready" | "future" => Some(StatusEvent::Broadcast),
                "inBlock" => {
                    let (block, events) = block_and_events(inner);
                    Some(StatusEvent::InBlock { block, events })
                }
                "finalized" => {
                    let (block, events) = block_and_events(inner);
                    Some(StatusEvent::Finalized { block, events })
                }
                "dropped" | "invalid" | "usurped" => {
                    Some(StatusEvent::Error(format!("transaction {}: {}", key, render(inner))))
                }
                "error" => Some(StatusEvent::Error(render(inner))),
                other => {
                    debug!(status = %other, "Ignoring status without a decision");
                    None
                }
            }
        }
        _ => None,
    }
}

fn block_and_events(value: &Value) -> (String, Vec<ChainEvent>) {
    match value {
        Value::String(block) => (block.clone(), Vec::new()),
        Value::Object(map) => {
            let block = map.get("block").map(render).unwrap_or_default();
            let events = match map.get("events") {
                Some(Value::Array(raw)) => raw.iter().filter_map(decode_event).collect(),
                _ => Vec::new(),
            };
            (block, events)
        }
        other => (render(other), Vec::new()),
    }
}

/// One event of a block. An event we cannot read is skipped on its own so
/// it never hides the outcome events next to it.
fn decode_event(raw: &Value) -> Option<ChainEvent> {
    match ChainEvent::deserialize(raw) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!(event = %raw, error = %e, "Skipping undecodable chain event");
            None
        }
    }
}
