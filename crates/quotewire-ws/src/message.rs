//! Feed frame types.
//!
//! The feed protocol is asymmetric: the outbound probe is the plain text
//! literal `ping`, while the reply is the JSON object `{"type":"pong"}`.
//! Every other JSON object is read as `{instrument: price, ...}`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Outbound heartbeat probe. Sent as-is, not JSON encoded.
pub const PING_FRAME: &str = "ping";

/// Heartbeat reply (`{"type": "pong"}`).
///
/// Extra fields are tolerated; only the `type` tag is part of the contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PongMessage {
    #[serde(rename = "type")]
    pub kind: String,
}

impl PongMessage {
    pub fn is_pong(&self) -> bool {
        self.kind == "pong"
    }
}

/// Prices carried by a single inbound frame (a snapshot delta).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriceUpdate {
    prices: HashMap<String, f64>,
}

impl PriceUpdate {
    pub fn new(prices: HashMap<String, f64>) -> Self {
        Self { prices }
    }

    /// Build from a JSON object whose values are all numbers.
    ///
    /// Returns `None` if any value is not numeric.
    pub fn from_json_object(map: Map<String, Value>) -> Option<Self> {
        let mut prices = HashMap::with_capacity(map.len());
        for (instrument, value) in map {
            prices.insert(instrument, value.as_f64()?);
        }
        Some(Self { prices })
    }

    pub fn get(&self, instrument: &str) -> Option<f64> {
        self.prices.get(instrument).copied()
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.prices.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn into_inner(self) -> HashMap<String, f64> {
        self.prices
    }
}

impl FromIterator<(String, f64)> for PriceUpdate {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self {
            prices: iter.into_iter().collect(),
        }
    }
}

/// Classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Heartbeat reply. Never forwarded to price consumers.
    Pong,
    /// Instrument prices to merge into the snapshot.
    Prices(PriceUpdate),
    /// Anything that is neither a pong nor a price object, kept verbatim.
    Raw(String),
}

impl InboundFrame {
    pub fn is_pong(&self) -> bool {
        matches!(self, Self::Pong)
    }
}

/// Classify an inbound text frame.
///
/// Never fails: content that is not JSON, JSON that is not an object, and
/// objects with non-numeric values all come back as [`InboundFrame::Raw`].
pub fn classify_frame(text: &str) -> InboundFrame {
    let value = match serde_json::from_str::<Value>(text) {
        Ok(value @ Value::Object(_)) => value,
        _ => return InboundFrame::Raw(text.to_string()),
    };

    if PongMessage::deserialize(&value).is_ok_and(|p| p.is_pong()) {
        return InboundFrame::Pong;
    }

    let Value::Object(map) = value else {
        return InboundFrame::Raw(text.to_string());
    };
    match PriceUpdate::from_json_object(map) {
        Some(update) => InboundFrame::Prices(update),
        None => InboundFrame::Raw(text.to_string()),
    }
}
