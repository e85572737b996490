//! Wire envelope and payload types

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BrokerError, BrokerResult};

/// Fired to listeners when a client starts closing, before it leaves its rooms
pub const BEFORE_CLOSE: &str = "before-close-connection";

/// Fired to listeners once a client is fully closed
pub const CLOSE: &str = "close-connection";

/// Ordered arguments attached to an event
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Vec<Value>);

impl Payload {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Raw access to one argument
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    /// Decode one argument into a typed value
    ///
    /// A missing or mistyped argument is an `Argument` error, never a panic.
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> BrokerResult<T> {
        let value = self.0.get(index).ok_or_else(|| BrokerError::Argument {
            index,
            reason: format!("missing (payload has {} values)", self.0.len()),
        })?;
        T::deserialize(value).map_err(|e| BrokerError::Argument {
            index,
            reason: e.to_string(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.0.iter()
    }

    pub fn into_inner(self) -> Vec<Value> {
        self.0
    }
}

impl From<Vec<Value>> for Payload {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self(vec![value])
    }
}

impl From<()> for Payload {
    fn from(_: ()) -> Self {
        Self::default()
    }
}

/// Inbound frame before the payload shape is checked
#[derive(Deserialize)]
struct RawEnvelope {
    event: String,
    #[serde(default)]
    payload: Value,
}

/// One event frame: `{"event": "...", "payload": [...]}`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub payload: Payload,
}

impl Envelope {
    pub fn new(event: impl Into<String>, payload: impl Into<Payload>) -> Self {
        Self {
            event: event.into(),
            payload: payload.into(),
        }
    }

    /// Parse an inbound text frame
    ///
    /// Text that is not a JSON object with a string `event` is a
    /// [`BrokerError::Decode`]. A payload that is neither an array nor null
    /// is a [`BrokerError::MalformedPayload`], which only costs that one
    /// message. A missing or null payload decodes as empty.
    pub fn decode(text: &str) -> BrokerResult<Self> {
        let raw: RawEnvelope = serde_json::from_str(text)?;
        let payload = match raw.payload {
            Value::Array(values) => Payload(values),
            Value::Null => Payload::empty(),
            other => {
                return Err(BrokerError::MalformedPayload {
                    event: raw.event,
                    found: json_kind(&other),
                })
            }
        };
        Ok(Self {
            event: raw.event,
            payload,
        })
    }

    /// Serialize for the wire
    pub fn encode(&self) -> BrokerResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Event name a peer answers on for `Client::emit_with_ack`
pub fn response_event(event: &str) -> String {
    format!("**{}:response**", event)
}
