//! Gateway message envelopes
//!
//! Inbound messages keep `d` as raw JSON; it is only parsed once the
//! dispatcher knows which shape to expect.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use super::OpCode;

/// Inbound gateway message `{op, d, s, t}`
#[derive(Debug, Deserialize)]
pub struct GatewayEvent {
    /// Raw op code; unknown values are tolerated and ignored
    pub op: u8,

    #[serde(default)]
    pub d: Option<Box<RawValue>>,

    #[serde(default)]
    pub s: Option<u64>,

    #[serde(default)]
    pub t: Option<String>,
}

impl GatewayEvent {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn opcode(&self) -> Option<OpCode> {
        OpCode::from_u8(self.op)
    }

    /// Event name, or an empty string for non-dispatch messages
    pub fn event_name(&self) -> &str {
        self.t.as_deref().unwrap_or_default()
    }

    /// Raw `d`, with JSON `null` standing in for a missing field
    pub fn raw_data(&self) -> &str {
        self.d.as_deref().map_or("null", RawValue::get)
    }

    /// Parse `d` into a typed payload
    pub fn data<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(self.raw_data())
    }
}

impl std::fmt::Display for GatewayEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.t, self.s) {
            (Some(t), Some(s)) => write!(f, "GatewayEvent(op={}, t={t}, s={s})", self.op),
            (Some(t), None) => write!(f, "GatewayEvent(op={}, t={t})", self.op),
            _ => write!(f, "GatewayEvent(op={})", self.op),
        }
    }
}

/// Outbound gateway command `{op, d}`
#[derive(Debug, Serialize)]
pub struct GatewayCommand<'a, T: Serialize + ?Sized> {
    pub op: OpCode,
    pub d: &'a T,
}

impl<'a, T: Serialize + ?Sized> GatewayCommand<'a, T> {
    pub fn new(op: OpCode, d: &'a T) -> Self {
        Self { op, d }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Heartbeat command carrying the last sequence (or null)
pub fn heartbeat_command(sequence: u64) -> String {
    if sequence == 0 {
        r#"{"op":1,"d":null}"#.to_string()
    } else {
        format!(r#"{{"op":1,"d":{sequence}}}"#)
    }
}
