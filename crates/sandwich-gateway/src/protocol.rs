//! Frames spoken to virtual-gateway consumers
//!
//! Outbound dispatches reuse the canonical payload fields, with `s` replaced
//! by the consumer's own sequence.

use std::collections::BTreeMap;

use sandwich_shard::dispatch::{CanonicalPayload, SandwichMetadata};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Heartbeat interval announced in HELLO
pub const HEARTBEAT_INTERVAL_MS: u64 = 45_000;

/// Close code used for every consumer disconnect
pub const INVALID_SESSION_CLOSE: u16 = 4000;

pub const INVALID_SESSION_REASON: &str = "Invalid Session";

pub fn hello() -> String {
    format!(r#"{{"op":10,"d":{{"heartbeat_interval":{HEARTBEAT_INTERVAL_MS}}}}}"#)
}

pub fn invalid_session(resumable: bool) -> String {
    format!(r#"{{"op":9,"d":{resumable}}}"#)
}

/// Heartbeat ACK carrying the last sequence sent to the consumer
pub fn heartbeat_ack(last_seq: Option<u64>) -> String {
    match last_seq {
        Some(seq) => format!(r#"{{"op":11,"s":{seq}}}"#),
        None => r#"{"op":11,"s":null}"#.to_string(),
    }
}

/// Strip the `Bot ` prefix libraries put in front of tokens
pub fn bare_token(token: &str) -> &str {
    token.strip_prefix("Bot ").unwrap_or(token).trim()
}

/// Op 2 as sent by consumers; only the fields the gateway reads
#[derive(Debug, Deserialize)]
pub struct IdentifyRequest {
    pub token: String,
    #[serde(default)]
    pub shard: [u32; 2],
}

/// Op 6 as sent by consumers
#[derive(Debug, Deserialize)]
pub struct ResumeRequest {
    pub token: String,
    pub session_id: String,
    #[serde(default)]
    pub seq: Option<u64>,
}

/// Op 0 frame sent to a consumer
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DispatchFrame<'a> {
    pub op: u8,
    pub d: &'a RawValue,
    pub s: u64,
    pub t: &'a str,
    #[serde(rename = "__extra", skip_serializing_if = "Option::is_none")]
    pub extra: Option<&'a BTreeMap<String, Box<RawValue>>>,
    #[serde(rename = "__sandwich", skip_serializing_if = "Option::is_none")]
    pub metadata: Option<&'a SandwichMetadata>,
}

impl<'a> DispatchFrame<'a> {
    /// A dispatch built by the gateway itself (READY, GUILD_CREATE, RESUMED)
    pub fn synthetic(event: &'a str, d: &'a RawValue) -> Self {
        Self {
            op: 0,
            d,
            s: 0,
            t: event,
            extra: None,
            metadata: None,
        }
    }

    pub fn from_payload(payload: &'a CanonicalPayload) -> Self {
        Self {
            op: payload.op,
            d: &payload.d,
            s: 0,
            t: payload.event_name(),
            extra: payload.extra.as_ref(),
            metadata: Some(&payload.metadata),
        }
    }

    pub fn to_json(&self, seq: u64) -> Result<String, serde_json::Error> {
        serde_json::to_string(&DispatchFrame { s: seq, ..*self })
    }
}

/// Parse `<shard_id>-<shard_count>`
pub fn parse_shard_tuple(value: &str) -> Option<[u32; 2]> {
    let (id, count) = value.split_once('-')?;
    Some([id.trim().parse().ok()?, count.trim().parse().ok()?])
}
