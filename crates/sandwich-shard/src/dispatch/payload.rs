//! Canonical outbound payload
//!
//! `d` is carried as raw JSON: unless a handler rewrites it, consumers see
//! the exact bytes Discord sent.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::value::{to_raw_value, RawValue};

use crate::protocol::SANDWICH_VERSION;

/// `__sandwich` metadata block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandwichMetadata {
    /// Daemon version
    pub v: String,
    /// Producer identifier
    pub i: String,
    /// Application display name
    pub a: String,
    /// Application id
    pub id: u64,
    /// `[group_id, shard_id, shard_count]`
    pub s: [u32; 3],
}

impl SandwichMetadata {
    pub fn new(
        identifier: impl Into<String>,
        application: impl Into<String>,
        application_id: u64,
        shard: [u32; 3],
    ) -> Self {
        Self {
            v: SANDWICH_VERSION.to_string(),
            i: identifier.into(),
            a: application.into(),
            id: application_id,
            s: shard,
        }
    }

    pub fn group_id(&self) -> u32 {
        self.s[0]
    }

    pub fn shard_id(&self) -> u32 {
        self.s[1]
    }

    pub fn shard_count(&self) -> u32 {
        self.s[2]
    }
}

/// Milliseconds since ingest, per pipeline section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trace {
    #[serde(skip)]
    started: Option<Instant>,
    #[serde(flatten)]
    sections: BTreeMap<String, u64>,
}

impl Trace {
    /// Start the clock at frame ingest
    #[must_use]
    pub fn start() -> Self {
        Self {
            started: Some(Instant::now()),
            sections: BTreeMap::new(),
        }
    }

    pub fn mark(&mut self, section: &str) {
        let elapsed = self
            .started
            .map_or(0, |started| started.elapsed().as_millis() as u64);
        self.sections.insert(section.to_string(), elapsed);
    }

    pub fn get(&self, section: &str) -> Option<u64> {
        self.sections.get(section).copied()
    }

    pub fn sections(&self) -> &BTreeMap<String, u64> {
        &self.sections
    }
}

impl PartialEq for Trace {
    fn eq(&self, other: &Self) -> bool {
        self.sections == other.sections
    }
}

/// Payload handed to publishers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalPayload {
    pub op: u8,
    pub d: Box<RawValue>,
    pub s: Option<u64>,
    pub t: Option<String>,
    #[serde(
        rename = "__extra",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub extra: Option<BTreeMap<String, Box<RawValue>>>,
    #[serde(rename = "__sandwich")]
    pub metadata: SandwichMetadata,
    #[serde(rename = "__sandwich_trace", default)]
    pub trace: Trace,
}

impl CanonicalPayload {
    pub fn event_name(&self) -> &str {
        self.t.as_deref().unwrap_or_default()
    }

    pub fn extra(&self, key: &str) -> Option<&RawValue> {
        self.extra.as_ref()?.get(key).map(AsRef::as_ref)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Builder for `__extra` entries
#[derive(Debug, Default)]
pub struct Extra(BTreeMap<String, Box<RawValue>>);

impl Extra {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry; `None` values are skipped
    pub fn insert<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), serde_json::Error> {
        let raw = to_raw_value(value)?;
        if raw.get() != "null" {
            self.0.insert(key.to_string(), raw);
        }
        Ok(())
    }

    pub fn with<T: Serialize>(mut self, key: &str, value: &T) -> Result<Self, serde_json::Error> {
        self.insert(key, value)?;
        Ok(self)
    }

    pub fn get(&self, key: &str) -> Option<&RawValue> {
        self.0.get(key).map(AsRef::as_ref)
    }

    pub fn into_map(self) -> Option<BTreeMap<String, Box<RawValue>>> {
        if self.0.is_empty() {
            None
        } else {
            Some(self.0)
        }
    }
}

const EMPTY_DISCRIMINATORS: [&str; 2] = [r#""discriminator":"""#, r#""discriminator": """#];

/// Rewrite empty user discriminators to `"0"`
///
/// Returns `None` when the payload has none, so the original bytes are kept.
pub fn rewrite_discriminators(raw: &RawValue) -> Option<Box<RawValue>> {
    let text = raw.get();
    if !EMPTY_DISCRIMINATORS.iter().any(|p| text.contains(p)) {
        return None;
    }

    let rewritten = text
        .replace(EMPTY_DISCRIMINATORS[0], r#""discriminator":"0""#)
        .replace(EMPTY_DISCRIMINATORS[1], r#""discriminator": "0""#);

    RawValue::from_string(rewritten).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(json: &str) -> Box<RawValue> {
        RawValue::from_string(json.to_string()).unwrap()
    }

    fn payload() -> CanonicalPayload {
        CanonicalPayload {
            op: 0,
            d: raw(r#"{"id":"1",  "name":"x"}"#),
            s: Some(7),
            t: Some("GUILD_UPDATE".to_string()),
            extra: None,
            metadata: SandwichMetadata::new("welcomer", "Welcomer", 42, [1, 0, 2]),
            trace: Trace::default(),
        }
    }

    #[test]
    fn test_canonical_shape() {
        let mut payload = payload();
        payload.extra = Extra::new()
            .with("before", &serde_json::json!({"name": "old"}))
            .unwrap()
            .into_map();
        payload.trace.sections.insert("state".to_string(), 1);

        let json: serde_json::Value = serde_json::from_str(&payload.to_json().unwrap()).unwrap();
        assert_eq!(json["op"], 0);
        assert_eq!(json["s"], 7);
        assert_eq!(json["t"], "GUILD_UPDATE");
        assert_eq!(json["__extra"]["before"]["name"], "old");
        assert_eq!(json["__sandwich"]["i"], "welcomer");
        assert_eq!(json["__sandwich"]["a"], "Welcomer");
        assert_eq!(json["__sandwich"]["id"], 42);
        assert_eq!(json["__sandwich"]["s"], serde_json::json!([1, 0, 2]));
        assert_eq!(json["__sandwich_trace"]["state"], 1);
    }

    #[test]
    fn test_raw_data_is_preserved() {
        let text = payload().to_json().unwrap();
        assert!(text.contains(r#""d":{"id":"1",  "name":"x"}"#));
        assert!(!text.contains("__extra"));
    }

    #[test]
    fn test_payload_parses_back() {
        let parsed: CanonicalPayload = serde_json::from_str(&payload().to_json().unwrap()).unwrap();
        assert_eq!(parsed.metadata.shard_id(), 0);
        assert_eq!(parsed.metadata.shard_count(), 2);
        assert_eq!(parsed.event_name(), "GUILD_UPDATE");
    }

    #[test]
    fn test_extra_skips_null() {
        let extra = Extra::new().with("before", &Option::<u8>::None).unwrap();
        assert!(extra.into_map().is_none());
    }

    #[test]
    fn test_rewrite_discriminators() {
        let rewritten = rewrite_discriminators(&raw(
            r#"{"user":{"id":"1","discriminator":""},"author":{"discriminator": ""}}"#,
        ))
        .unwrap();
        assert_eq!(
            rewritten.get(),
            r#"{"user":{"id":"1","discriminator":"0"},"author":{"discriminator": "0"}}"#
        );

        assert!(rewrite_discriminators(&raw(r#"{"discriminator":"1234"}"#)).is_none());
    }

    #[test]
    fn test_trace_marks() {
        let mut trace = Trace::start();
        trace.mark("state");
        trace.mark("publish");
        assert!(trace.get("state").is_some());
        assert!(trace.get("publish").unwrap() >= trace.get("state").unwrap());
        assert_eq!(trace.sections().len(), 2);
    }
}
