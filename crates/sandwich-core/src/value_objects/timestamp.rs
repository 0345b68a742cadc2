//! Lenient RFC 3339 timestamps
//!
//! The gateway occasionally sends malformed timestamps. Use with
//! `#[serde(default, with = "lenient_timestamp")]` on `Option<DateTime<Utc>>`
//! fields: anything that does not parse becomes `None`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(ts) => serializer.serialize_str(&ts.to_rfc3339()),
        None => serializer.serialize_none(),
    }
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(serde_json::Value::as_str).and_then(parse))
}

/// Parse an RFC 3339 string, returning `None` when malformed
pub fn parse(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Holder {
        #[serde(default, with = "crate::value_objects::lenient_timestamp")]
        at: Option<DateTime<Utc>>,
    }

    #[test]
    fn test_valid_timestamp() {
        let h: Holder = serde_json::from_str(r#"{"at":"2021-04-06T12:00:00.000000+00:00"}"#).unwrap();
        assert_eq!(h.at.unwrap().timestamp(), 1_617_710_400);
    }

    #[test]
    fn test_malformed_becomes_none() {
        let h: Holder = serde_json::from_str(r#"{"at":"0000-00-00T00:00:00"}"#).unwrap();
        assert!(h.at.is_none());

        let h: Holder = serde_json::from_str(r#"{"at":12}"#).unwrap();
        assert!(h.at.is_none());
    }

    #[test]
    fn test_missing_and_null() {
        let h: Holder = serde_json::from_str("{}").unwrap();
        assert!(h.at.is_none());

        let h: Holder = serde_json::from_str(r#"{"at":null}"#).unwrap();
        assert!(h.at.is_none());
        assert_eq!(serde_json::to_string(&h).unwrap(), r#"{"at":null}"#);
    }
}
