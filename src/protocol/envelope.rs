//! Message envelope shared by all outbound handler messages
//!
//! Every message the monitor publishes is a flat JSON object carrying a
//! `source` identity, a random unique `id`, a wall-clock `timestamp` in
//! milliseconds, and handler-specific fields on top.

use serde_json::{Map, Value};
use uuid::Uuid;

// Envelope fields
pub const FIELD_SOURCE: &str = "source";
pub const FIELD_ID: &str = "id";
pub const FIELD_TIMESTAMP: &str = "timestamp";
pub const FIELD_SENDER: &str = "sender";
pub const FIELD_LATENCY: &str = "latency";

// Heartbeat fields
pub const FIELD_HEARTBEAT_INTERVAL: &str = "interval";
pub const FIELD_HEARTBEAT_NUMBER: &str = "number";

// Latency statistics fields
pub const FIELD_LATENCY_MIN: &str = "min";
pub const FIELD_LATENCY_MAX: &str = "max";
pub const FIELD_LATENCY_MEAN: &str = "mean";
pub const FIELD_LATENCY_STDDEV: &str = "stddev";
pub const FIELD_LATENCY_NUMBER: &str = "number";

/// Flat key/value payload of an envelope
pub type FieldMap = Map<String, Value>;

/// Wall-clock milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Build the common envelope header: source identity, fresh random id,
/// timestamp at construction.
pub fn create_header(source: &str, timestamp_ms: i64) -> FieldMap {
    let mut map = FieldMap::new();
    map.insert(FIELD_SOURCE.to_string(), Value::from(source));
    map.insert(FIELD_ID.to_string(), Value::from(Uuid::new_v4().to_string()));
    map.insert(FIELD_TIMESTAMP.to_string(), Value::from(timestamp_ms));
    map
}

/// Parse a JSON envelope into its field map
pub fn parse(message: &str) -> Result<FieldMap, serde_json::Error> {
    serde_json::from_str(message)
}

/// Source identity of an envelope, if present
pub fn source_of(map: &FieldMap) -> Option<&str> {
    map.get(FIELD_SOURCE).and_then(Value::as_str)
}

/// Embedded timestamp in milliseconds. JSON decoders may deliver the number
/// as integer or float; both forms are accepted.
pub fn timestamp_of(map: &FieldMap) -> Option<i64> {
    match map.get(FIELD_TIMESTAMP)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        _ => None,
    }
}

/// Latency value in milliseconds as a float sample
pub fn latency_of(map: &FieldMap) -> Option<f64> {
    map.get(FIELD_LATENCY).and_then(Value::as_f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_fields() {
        let header = create_header("test-client", 123_456);
        assert_eq!(source_of(&header), Some("test-client"));
        assert_eq!(timestamp_of(&header), Some(123_456));
        assert!(header.get(FIELD_ID).unwrap().as_str().is_some());
    }

    #[test]
    fn test_header_ids_are_unique() {
        let a = create_header("c", 0);
        let b = create_header("c", 0);
        assert_ne!(a.get(FIELD_ID), b.get(FIELD_ID));
    }

    #[test]
    fn test_parse_round_trip() {
        let header = create_header("c", 42);
        let json = serde_json::to_string(&header).unwrap();
        let parsed = parse(&json).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_timestamp_accepts_float_form() {
        let parsed = parse(r#"{"timestamp": 1050.0}"#).unwrap();
        assert_eq!(timestamp_of(&parsed), Some(1050));
    }

    #[test]
    fn test_parse_rejects_non_json() {
        assert!(parse("not json").is_err());
    }

    #[test]
    fn test_latency_accepts_integer_form() {
        let parsed = parse(r#"{"latency": 50}"#).unwrap();
        assert_eq!(latency_of(&parsed), Some(50.0));
    }
}
