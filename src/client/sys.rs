//! $SYS handler: surfaces broker diagnostics values to the dispatch observer.
//!
//! Payloads here are plain text, not JSON envelopes. A payload whose
//! canonical integer form equals the text is surfaced as a number, anything
//! else as the raw string. Nothing is published back.

use crate::client::router::HandlerOutput;
use crate::protocol::envelope::FieldMap;
use crate::protocol::topics::TOPIC_SYS;
use serde_json::Value;
use tracing::trace;

/// Result field carrying the diagnostic value
pub const FIELD_SYS_VALUE: &str = "value";

#[derive(Debug)]
pub struct SysHandler {
    topic: String,
}

impl SysHandler {
    pub fn new() -> Self {
        Self::with_pattern(TOPIC_SYS)
    }

    pub fn with_pattern(pattern: &str) -> Self {
        Self {
            topic: pattern.to_string(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// A missing payload yields an empty result, never an error; $SYS topics
    /// are advisory.
    pub fn process_message(&self, message: Option<&str>, topic: &str) -> HandlerOutput {
        let mut values = FieldMap::new();
        if let Some(text) = message {
            trace!(topic = %topic, value = %text, "Broker diagnostic");
            values.insert(FIELD_SYS_VALUE.to_string(), decode_value(text));
        }
        HandlerOutput::with_values(values)
    }
}

/// Integer detection by round trip: only a string that is exactly the
/// canonical rendering of an i64 becomes a number ("007" stays a string).
fn decode_value(text: &str) -> Value {
    match text.parse::<i64>() {
        Ok(n) if n.to_string() == text => Value::from(n),
        _ => Value::from(text),
    }
}

impl Default for SysHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_payload() {
        let handler = SysHandler::new();
        let output = handler.process_message(Some("42"), "$SYS/broker/uptime");
        assert_eq!(output.values[FIELD_SYS_VALUE], 42);
        assert!(output.outbound.is_empty());
    }

    #[test]
    fn test_non_canonical_integer_stays_string() {
        let handler = SysHandler::new();
        assert_eq!(
            handler.process_message(Some("007"), "t").values[FIELD_SYS_VALUE],
            "007"
        );
        assert_eq!(
            handler.process_message(Some("+5"), "t").values[FIELD_SYS_VALUE],
            "+5"
        );
        assert_eq!(
            handler.process_message(Some("4.2"), "t").values[FIELD_SYS_VALUE],
            "4.2"
        );
    }

    #[test]
    fn test_negative_integer_payload() {
        let handler = SysHandler::new();
        assert_eq!(
            handler.process_message(Some("-3"), "t").values[FIELD_SYS_VALUE],
            -3
        );
    }

    #[test]
    fn test_text_payload() {
        let handler = SysHandler::new();
        let output = handler.process_message(Some("1d 4h"), "$SYS/broker/time");
        assert_eq!(output.values[FIELD_SYS_VALUE], "1d 4h");
    }

    #[test]
    fn test_missing_payload_is_empty_result() {
        let handler = SysHandler::new();
        let output = handler.process_message(None, "$SYS/broker/uptime");
        assert!(output.values.is_empty());
    }
}
