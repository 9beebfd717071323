//! Latency handler: accumulates round-trip samples and publishes running
//! descriptive statistics.
//!
//! Samples reset on every new connection epoch, so the statistics describe
//! the current session only. Only self-originated latency messages
//! contribute a sample, but statistics are recomputed and published on every
//! inbound latency message.

use crate::client::router::{HandlerContext, HandlerOutput, OutboundMessage};
use crate::error::HandlerError;
use crate::protocol::envelope::{
    self, FieldMap, FIELD_LATENCY_MAX, FIELD_LATENCY_MEAN, FIELD_LATENCY_MIN, FIELD_LATENCY_NUMBER,
    FIELD_LATENCY_STDDEV,
};
use crate::protocol::topics::{TOPIC_LATENCY, TOPIC_LATENCY_STATISTICS};
use serde_json::Value;
use tracing::debug;

/// Descriptive statistics over the latency samples of one session.
///
/// With no samples, min and max sit at their fold identities (positive and
/// negative infinity) and mean and standard deviation are zero.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencyStatistics {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Population standard deviation (divisor n, not n-1)
    pub stddev: f64,
}

impl LatencyStatistics {
    pub fn compute(samples: &[f64]) -> Self {
        let count = samples.len();
        if count == 0 {
            return Self {
                count: 0,
                min: f64::INFINITY,
                max: f64::NEG_INFINITY,
                mean: 0.0,
                stddev: 0.0,
            };
        }

        let n = count as f64;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for &s in samples {
            min = min.min(s);
            max = max.max(s);
            sum += s;
        }
        let mean = sum / n;
        let variance = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;

        Self {
            count,
            min,
            max,
            mean,
            stddev: variance.sqrt(),
        }
    }
}

#[derive(Debug)]
pub struct LatencyHandler {
    topic: String,
    samples: Vec<f64>,
}

impl LatencyHandler {
    pub fn new() -> Self {
        Self::with_pattern(TOPIC_LATENCY)
    }

    pub fn with_pattern(pattern: &str) -> Self {
        Self {
            topic: pattern.to_string(),
            samples: Vec::new(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// New connection epoch: the sample window starts over.
    pub fn on_connected(&mut self) {
        self.samples.clear();
    }

    /// An inbound latency message. A self-originated one contributes its
    /// sample; either way the current statistics go out.
    pub fn process_message(
        &mut self,
        ctx: &HandlerContext,
        message: Option<&str>,
        now_ms: i64,
    ) -> Result<HandlerOutput, HandlerError> {
        let message = message
            .filter(|m| !m.is_empty())
            .ok_or_else(|| HandlerError::EmptyPayload {
                topic: self.topic.clone(),
            })?;

        let fields = envelope::parse(message).map_err(|source| HandlerError::MalformedPayload {
            topic: self.topic.clone(),
            source,
        })?;
        if fields.is_empty() {
            return Err(HandlerError::EmptyPayload {
                topic: self.topic.clone(),
            });
        }

        if envelope::source_of(&fields) == Some(ctx.client_id) {
            let sample =
                envelope::latency_of(&fields).ok_or_else(|| HandlerError::MissingField {
                    topic: self.topic.clone(),
                    field: envelope::FIELD_LATENCY.to_string(),
                })?;
            self.samples.push(sample);
            debug!(sample, count = self.samples.len(), "Latency sample recorded");
        }

        let stats = LatencyStatistics::compute(&self.samples);
        let payload = self.statistics_message(ctx, &stats, now_ms);

        let mut output = HandlerOutput::with_values(payload.clone());
        output.outbound.push(OutboundMessage {
            topic: TOPIC_LATENCY_STATISTICS.to_string(),
            payload,
        });
        Ok(output)
    }

    /// Statistics envelope. With zero samples only the count is meaningful,
    /// so the infinite extrema are left out.
    fn statistics_message(
        &self,
        ctx: &HandlerContext,
        stats: &LatencyStatistics,
        now_ms: i64,
    ) -> FieldMap {
        let mut map = envelope::create_header(ctx.client_id, now_ms);
        if stats.count > 0 {
            map.insert(FIELD_LATENCY_MIN.to_string(), Value::from(stats.min as i64));
            map.insert(FIELD_LATENCY_MAX.to_string(), Value::from(stats.max as i64));
            map.insert(FIELD_LATENCY_MEAN.to_string(), Value::from(stats.mean));
            map.insert(FIELD_LATENCY_STDDEV.to_string(), Value::from(stats.stddev));
        }
        map.insert(
            FIELD_LATENCY_NUMBER.to_string(),
            Value::from(stats.count as u64),
        );
        map
    }
}

impl Default for LatencyHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Properties;

    const CLIENT_ID: &str = "tester";

    fn ctx(properties: &Properties) -> HandlerContext {
        HandlerContext {
            client_id: CLIENT_ID,
            properties,
        }
    }

    fn own_latency(value: i64) -> String {
        format!(
            r#"{{"source":"{CLIENT_ID}","id":"x","timestamp":1,"sender":"{CLIENT_ID}","latency":{value}}}"#
        )
    }

    #[test]
    fn test_statistics_known_values() {
        let stats = LatencyStatistics::compute(&[10.0, 20.0, 30.0]);
        assert_eq!(stats.count, 3);
        assert_eq!(stats.min, 10.0);
        assert_eq!(stats.max, 30.0);
        assert_eq!(stats.mean, 20.0);
        assert!((stats.stddev - 8.164_965_809_277_26).abs() < 1e-9);
    }

    #[test]
    fn test_statistics_empty() {
        let stats = LatencyStatistics::compute(&[]);
        assert_eq!(stats.count, 0);
        assert_eq!(stats.min, f64::INFINITY);
        assert_eq!(stats.max, f64::NEG_INFINITY);
        assert_eq!(stats.mean, 0.0);
        assert_eq!(stats.stddev, 0.0);
    }

    #[test]
    fn test_single_sample() {
        let stats = LatencyStatistics::compute(&[42.0]);
        assert_eq!(stats.count, 1);
        assert_eq!(stats.min, 42.0);
        assert_eq!(stats.max, 42.0);
        assert_eq!(stats.mean, 42.0);
        assert_eq!(stats.stddev, 0.0);
    }

    #[test]
    fn test_own_samples_accumulate() {
        let p = Properties::new();
        let mut handler = LatencyHandler::new();
        handler.on_connected();

        for v in [10, 20] {
            handler
                .process_message(&ctx(&p), Some(&own_latency(v)), 100)
                .unwrap();
        }
        let output = handler
            .process_message(&ctx(&p), Some(&own_latency(30)), 100)
            .unwrap();

        let stats = &output.outbound[0];
        assert_eq!(stats.topic, TOPIC_LATENCY_STATISTICS);
        assert_eq!(stats.payload[FIELD_LATENCY_NUMBER], 3);
        assert_eq!(stats.payload[FIELD_LATENCY_MIN], 10);
        assert_eq!(stats.payload[FIELD_LATENCY_MAX], 30);
        assert_eq!(stats.payload[FIELD_LATENCY_MEAN], 20.0);
    }

    #[test]
    fn test_foreign_message_publishes_without_sampling() {
        let p = Properties::new();
        let mut handler = LatencyHandler::new();
        handler.on_connected();

        let foreign = r#"{"source":"other","id":"x","timestamp":1,"latency":99}"#;
        let output = handler
            .process_message(&ctx(&p), Some(foreign), 100)
            .unwrap();

        let stats = &output.outbound[0];
        assert_eq!(stats.payload[FIELD_LATENCY_NUMBER], 0);
        assert!(stats.payload.get(FIELD_LATENCY_MIN).is_none());
        assert!(stats.payload.get(FIELD_LATENCY_MEAN).is_none());
    }

    #[test]
    fn test_reconnect_clears_samples() {
        let p = Properties::new();
        let mut handler = LatencyHandler::new();
        handler.on_connected();
        handler
            .process_message(&ctx(&p), Some(&own_latency(10)), 100)
            .unwrap();

        handler.on_connected();
        let output = handler
            .process_message(&ctx(&p), Some(&own_latency(20)), 200)
            .unwrap();
        assert_eq!(output.outbound[0].payload[FIELD_LATENCY_NUMBER], 1);
        assert_eq!(output.outbound[0].payload[FIELD_LATENCY_MIN], 20);
    }

    #[test]
    fn test_empty_field_map_is_error() {
        let p = Properties::new();
        let mut handler = LatencyHandler::new();
        let err = handler
            .process_message(&ctx(&p), Some("{}"), 100)
            .unwrap_err();
        assert!(matches!(err, HandlerError::EmptyPayload { .. }));
    }

    #[test]
    fn test_missing_latency_field_is_error() {
        let p = Properties::new();
        let mut handler = LatencyHandler::new();
        let own = format!(r#"{{"source":"{CLIENT_ID}","id":"x","timestamp":1}}"#);
        let err = handler
            .process_message(&ctx(&p), Some(&own), 100)
            .unwrap_err();
        assert!(matches!(err, HandlerError::MissingField { .. }));
    }
}
