//! Heartbeat handler: self-measuring round-trip latency probe
//!
//! On connect the handler publishes an immediate first heartbeat. Each time
//! one of its own heartbeats comes back through the broker it derives the
//! round-trip latency, publishes a latency message, and schedules the next
//! beat one interval later. The chain is therefore receipt-driven: a beat
//! that never returns stops the chain rather than piling up unanswered
//! beats. Heartbeats from other clients are ignored.

use crate::client::router::{HandlerContext, HandlerOutput, OutboundMessage, TimerRequest};
use crate::error::HandlerError;
use crate::protocol::envelope::{
    self, FieldMap, FIELD_HEARTBEAT_INTERVAL, FIELD_HEARTBEAT_NUMBER, FIELD_LATENCY, FIELD_SENDER,
};
use crate::protocol::topics::{TOPIC_HEARTBEAT, TOPIC_LATENCY};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

#[derive(Debug)]
pub struct HeartbeatHandler {
    topic: String,
    /// Bumped on every connect and disconnect; a timer carrying a stale
    /// epoch is a no-op when it fires.
    epoch: u64,
    active: bool,
    /// Sequence number embedded in the next outbound heartbeat
    sequence: u64,
}

impl HeartbeatHandler {
    pub fn new() -> Self {
        Self::with_pattern(TOPIC_HEARTBEAT)
    }

    pub fn with_pattern(pattern: &str) -> Self {
        Self {
            topic: pattern.to_string(),
            epoch: 0,
            active: false,
            sequence: 0,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    fn beat(&mut self, ctx: &HandlerContext, now_ms: i64, interval_ms: u64) -> OutboundMessage {
        let mut payload = envelope::create_header(ctx.client_id, now_ms);
        payload.insert(
            FIELD_HEARTBEAT_INTERVAL.to_string(),
            Value::from(interval_ms),
        );
        payload.insert(FIELD_HEARTBEAT_NUMBER.to_string(), Value::from(self.sequence));
        self.sequence += 1;
        OutboundMessage {
            topic: self.topic.clone(),
            payload,
        }
    }

    /// Start a new heartbeat chain. An interval of zero leaves the handler
    /// inactive; otherwise the first beat goes out immediately and the chain
    /// continues from receipt of that beat.
    pub fn on_connected(
        &mut self,
        ctx: &HandlerContext,
        now_ms: i64,
    ) -> Result<HandlerOutput, HandlerError> {
        self.epoch += 1;
        self.sequence = 0;

        let interval_secs = ctx.properties.heartbeat_interval_secs()?;
        if interval_secs == 0 {
            self.active = false;
            debug!("Heartbeat disabled, interval is zero");
            return Ok(HandlerOutput::default());
        }

        self.active = true;
        debug!(interval_secs, "Starting heartbeat chain");
        let beat = self.beat(ctx, now_ms, interval_secs * 1000);
        Ok(HandlerOutput {
            outbound: vec![beat],
            ..Default::default()
        })
    }

    /// Stop the chain and invalidate any pending timer.
    pub fn on_disconnect(&mut self) {
        if self.active {
            debug!("Cancelling scheduled heartbeat");
        }
        self.active = false;
        self.epoch += 1;
    }

    /// An inbound heartbeat. Self-originated beats yield a latency message
    /// and reschedule the chain; foreign beats are ignored.
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

        let source = envelope::source_of(&fields).ok_or_else(|| HandlerError::MissingField {
            topic: self.topic.clone(),
            field: envelope::FIELD_SOURCE.to_string(),
        })?;
        if source != ctx.client_id {
            debug!(source = %source, "Ignoring foreign heartbeat");
            return Ok(HandlerOutput::default());
        }

        let sent_ms =
            envelope::timestamp_of(&fields).ok_or_else(|| HandlerError::MissingField {
                topic: self.topic.clone(),
                field: envelope::FIELD_TIMESTAMP.to_string(),
            })?;
        let latency_ms = now_ms - sent_ms;
        debug!(latency_ms, "Heartbeat returned");

        let mut latency: FieldMap = envelope::create_header(ctx.client_id, now_ms);
        latency.insert(FIELD_SENDER.to_string(), Value::from(source));
        latency.insert(FIELD_LATENCY.to_string(), Value::from(latency_ms));

        let mut output = HandlerOutput::with_values(latency.clone());
        output.outbound.push(OutboundMessage {
            topic: TOPIC_LATENCY.to_string(),
            payload: latency,
        });

        if self.active {
            let interval_secs = ctx.properties.heartbeat_interval_secs()?;
            output.timer = Some(TimerRequest {
                key: self.topic.clone(),
                epoch: self.epoch,
                delay: Duration::from_secs(interval_secs),
            });
        }
        Ok(output)
    }

    /// Timer re-entry: emit the next beat of the chain. Ticks from a
    /// cancelled epoch are dropped.
    pub fn on_timer(
        &mut self,
        ctx: &HandlerContext,
        epoch: u64,
        now_ms: i64,
    ) -> Result<HandlerOutput, HandlerError> {
        if !self.active || epoch != self.epoch {
            debug!(epoch, current = self.epoch, "Dropping stale heartbeat tick");
            return Ok(HandlerOutput::default());
        }

        let interval_secs = ctx.properties.heartbeat_interval_secs()?;
        let beat = self.beat(ctx, now_ms, interval_secs * 1000);
        Ok(HandlerOutput {
            outbound: vec![beat],
            ..Default::default()
        })
    }
}

impl Default for HeartbeatHandler {
    fn default() -> Self {
        Self::new()
    }
}
