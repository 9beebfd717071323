//! Topic-pattern dispatch engine
//!
//! The router owns the registry of topic handlers keyed by subscription
//! pattern. Dispatch tries an exact literal-key lookup first, then falls back
//! to scanning the registry in registration order, invoking every handler
//! whose compiled pattern matches (a topic may fan out to several handlers).
//! A failure inside one handler never prevents dispatch to the others.
//!
//! Handlers are a tagged-variant enum sharing the capability set
//! {on_connected, on_disconnect, process_message} plus a timer re-entry hook
//! used by the heartbeat schedule.

use crate::client::heartbeat::HeartbeatHandler;
use crate::client::latency::LatencyHandler;
use crate::client::sys::SysHandler;
use crate::config::Properties;
use crate::error::{HandlerError, MonitorError};
use crate::protocol::envelope::FieldMap;
use crate::protocol::topics::TopicPattern;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Read-only context handed to handlers on every invocation
pub struct HandlerContext<'a> {
    /// Identity embedded in outbound envelopes and used to recognize
    /// self-originated messages
    pub client_id: &'a str,
    pub properties: &'a Properties,
}

/// A message a handler wants published (application-level topic, no root
/// prefix yet)
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: FieldMap,
}

/// A delayed re-entry into the owning single-threaded context. The epoch is
/// checked when the timer fires, so cancelling (bumping the epoch) wins the
/// race against an already-fired tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TimerRequest {
    /// Literal pattern key of the requesting handler
    pub key: String,
    pub epoch: u64,
    pub delay: Duration,
}

/// Everything a handler invocation produced
#[derive(Debug, Default)]
pub struct HandlerOutput {
    /// Key/value result map surfaced to the dispatch observer
    pub values: FieldMap,
    pub outbound: Vec<OutboundMessage>,
    pub timer: Option<TimerRequest>,
}

impl HandlerOutput {
    pub fn with_values(values: FieldMap) -> Self {
        Self {
            values,
            ..Default::default()
        }
    }
}

/// Side effects collected across handler invocations, applied by the client
/// core after dispatch returns
#[derive(Debug, Default)]
pub struct OutputBatch {
    pub outbound: Vec<OutboundMessage>,
    pub timers: Vec<TimerRequest>,
}

impl OutputBatch {
    fn absorb(&mut self, output: HandlerOutput) -> FieldMap {
        self.outbound.extend(output.outbound);
        if let Some(timer) = output.timer {
            self.timers.push(timer);
        }
        output.values
    }
}

/// One matched handler's contribution to a dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResult {
    /// Registered pattern that matched
    pub pattern: String,
    /// Concrete topic the message arrived on
    pub topic: String,
    pub values: FieldMap,
}

/// Outcome of dispatching one inbound message
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    /// Matched handler results, in registration order
    pub results: Vec<DispatchResult>,
    pub batch: OutputBatch,
}

/// Topic handler variants. Each implements the same capability set; dispatch
/// is a tagged-variant match rather than dynamic dispatch.
#[derive(Debug)]
pub enum TopicHandler {
    Heartbeat(HeartbeatHandler),
    Latency(LatencyHandler),
    Sys(SysHandler),
}

impl TopicHandler {
    /// Literal subscription pattern this handler is bound to
    pub fn topic(&self) -> &str {
        match self {
            TopicHandler::Heartbeat(h) => h.topic(),
            TopicHandler::Latency(h) => h.topic(),
            TopicHandler::Sys(h) => h.topic(),
        }
    }

    /// Connection-epoch start: reset internal state, kick off schedules
    pub fn on_connected(
        &mut self,
        ctx: &HandlerContext,
        now_ms: i64,
    ) -> Result<HandlerOutput, HandlerError> {
        match self {
            TopicHandler::Heartbeat(h) => h.on_connected(ctx, now_ms),
            TopicHandler::Latency(h) => {
                h.on_connected();
                Ok(HandlerOutput::default())
            }
            TopicHandler::Sys(_) => Ok(HandlerOutput::default()),
        }
    }

    /// Connection-epoch end: cancel pending schedules
    pub fn on_disconnect(&mut self) {
        if let TopicHandler::Heartbeat(h) = self {
            h.on_disconnect();
        }
    }

    pub fn process_message(
        &mut self,
        ctx: &HandlerContext,
        message: Option<&str>,
        topic: &str,
        now_ms: i64,
    ) -> Result<HandlerOutput, HandlerError> {
        match self {
            TopicHandler::Heartbeat(h) => h.process_message(ctx, message, now_ms),
            TopicHandler::Latency(h) => h.process_message(ctx, message, now_ms),
            TopicHandler::Sys(h) => Ok(h.process_message(message, topic)),
        }
    }

    /// Delayed re-entry from a previously requested timer
    pub fn on_timer(
        &mut self,
        ctx: &HandlerContext,
        epoch: u64,
        now_ms: i64,
    ) -> Result<HandlerOutput, HandlerError> {
        match self {
            TopicHandler::Heartbeat(h) => h.on_timer(ctx, epoch, now_ms),
            _ => Ok(HandlerOutput::default()),
        }
    }
}

struct Entry {
    pattern: TopicPattern,
    handler: TopicHandler,
}

/// Registry of topic handlers with pattern-based dispatch
pub struct TopicRouter {
    entries: Vec<Entry>,
    /// Literal pattern -> index into `entries`, for the exact-match fast path
    index: HashMap<String, usize>,
}

impl TopicRouter {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Router with the standard monitor handlers: heartbeat, latency, $SYS.
    pub fn with_default_handlers() -> Result<Self, MonitorError> {
        let mut router = Self::new();
        router.register(TopicHandler::Heartbeat(HeartbeatHandler::new()))?;
        router.register(TopicHandler::Latency(LatencyHandler::new()))?;
        router.register(TopicHandler::Sys(SysHandler::new()))?;
        Ok(router)
    }

    /// Register a handler under its pattern. Registering the identical
    /// literal pattern twice is a fatal configuration error.
    pub fn register(&mut self, handler: TopicHandler) -> Result<(), MonitorError> {
        let key = handler.topic().to_string();
        if self.index.contains_key(&key) {
            return Err(MonitorError::DuplicateTopic(key));
        }

        let pattern = TopicPattern::compile(&key)?;
        debug!(topic = %key, "Topic handler registered");
        self.index.insert(key, self.entries.len());
        self.entries.push(Entry { pattern, handler });
        Ok(())
    }

    /// Registered literal patterns in lexicographic order; drives
    /// subscription on connect.
    pub fn all_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.index.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Notify every handler of a new connection epoch, in registration
    /// order. One handler failing does not stop the others.
    pub fn broadcast_connected(&mut self, ctx: &HandlerContext, now_ms: i64) -> OutputBatch {
        let mut batch = OutputBatch::default();
        for entry in &mut self.entries {
            match entry.handler.on_connected(ctx, now_ms) {
                Ok(output) => {
                    let _ = batch.absorb(output);
                }
                Err(e) => {
                    error!(topic = %entry.pattern.as_str(), error = %e, "Handler on_connected failed");
                }
            }
        }
        batch
    }

    /// Notify every handler that the connection epoch is ending. Pending
    /// handler timers are cancelled here, before the transport disconnect is
    /// issued.
    pub fn broadcast_disconnected(&mut self) {
        for entry in &mut self.entries {
            entry.handler.on_disconnect();
        }
    }

    /// Route an inbound message to every handler whose pattern matches.
    ///
    /// A topic matching no pattern is a diagnostic, not an error: the
    /// outcome is simply empty.
    pub fn dispatch(
        &mut self,
        topic: &str,
        message: Option<&str>,
        now_ms: i64,
        ctx: &HandlerContext,
    ) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        if let Some(&i) = self.index.get(topic) {
            // Fast path: the topic is itself a registered literal pattern
            Self::invoke(&mut self.entries[i], &mut outcome, ctx, message, topic, now_ms);
            return outcome;
        }

        for i in 0..self.entries.len() {
            if self.entries[i].pattern.matches(topic) {
                Self::invoke(&mut self.entries[i], &mut outcome, ctx, message, topic, now_ms);
            }
        }

        if outcome.results.is_empty() {
            warn!(topic = %topic, "Topic unknown, no handler matched");
        }
        outcome
    }

    fn invoke(
        entry: &mut Entry,
        outcome: &mut DispatchOutcome,
        ctx: &HandlerContext,
        message: Option<&str>,
        topic: &str,
        now_ms: i64,
    ) {
        match entry.handler.process_message(ctx, message, topic, now_ms) {
            Ok(output) => {
                let values = outcome.batch.absorb(output);
                outcome.results.push(DispatchResult {
                    pattern: entry.pattern.as_str().to_string(),
                    topic: topic.to_string(),
                    values,
                });
            }
            Err(e) => {
                error!(topic = %topic, pattern = %entry.pattern.as_str(), error = %e,
                    "Handler failed to process message");
            }
        }
    }

    /// Deliver a timer re-entry to the handler registered under `key`.
    pub fn on_timer(
        &mut self,
        key: &str,
        epoch: u64,
        now_ms: i64,
        ctx: &HandlerContext,
    ) -> OutputBatch {
        let mut batch = OutputBatch::default();
        if let Some(&i) = self.index.get(key) {
            match self.entries[i].handler.on_timer(ctx, epoch, now_ms) {
                Ok(output) => {
                    let _ = batch.absorb(output);
                }
                Err(e) => {
                    error!(topic = %key, error = %e, "Handler timer failed");
                }
            }
        }
        batch
    }
}

impl Default for TopicRouter {
    fn default() -> Self {
        Self::new()
    }
}
