//! Moqmon - local broker supervisor and self-measuring monitor client
//!
//! # Overview
//!
//! This crate supervises a local MQTT broker and measures it from the
//! inside: a monitor client connects to the broker, publishes heartbeats to
//! itself, derives round-trip latency from their return, aggregates latency
//! statistics, and watches the broker's `$SYS` diagnostics. The pieces:
//!
//! - Connection state machine driven by asynchronous transport events
//! - Topic-pattern dispatch engine with MQTT wildcard matching
//! - Heartbeat / latency / statistics handler pipeline
//! - Broker command loop sequencing start, stop, and periodic `$SYS` status
//! - Supervisory layer reconciling user intent against observed state
//!
//! The broker engine itself is an external collaborator behind the
//! [`broker::BrokerEngine`] trait; this crate owns its lifecycle, not its
//! wire protocol.

pub mod broker;
pub mod client;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod service;
pub mod testing;
pub mod transport;

pub use client::{ClientHandle, ConnectionState};
pub use config::MonitorConfig;
pub use error::{MonitorError, MonitorResult};
pub use service::{ServiceStatus, SupervisorHandle};
