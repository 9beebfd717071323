//! Broker engine abstraction
//!
//! The embedded broker is an external collaborator behind a narrow
//! interface. The command loop is written against this trait; tests use the
//! mock engine, deployments plug in whatever engine they embed.

use crate::config::Properties;
use thiserror::Error;

/// Broker-side failures
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Broker failed to start: {0}")]
    StartFailed(String),
    #[error("Broker failed to stop: {0}")]
    StopFailed(String),
    #[error("Internal publish failed on {topic}: {reason}")]
    PublishFailed { topic: String, reason: String },
    #[error("Broker command loop is shut down")]
    LoopShutDown,
}

/// One client currently connected to the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientDescriptor {
    pub client_id: String,
    pub address: String,
    pub port: u16,
}

/// A message injected directly into the broker, bypassing the wire
#[derive(Debug, Clone, PartialEq)]
pub struct InternalMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
    pub retained: bool,
    /// Identity the broker attributes the message to
    pub origin_id: String,
}

/// Narrow interface of the embedded broker engine.
///
/// Only the command loop ever touches an engine instance, so implementations
/// need no internal synchronization.
pub trait BrokerEngine: Send {
    fn start(&mut self, properties: &Properties) -> Result<(), BrokerError>;

    fn stop(&mut self) -> Result<(), BrokerError>;

    fn is_running(&self) -> bool;

    fn connected_clients(&self) -> Vec<ClientDescriptor>;

    /// Publish from inside the broker process to its subscribers
    fn publish_internal(&mut self, message: InternalMessage) -> Result<(), BrokerError>;
}
