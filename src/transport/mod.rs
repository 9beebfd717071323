//! Transport abstraction for the monitor client
//!
//! The client core is written against this trait so the MQTT wire transport
//! can be swapped for an in-process mock in tests. Connection lifecycle
//! outcomes and inbound messages arrive asynchronously as [`TransportEvent`]s
//! on a channel handed out at construction; method return values only cover
//! failures detectable at the call site.

use crate::config::{ConfigError, Properties};
use thiserror::Error;

pub mod rumqtt;

pub use rumqtt::RumqttTransport;

/// QoS 1, the delivery level used for all monitor subscriptions and
/// envelope publications
pub const QOS_AT_LEAST_ONCE: u8 = 1;

/// Transport-level failures
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Disconnect failed: {0}")]
    DisconnectFailed(String),
    #[error("Not connected")]
    NotConnected,
}

/// Asynchronous transport outcomes, delivered on the event channel returned
/// by the transport constructor.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Broker acknowledged the connection
    Connected,
    /// Connection attempt failed after `connect` had already returned
    ConnectFailed(String),
    /// Established connection dropped without a local disconnect request
    ConnectionLost(String),
    /// Inbound message on a subscribed topic
    MessageArrived {
        topic: String,
        payload: Vec<u8>,
    },
}

/// Parameters for dialing the broker
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// Maximum MQTT packet size in bytes
    pub max_packet_size: u32,
}

impl ConnectOptions {
    /// Dial parameters from the shared property set. The wildcard bind
    /// address is translated to loopback by [`Properties::connect_host`].
    pub fn from_properties(properties: &Properties, client_id: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            host: properties.connect_host()?.to_string(),
            port: properties.port()?,
            client_id: client_id.to_string(),
            max_packet_size: properties
                .require_u64(crate::config::PROP_MESSAGE_SIZE)?
                .min(u32::MAX as u64) as u32,
        })
    }
}

/// Abstraction over the MQTT wire transport
#[async_trait::async_trait]
pub trait Transport: Send {
    /// Start a connection attempt. A `Connected` or `ConnectFailed` event
    /// follows on the event channel; an immediate error means the attempt
    /// could not even start.
    async fn connect(&mut self, options: &ConnectOptions) -> Result<(), TransportError>;

    /// Tear down the connection. No event follows a successful disconnect;
    /// the caller owns the resulting state transition.
    async fn disconnect(&mut self) -> Result<(), TransportError>;

    async fn subscribe(&mut self, topic: &str, qos: u8) -> Result<(), TransportError>;

    async fn unsubscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: u8,
        retained: bool,
    ) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PROP_HOST, PROP_MESSAGE_SIZE, PROP_PORT};

    #[test]
    fn test_connect_options_from_properties() {
        let mut props = Properties::new();
        props.set(PROP_HOST, "0.0.0.0");
        props.set(PROP_PORT, "1883");
        props.set(PROP_MESSAGE_SIZE, "8092");

        let options = ConnectOptions::from_properties(&props, "tester").unwrap();
        assert_eq!(options.host, "localhost");
        assert_eq!(options.port, 1883);
        assert_eq!(options.client_id, "tester");
        assert_eq!(options.max_packet_size, 8092);
    }

    #[test]
    fn test_connect_options_missing_property() {
        let props = Properties::new();
        assert!(ConnectOptions::from_properties(&props, "tester").is_err());
    }
}
