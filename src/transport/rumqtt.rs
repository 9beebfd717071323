//! MQTT wire transport backed by rumqttc
//!
//! `connect` spawns a polling task that drives the rumqttc event loop and
//! translates protocol packets into [`TransportEvent`]s. There is no
//! automatic reconnection: a lost connection surfaces as `ConnectionLost`
//! and the polling task ends, leaving recovery policy to the supervisor.

use super::{ConnectOptions, Transport, TransportError, TransportEvent};
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::v5::{Packet, PublishProperties};
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, Event, EventLoop, MqttOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

fn qos_from_u8(qos: u8) -> QoS {
    match qos {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

/// rumqttc-backed transport
pub struct RumqttTransport {
    client: Option<AsyncClient>,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    poll_handle: Option<JoinHandle<()>>,
    connected: Arc<AtomicBool>,
    /// Set before a local disconnect so the poll loop ending is not
    /// reported as a lost connection
    local_disconnect: Arc<AtomicBool>,
    /// Set by the poll loop before it emits its terminal event, so the next
    /// connect or disconnect knows the session is dead even while the task
    /// is still winding down
    session_ended: Arc<AtomicBool>,
}

impl RumqttTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                client: None,
                event_tx,
                poll_handle: None,
                connected: Arc::new(AtomicBool::new(false)),
                local_disconnect: Arc::new(AtomicBool::new(false)),
                session_ended: Arc::new(AtomicBool::new(false)),
            },
            event_rx,
        )
    }

    fn session_is_dead(&self) -> bool {
        self.session_ended.load(Ordering::SeqCst)
            || self
                .poll_handle
                .as_ref()
                .map(|handle| handle.is_finished())
                .unwrap_or(true)
    }

    /// Drop the remains of an ended session so a new attempt can start.
    fn clear_session(&mut self) {
        if let Some(handle) = self.poll_handle.take() {
            handle.abort();
        }
        self.client = None;
        self.connected.store(false, Ordering::SeqCst);
    }

    fn configure_options(options: &ConnectOptions) -> MqttOptions {
        let mut mqtt_options = MqttOptions::new(
            options.client_id.as_str(),
            options.host.as_str(),
            options.port,
        );
        mqtt_options.set_keep_alive(Duration::from_secs(60));
        mqtt_options.set_max_packet_size(Some(options.max_packet_size));
        mqtt_options
    }

    /// Drive the rumqttc event loop until the connection ends, translating
    /// packets into transport events.
    async fn poll_loop(
        mut event_loop: EventLoop,
        event_tx: mpsc::UnboundedSender<TransportEvent>,
        connected: Arc<AtomicBool>,
        local_disconnect: Arc<AtomicBool>,
        session_ended: Arc<AtomicBool>,
    ) {
        let mut acknowledged = false;
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    acknowledged = true;
                    connected.store(true, Ordering::SeqCst);
                    info!("Broker acknowledged connection");
                    let _ = event_tx.send(TransportEvent::Connected);
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let topic = String::from_utf8_lossy(&publish.topic).to_string();
                    debug!(topic = %topic, bytes = publish.payload.len(), "Message arrived");
                    let _ = event_tx.send(TransportEvent::MessageArrived {
                        topic,
                        payload: publish.payload.to_vec(),
                    });
                }
                Ok(Event::Incoming(Packet::Disconnect(_))) => {
                    connected.store(false, Ordering::SeqCst);
                    session_ended.store(true, Ordering::SeqCst);
                    if !local_disconnect.load(Ordering::SeqCst) {
                        warn!("Broker sent disconnect");
                        let _ = event_tx
                            .send(TransportEvent::ConnectionLost("Broker disconnect".into()));
                    }
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    connected.store(false, Ordering::SeqCst);
                    session_ended.store(true, Ordering::SeqCst);
                    if local_disconnect.load(Ordering::SeqCst) {
                        debug!("Event loop ended after local disconnect");
                    } else if acknowledged {
                        warn!(error = %e, "Connection lost");
                        let _ = event_tx.send(TransportEvent::ConnectionLost(e.to_string()));
                    } else {
                        warn!(error = %e, "Connection attempt failed");
                        let _ = event_tx.send(TransportEvent::ConnectFailed(e.to_string()));
                    }
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl Transport for RumqttTransport {
    async fn connect(&mut self, options: &ConnectOptions) -> Result<(), TransportError> {
        if self.poll_handle.is_some() {
            if !self.session_is_dead() {
                return Err(TransportError::ConnectionFailed(
                    "Connection already in progress".to_string(),
                ));
            }
            // The previous attempt ended on its own; its remains must not
            // block a retry.
            self.clear_session();
        }

        let span = crate::mqtt_span!(client_id = %options.client_id);
        let _guard = span.enter();
        info!(host = %options.host, port = options.port, "Connecting to broker");
        self.local_disconnect.store(false, Ordering::SeqCst);
        self.session_ended.store(false, Ordering::SeqCst);

        let mqtt_options = Self::configure_options(options);
        let (client, event_loop) = AsyncClient::new(mqtt_options, 10);
        self.client = Some(client);

        self.poll_handle = Some(tokio::spawn(Self::poll_loop(
            event_loop,
            self.event_tx.clone(),
            self.connected.clone(),
            self.local_disconnect.clone(),
            self.session_ended.clone(),
        )));
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let client = self
            .client
            .take()
            .ok_or(TransportError::NotConnected)?;

        self.local_disconnect.store(true, Ordering::SeqCst);
        let session_dead = self.session_is_dead();
        if session_dead {
            // Nothing to tell the broker: the event loop is already gone.
            // Dropping the remains counts as a clean disconnect.
            debug!("Disconnecting an already-ended session");
            self.clear_session();
            return Ok(());
        }

        self.connected.store(false, Ordering::SeqCst);
        let result = client
            .disconnect()
            .await
            .map_err(|e| TransportError::DisconnectFailed(e.to_string()));

        if let Some(handle) = self.poll_handle.take() {
            handle.abort();
        }
        result
    }

    async fn subscribe(&mut self, topic: &str, qos: u8) -> Result<(), TransportError> {
        let client = self.client.as_ref().ok_or(TransportError::NotConnected)?;
        debug!(topic = %topic, qos, "Subscribing");
        client
            .subscribe(topic, qos_from_u8(qos))
            .await
            .map_err(|e| TransportError::SubscriptionFailed(Box::new(e)))
    }

    async fn unsubscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        let client = self.client.as_ref().ok_or(TransportError::NotConnected)?;
        debug!(topic = %topic, "Unsubscribing");
        client
            .unsubscribe(topic)
            .await
            .map_err(|e| TransportError::SubscriptionFailed(Box::new(e)))
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: u8,
        retained: bool,
    ) -> Result<(), TransportError> {
        let client = self.client.as_ref().ok_or(TransportError::NotConnected)?;
        client
            .publish_with_properties(
                topic,
                qos_from_u8(qos),
                retained,
                payload,
                PublishProperties::default(),
            )
            .await
            .map_err(|e| TransportError::PublishFailed(Box::new(e)))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_mapping() {
        assert_eq!(qos_from_u8(0), QoS::AtMostOnce);
        assert_eq!(qos_from_u8(1), QoS::AtLeastOnce);
        assert_eq!(qos_from_u8(2), QoS::ExactlyOnce);
    }

    /// Loopback port with nothing listening, so attempts fail fast with a
    /// connection refusal.
    fn refused_options() -> ConnectOptions {
        ConnectOptions {
            host: "127.0.0.1".to_string(),
            port: 59999,
            client_id: "tester".to_string(),
            max_packet_size: 8092,
        }
    }

    async fn await_connect_failed(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) {
        match rx.recv().await {
            Some(TransportEvent::ConnectFailed(_)) => {}
            other => panic!("expected ConnectFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_retry_possible_after_failed_attempt() {
        let (mut transport, mut rx) = RumqttTransport::new();
        let options = refused_options();

        transport.connect(&options).await.unwrap();
        await_connect_failed(&mut rx).await;

        transport.connect(&options).await.unwrap();
        await_connect_failed(&mut rx).await;
    }

    #[tokio::test]
    async fn test_disconnect_after_failed_attempt_is_clean() {
        let (mut transport, mut rx) = RumqttTransport::new();
        let options = refused_options();

        transport.connect(&options).await.unwrap();
        await_connect_failed(&mut rx).await;

        assert!(transport.disconnect().await.is_ok());
        assert!(!transport.is_connected());

        // The cleaned-up transport can dial again
        transport.connect(&options).await.unwrap();
        await_connect_failed(&mut rx).await;
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let (mut transport, _rx) = RumqttTransport::new();
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.disconnect().await,
            Err(TransportError::NotConnected)
        ));
        assert!(matches!(
            transport.subscribe("t", 1).await,
            Err(TransportError::NotConnected)
        ));
        assert!(matches!(
            transport.publish("t", b"x".to_vec(), 1, false).await,
            Err(TransportError::NotConnected)
        ));
    }
}
