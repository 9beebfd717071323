//! Mock implementations for testing
//!
//! `MockTransport` stands in for the MQTT wire: it records subscriptions and
//! publishes, acknowledges connects, and can loop published messages back to
//! matching subscriptions the way a broker would echo them to a subscribed
//! client. `MockBrokerEngine` records internal publishes for the command
//! loop tests.

use crate::broker::engine::{BrokerEngine, BrokerError, ClientDescriptor, InternalMessage};
use crate::config::Properties;
use crate::protocol::topics::TopicPattern;
use crate::transport::{ConnectOptions, Transport, TransportError, TransportEvent};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// (topic, payload, qos, retained)
pub type PublishedMessage = (String, Vec<u8>, u8, bool);

#[derive(Debug, Default)]
struct MockTransportState {
    published: Mutex<Vec<PublishedMessage>>,
    subscribed: Mutex<Vec<String>>,
    connected: AtomicBool,
    fail_connect: AtomicBool,
    fail_disconnect: AtomicBool,
}

/// Mock transport for testing the client core
pub struct MockTransport {
    state: Arc<MockTransportState>,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    /// Acknowledge connects with a `Connected` event (on by default)
    pub auto_ack: bool,
    /// Echo publishes back to matching subscriptions, like a broker would
    pub echo: bool,
}

impl MockTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                state: Arc::new(MockTransportState::default()),
                event_tx,
                auto_ack: true,
                echo: false,
            },
            event_rx,
        )
    }

    /// Broker-like transport: connects acknowledge and publishes echo back
    /// to matching subscriptions.
    pub fn with_echo() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (mut transport, event_rx) = Self::new();
        transport.echo = true;
        (transport, event_rx)
    }

    /// Inspection and event-injection handle, valid after the transport has
    /// been moved into a client core.
    pub fn handle(&self) -> MockTransportHandle {
        MockTransportHandle {
            state: self.state.clone(),
            event_tx: self.event_tx.clone(),
        }
    }

    fn matches_subscription(&self, topic: &str) -> bool {
        let subscribed = self.state.subscribed.lock().unwrap();
        subscribed.iter().any(|pattern| {
            TopicPattern::compile(pattern)
                .map(|p| p.matches(topic))
                .unwrap_or(false)
        })
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self, _options: &ConnectOptions) -> Result<(), TransportError> {
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed(
                "Mock connection failure".to_string(),
            ));
        }
        if self.auto_ack {
            self.state.connected.store(true, Ordering::SeqCst);
            let _ = self.event_tx.send(TransportEvent::Connected);
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if self.state.fail_disconnect.load(Ordering::SeqCst) {
            return Err(TransportError::DisconnectFailed(
                "Mock disconnect failure".to_string(),
            ));
        }
        self.state.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str, _qos: u8) -> Result<(), TransportError> {
        self.state
            .subscribed
            .lock()
            .unwrap()
            .push(topic.to_string());
        Ok(())
    }

    async fn unsubscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.state
            .subscribed
            .lock()
            .unwrap()
            .retain(|t| t != topic);
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: u8,
        retained: bool,
    ) -> Result<(), TransportError> {
        self.state.published.lock().unwrap().push((
            topic.to_string(),
            payload.clone(),
            qos,
            retained,
        ));

        if self.echo && self.matches_subscription(topic) {
            let _ = self.event_tx.send(TransportEvent::MessageArrived {
                topic: topic.to_string(),
                payload,
            });
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }
}

/// Handle for inspecting a mock transport and injecting events into its
/// owning client core
#[derive(Clone)]
pub struct MockTransportHandle {
    state: Arc<MockTransportState>,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
}

impl MockTransportHandle {
    pub fn inject(&self, event: TransportEvent) {
        let _ = self.event_tx.send(event);
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.state.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_disconnect(&self, fail: bool) {
        self.state.fail_disconnect.store(fail, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.published.lock().unwrap().clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.state.subscribed.lock().unwrap().clone()
    }

    pub fn clear_published(&self) {
        self.state.published.lock().unwrap().clear();
    }
}

/// Mock broker engine for command loop tests
pub struct MockBrokerEngine {
    running: Arc<AtomicBool>,
    published: Arc<Mutex<Vec<InternalMessage>>>,
    clients: Vec<ClientDescriptor>,
    pub fail_start: bool,
}

impl MockBrokerEngine {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            published: Arc::new(Mutex::new(Vec::new())),
            clients: Vec::new(),
            fail_start: false,
        }
    }

    pub fn with_clients(clients: Vec<ClientDescriptor>) -> Self {
        Self {
            clients,
            ..Self::new()
        }
    }

    /// Inspection handle, valid after the engine has been moved into a
    /// command loop.
    pub fn records(&self) -> MockEngineRecords {
        MockEngineRecords {
            running: self.running.clone(),
            published: self.published.clone(),
        }
    }
}

impl Default for MockBrokerEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerEngine for MockBrokerEngine {
    fn start(&mut self, _properties: &Properties) -> Result<(), BrokerError> {
        if self.fail_start {
            return Err(BrokerError::StartFailed("Mock start failure".to_string()));
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), BrokerError> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn connected_clients(&self) -> Vec<ClientDescriptor> {
        self.clients.clone()
    }

    fn publish_internal(&mut self, message: InternalMessage) -> Result<(), BrokerError> {
        self.published.lock().unwrap().push(message);
        Ok(())
    }
}

/// Shared view of a mock engine's state
#[derive(Clone)]
pub struct MockEngineRecords {
    running: Arc<AtomicBool>,
    published: Arc<Mutex<Vec<InternalMessage>>>,
}

impl MockEngineRecords {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Force the running flag, simulating an engine dying outside the loop
    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<InternalMessage> {
        self.published.lock().unwrap().clone()
    }
}
