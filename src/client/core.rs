//! Single-threaded monitor client core
//!
//! One task owns the transport, the topic router, and the connection state
//! machine, and multiplexes three inputs: caller commands, transport events,
//! and due handler timers. Handlers therefore never need locking; timers
//! re-enter the same loop through a channel instead of firing concurrently.

use crate::client::router::{DispatchResult, HandlerContext, OutputBatch, TopicRouter};
use crate::client::state::{ConnectionState, ConnectionStateMachine};
use crate::config::Properties;
use crate::error::MonitorResult;
use crate::protocol::envelope::now_ms;
use crate::protocol::topics::{add_root_topic, remove_root_topic};
use crate::transport::{ConnectOptions, Transport, TransportEvent, QOS_AT_LEAST_ONCE};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Commands accepted by the client core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCommand {
    Connect,
    Disconnect,
    /// Disconnect if needed and end the core task
    Shutdown,
}

/// A handler timer that has come due
#[derive(Debug)]
struct TimerDue {
    key: String,
    epoch: u64,
}

/// Caller-side handle to a spawned client core
#[derive(Debug, Clone)]
pub struct ClientHandle {
    commands: mpsc::UnboundedSender<ClientCommand>,
    state: watch::Receiver<ConnectionState>,
}

impl ClientHandle {
    pub fn connect(&self) -> bool {
        self.commands.send(ClientCommand::Connect).is_ok()
    }

    pub fn disconnect(&self) -> bool {
        self.commands.send(ClientCommand::Disconnect).is_ok()
    }

    pub fn shutdown(&self) -> bool {
        self.commands.send(ClientCommand::Shutdown).is_ok()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Observer side of the connection state channel
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

/// Spawn a client core over the given transport.
///
/// `observer` receives the per-handler result maps of every dispatched
/// message; pass `None` when nobody consumes them.
pub fn spawn_client<T: Transport + 'static>(
    transport: T,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    properties: Properties,
    client_id: String,
    observer: Option<mpsc::UnboundedSender<Vec<DispatchResult>>>,
) -> MonitorResult<(ClientHandle, JoinHandle<()>)> {
    let router = TopicRouter::with_default_handlers()?;
    let (state, state_rx) = ConnectionStateMachine::new();
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (timer_tx, timer_rx) = mpsc::unbounded_channel();

    let core = ClientCore {
        client_id,
        properties,
        transport,
        events,
        router,
        state,
        command_rx,
        timer_tx,
        timer_rx,
        observer,
    };
    let join = tokio::spawn(core.run());

    Ok((
        ClientHandle {
            commands: command_tx,
            state: state_rx,
        },
        join,
    ))
}

struct ClientCore<T: Transport> {
    client_id: String,
    properties: Properties,
    transport: T,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    router: TopicRouter,
    state: ConnectionStateMachine,
    command_rx: mpsc::UnboundedReceiver<ClientCommand>,
    /// Cloned into spawned timer tasks; kept here so the receiver side
    /// stays open for the lifetime of the core
    timer_tx: mpsc::UnboundedSender<TimerDue>,
    timer_rx: mpsc::UnboundedReceiver<TimerDue>,
    observer: Option<mpsc::UnboundedSender<Vec<DispatchResult>>>,
}

impl<T: Transport> ClientCore<T> {
    async fn run(mut self) {
        info!(client_id = %self.client_id, "Monitor client started");
        loop {
            tokio::select! {
                command = self.command_rx.recv() => {
                    match command {
                        Some(ClientCommand::Connect) => self.handle_connect().await,
                        Some(ClientCommand::Disconnect) => self.handle_disconnect().await,
                        Some(ClientCommand::Shutdown) | None => {
                            if self.state.is_state(ConnectionState::Connected) {
                                self.handle_disconnect().await;
                            }
                            break;
                        }
                    }
                }
                event = self.events.recv() => {
                    match event {
                        Some(event) => self.handle_transport_event(event).await,
                        None => {
                            debug!("Transport event channel closed");
                            break;
                        }
                    }
                }
                Some(due) = self.timer_rx.recv() => {
                    self.handle_timer(due).await;
                }
            }
        }
        info!(client_id = %self.client_id, "Monitor client stopped");
    }

    async fn handle_connect(&mut self) {
        self.state.set_state(ConnectionState::Connecting);

        let options = match ConnectOptions::from_properties(&self.properties, &self.client_id) {
            Ok(options) => options,
            Err(e) => {
                error!(error = %e, "Connection parameters unavailable");
                self.state.set_state(ConnectionState::ConnectFailed);
                return;
            }
        };

        if let Err(e) = self.transport.connect(&options).await {
            warn!(error = %e, "Connection attempt failed to start");
            self.state.set_state(ConnectionState::ConnectFailed);
        }
    }

    /// Handlers are told first so pending timers die before the wire does.
    async fn handle_disconnect(&mut self) {
        self.router.broadcast_disconnected();
        if self.transport.is_connected() {
            for topic in self.router.all_topics() {
                let full_topic = add_root_topic(&topic);
                if let Err(e) = self.transport.unsubscribe(&full_topic).await {
                    debug!(topic = %full_topic, error = %e, "Unsubscribe failed");
                }
            }
        }
        match self.transport.disconnect().await {
            Ok(()) => self.state.set_state(ConnectionState::Disconnected),
            Err(e) => {
                error!(error = %e, "Disconnect failed");
                self.state.set_state(ConnectionState::DisconnectFailed);
            }
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                self.state.set_state(ConnectionState::Connected);
                self.subscribe_all().await;
                let ctx = HandlerContext {
                    client_id: &self.client_id,
                    properties: &self.properties,
                };
                let batch = self.router.broadcast_connected(&ctx, now_ms());
                self.apply_batch(batch).await;
            }
            TransportEvent::ConnectFailed(reason) => {
                warn!(reason = %reason, "Connection failed");
                self.state.set_state(ConnectionState::ConnectFailed);
            }
            TransportEvent::ConnectionLost(reason) => {
                if !self.state.is_state(ConnectionState::Disconnected) {
                    warn!(reason = %reason, "Connection lost");
                    self.state.set_state(ConnectionState::ConnectionLost);
                }
            }
            TransportEvent::MessageArrived { topic, payload } => {
                self.handle_message(&topic, &payload).await;
            }
        }
    }

    async fn subscribe_all(&mut self) {
        for topic in self.router.all_topics() {
            let full_topic = add_root_topic(&topic);
            match self
                .transport
                .subscribe(&full_topic, QOS_AT_LEAST_ONCE)
                .await
            {
                Ok(()) => debug!(topic = %full_topic, "Subscribed"),
                Err(e) => error!(topic = %full_topic, error = %e, "Subscription failed"),
            }
        }
    }

    async fn handle_message(&mut self, topic: &str, payload: &[u8]) {
        let topic = remove_root_topic(topic).to_string();
        let text;
        let message = if payload.is_empty() {
            None
        } else {
            text = String::from_utf8_lossy(payload);
            Some(text.as_ref())
        };

        let ctx = HandlerContext {
            client_id: &self.client_id,
            properties: &self.properties,
        };
        let outcome = self.router.dispatch(&topic, message, now_ms(), &ctx);

        if let Some(observer) = &self.observer {
            if !outcome.results.is_empty() {
                let _ = observer.send(outcome.results);
            }
        }
        self.apply_batch(outcome.batch).await;
    }

    async fn handle_timer(&mut self, due: TimerDue) {
        let ctx = HandlerContext {
            client_id: &self.client_id,
            properties: &self.properties,
        };
        let batch = self.router.on_timer(&due.key, due.epoch, now_ms(), &ctx);
        self.apply_batch(batch).await;
    }

    /// Publish the outbound messages of a batch and arm its timers. Timer
    /// ticks come back through the timer channel, so handler re-entry stays
    /// on this task.
    async fn apply_batch(&mut self, batch: OutputBatch) {
        for message in batch.outbound {
            if !self.state.is_state(ConnectionState::Connected) {
                warn!(topic = %message.topic, "Dropping outbound message, not connected");
                continue;
            }
            let payload = match serde_json::to_vec(&message.payload) {
                Ok(payload) => payload,
                Err(e) => {
                    error!(topic = %message.topic, error = %e, "Payload serialization failed");
                    continue;
                }
            };
            let full_topic = add_root_topic(&message.topic);
            if let Err(e) = self
                .transport
                .publish(&full_topic, payload, QOS_AT_LEAST_ONCE, false)
                .await
            {
                error!(topic = %full_topic, error = %e, "Publish failed");
            }
        }

        for timer in batch.timers {
            let timer_tx = self.timer_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timer.delay).await;
                let _ = timer_tx.send(TimerDue {
                    key: timer.key,
                    epoch: timer.epoch,
                });
            });
        }
    }
}
