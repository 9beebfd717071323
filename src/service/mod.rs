//! Supervisory service layer
//!
//! Reconciles the user's desired action (start or stop the broker) against
//! the observed client connection state. The reconciliation table is a pure
//! function from (action, observed state) to a list of effects; the
//! supervisor task applies those effects to the client handle and the broker
//! command loop. State combinations outside the table are reachable only
//! when a collaborator misbehaves, so they are logged as inconsistencies and
//! otherwise ignored.

use crate::broker::command_loop::BrokerLoopHandle;
use crate::broker::engine::BrokerEngine;
use crate::client::core::ClientHandle;
use crate::client::state::ConnectionState;
use crate::config::Properties;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Desired user action the supervisor is currently pursuing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Undefined,
    Stopped,
    Started,
    /// One-shot startup probe: connect without starting a broker to learn
    /// whether one is already active
    Probing,
    Starting,
    Stopping,
}

/// Effects the reconciliation table can demand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceEffect {
    StartBroker,
    StopBroker,
    ConnectClient,
    DisconnectClient,
    ShowStarted,
    ShowStopped,
    ShowTransition,
}

/// Externally visible lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Stopped,
    Transitioning,
    Started,
}

/// User commands accepted by the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceIntent {
    Start,
    Stop,
}

/// Pure reconciliation core of the supervisor
#[derive(Debug)]
pub struct ServiceStateMachine {
    action: ServiceAction,
}

impl ServiceStateMachine {
    pub fn new() -> Self {
        Self {
            action: ServiceAction::Undefined,
        }
    }

    pub fn action(&self) -> ServiceAction {
        self.action
    }

    pub fn set_action(&mut self, action: ServiceAction) {
        debug!(from = ?self.action, to = ?action, "Service action change");
        self.action = action;
    }

    /// Reconcile the current action against an observed connection state,
    /// returning the effects to apply in order.
    pub fn reconcile(&mut self, observed: ConnectionState) -> Vec<ServiceEffect> {
        use ConnectionState as C;
        use ServiceAction as A;
        use ServiceEffect as E;

        match (self.action, observed) {
            // Probe: try to reach an already-running broker
            (A::Probing, C::Created) => vec![E::ConnectClient],
            (A::Probing, C::Connecting) => vec![E::ShowTransition],
            (A::Probing, C::ConnectFailed) => {
                // Nobody is listening; settle into Stopped
                self.set_action(A::Stopped);
                vec![E::ShowStopped, E::DisconnectClient]
            }
            (A::Probing, C::Connected) => {
                self.set_action(A::Started);
                vec![E::ShowStarted]
            }

            // Starting: broker must be up before the client dials
            (A::Starting, C::Disconnected) => vec![E::StartBroker, E::ConnectClient],
            (A::Starting, C::Connecting) => vec![E::ShowTransition],
            (A::Starting, C::ConnectFailed) => vec![E::ShowTransition, E::ConnectClient],
            (A::Starting, C::Connected) => {
                self.set_action(A::Started);
                vec![E::ShowStarted]
            }

            // Stopping: tear the broker down under the client, then let the
            // resulting connection loss drive the clean disconnect
            (A::Stopping, C::Connected) => vec![E::ShowTransition, E::StopBroker],
            (A::Stopping, C::ConnectionLost) => {
                self.set_action(A::Stopped);
                vec![E::ShowStopped, E::DisconnectClient]
            }

            // Settled states: expected observations are no-ops. A client
            // that detaches while the broker keeps running stays Started.
            (A::Stopped, C::Disconnected) => vec![],
            (A::Started, C::Connected) => vec![],
            (A::Started, C::Disconnected) => vec![],

            (action, state) => {
                warn!(action = ?action, state = ?state, "Inconsistent service state");
                vec![]
            }
        }
    }
}

impl Default for ServiceStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Factory for broker engine instances, invoked once per broker start
pub type EngineFactory = Box<dyn Fn() -> Box<dyn BrokerEngine> + Send>;

/// Caller-side handle to a spawned supervisor
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    intents: mpsc::UnboundedSender<ServiceIntent>,
    status: watch::Receiver<ServiceStatus>,
}

impl SupervisorHandle {
    pub fn start(&self) -> bool {
        self.intents.send(ServiceIntent::Start).is_ok()
    }

    pub fn stop(&self) -> bool {
        self.intents.send(ServiceIntent::Stop).is_ok()
    }

    pub fn status(&self) -> ServiceStatus {
        *self.status.borrow()
    }

    pub fn status_receiver(&self) -> watch::Receiver<ServiceStatus> {
        self.status.clone()
    }
}

/// Spawn the supervisor over a running client core.
///
/// The supervisor begins with the startup probe: it attempts a connection
/// without starting a broker, settling into Started if one is already
/// active and Stopped otherwise.
pub fn spawn_supervisor(
    client: ClientHandle,
    engine_factory: EngineFactory,
    properties: Properties,
) -> (SupervisorHandle, JoinHandle<()>) {
    let (intent_tx, intent_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(ServiceStatus::Stopped);

    let state_rx = client.state_receiver();
    let supervisor = Supervisor {
        machine: ServiceStateMachine::new(),
        client,
        state_rx,
        broker: None,
        engine_factory,
        properties,
        status_tx,
        intent_rx,
    };
    let join = tokio::spawn(supervisor.run());

    (
        SupervisorHandle {
            intents: intent_tx,
            status: status_rx,
        },
        join,
    )
}

struct Supervisor {
    machine: ServiceStateMachine,
    client: ClientHandle,
    state_rx: watch::Receiver<ConnectionState>,
    broker: Option<BrokerLoopHandle>,
    engine_factory: EngineFactory,
    properties: Properties,
    status_tx: watch::Sender<ServiceStatus>,
    intent_rx: mpsc::UnboundedReceiver<ServiceIntent>,
}

impl Supervisor {
    async fn run(mut self) {
        info!("Service supervisor started, probing for a running broker");
        self.machine.set_action(ServiceAction::Probing);
        let observed = *self.state_rx.borrow_and_update();
        let effects = self.machine.reconcile(observed);
        self.apply(effects);

        loop {
            tokio::select! {
                changed = self.state_rx.changed() => {
                    if changed.is_err() {
                        debug!("Client state channel closed");
                        break;
                    }
                    let observed = *self.state_rx.borrow_and_update();
                    let effects = self.machine.reconcile(observed);
                    self.apply(effects);
                }
                intent = self.intent_rx.recv() => {
                    match intent {
                        Some(intent) => self.handle_intent(intent),
                        None => break,
                    }
                }
            }
        }

        if let Some(broker) = self.broker.take() {
            if let Err(e) = broker.stop() {
                debug!(error = %e, "Broker loop already shut down");
            }
            broker.join().await;
        }
        self.client.shutdown();
        info!("Service supervisor stopped");
    }

    fn handle_intent(&mut self, intent: ServiceIntent) {
        match intent {
            ServiceIntent::Start => match self.machine.action() {
                ServiceAction::Started | ServiceAction::Starting => {
                    debug!("Start requested but already starting or started");
                }
                _ => {
                    self.machine.set_action(ServiceAction::Starting);
                    let observed = *self.state_rx.borrow();
                    let effects = self.machine.reconcile(observed);
                    self.apply(effects);
                }
            },
            ServiceIntent::Stop => match self.machine.action() {
                ServiceAction::Stopped | ServiceAction::Stopping => {
                    debug!("Stop requested but already stopping or stopped");
                }
                _ => {
                    self.machine.set_action(ServiceAction::Stopping);
                    let observed = *self.state_rx.borrow();
                    let effects = self.machine.reconcile(observed);
                    self.apply(effects);
                }
            },
        }
    }

    fn apply(&mut self, effects: Vec<ServiceEffect>) {
        for effect in effects {
            debug!(effect = ?effect, "Applying service effect");
            match effect {
                ServiceEffect::StartBroker => self.start_broker(),
                ServiceEffect::StopBroker => self.stop_broker(),
                ServiceEffect::ConnectClient => {
                    self.client.connect();
                }
                ServiceEffect::DisconnectClient => {
                    self.client.disconnect();
                }
                ServiceEffect::ShowStarted => {
                    let _ = self.status_tx.send(ServiceStatus::Started);
                }
                ServiceEffect::ShowStopped => {
                    let _ = self.status_tx.send(ServiceStatus::Stopped);
                }
                ServiceEffect::ShowTransition => {
                    let _ = self.status_tx.send(ServiceStatus::Transitioning);
                }
            }
        }
    }

    fn start_broker(&mut self) {
        if self.broker.is_none() {
            self.broker = Some(BrokerLoopHandle::spawn((self.engine_factory)()));
        }
        if let Some(broker) = &self.broker {
            if let Err(e) = broker.start(self.properties.clone()) {
                error!(error = %e, "Broker start command refused");
            }
        }
    }

    fn stop_broker(&mut self) {
        if let Some(broker) = self.broker.take() {
            if let Err(e) = broker.stop() {
                error!(error = %e, "Broker stop command refused");
            }
            // The loop finishes on its own; the next broker start spawns a
            // fresh one.
            tokio::spawn(broker.join());
        } else {
            warn!("Stop broker requested but no broker loop is active");
        }
    }
}
