//! Broker command loop
//!
//! A dedicated task owns the broker engine and processes commands strictly
//! in queue order, so the engine is never touched from two contexts at once.
//! The periodic $SYS status tick is a self-perpetuating command: each
//! execution re-enqueues the next one after the configured delay, and the
//! chain dies as soon as the engine stops running.

use crate::broker::engine::{BrokerEngine, BrokerError, InternalMessage};
use crate::config::Properties;
use crate::protocol::envelope::now_ms;
use crate::protocol::topics::{
    SYS_TOPIC_CLIENTS_CONNECTED, SYS_TOPIC_TIME, SYS_TOPIC_UPTIME,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Identity the $SYS status messages are attributed to inside the broker
pub const SYS_ORIGIN_ID: &str = "moqmon-broker";

/// Commands processed by the loop, strictly in enqueue order
#[derive(Debug)]
pub enum BrokerCommand {
    Start(Properties),
    Stop,
    /// Self-enqueued periodic tick; never issued externally
    PublishSysStatus,
}

/// External handle to a spawned broker command loop
pub struct BrokerLoopHandle {
    commands: mpsc::UnboundedSender<BrokerCommand>,
    shutting_down: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

impl BrokerLoopHandle {
    /// Spawn the loop over the given engine.
    pub fn spawn(engine: Box<dyn BrokerEngine>) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let shutting_down = Arc::new(AtomicBool::new(false));

        let actor = CommandLoop {
            engine,
            command_rx,
            command_tx: commands.clone(),
            started_at: None,
            sys_interval: Duration::ZERO,
        };
        let join = tokio::spawn(actor.run());

        Self {
            commands,
            shutting_down,
            join,
        }
    }

    /// Enqueue a broker start. Refused once shutdown has been requested.
    pub fn start(&self, properties: Properties) -> Result<(), BrokerError> {
        self.send_external(BrokerCommand::Start(properties))
    }

    /// Request shutdown: the broker is stopped and the loop ends. No further
    /// external commands are accepted after this returns.
    pub fn stop(&self) -> Result<(), BrokerError> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return Err(BrokerError::LoopShutDown);
        }
        self.commands
            .send(BrokerCommand::Stop)
            .map_err(|_| BrokerError::LoopShutDown)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Wait for the loop task to finish
    pub async fn join(self) {
        let _ = self.join.await;
    }

    fn send_external(&self, command: BrokerCommand) -> Result<(), BrokerError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(BrokerError::LoopShutDown);
        }
        self.commands
            .send(command)
            .map_err(|_| BrokerError::LoopShutDown)
    }
}

struct CommandLoop {
    engine: Box<dyn BrokerEngine>,
    command_rx: mpsc::UnboundedReceiver<BrokerCommand>,
    /// Cloned into the delayed self-enqueue task for the $SYS tick
    command_tx: mpsc::UnboundedSender<BrokerCommand>,
    started_at: Option<Instant>,
    sys_interval: Duration,
}

impl CommandLoop {
    async fn run(mut self) {
        info!("Broker command loop started");
        while let Some(command) = self.command_rx.recv().await {
            match command {
                BrokerCommand::Start(properties) => self.handle_start(properties),
                BrokerCommand::PublishSysStatus => self.handle_sys_status(),
                BrokerCommand::Stop => break,
            }
        }

        if self.engine.is_running() {
            if let Err(e) = self.engine.stop() {
                error!(error = %e, "Broker engine failed to stop");
            } else {
                info!("Broker engine stopped");
            }
        }
        info!("Broker command loop stopped");
    }

    fn handle_start(&mut self, properties: Properties) {
        let span = crate::broker_span!(operation = "start");
        let _guard = span.enter();
        if self.engine.is_running() {
            warn!("Broker engine already running, ignoring start");
            return;
        }

        if let Err(e) = self.engine.start(&properties) {
            error!(error = %e, "Broker engine failed to start");
            return;
        }
        self.started_at = Some(Instant::now());
        info!("Broker engine started");

        let interval_secs = match properties.sys_interval_secs() {
            Ok(secs) => secs,
            Err(e) => {
                warn!(error = %e, "No usable $SYS interval, periodic status disabled");
                0
            }
        };
        self.sys_interval = Duration::from_secs(interval_secs);
        if interval_secs > 0 {
            debug!(interval_secs, "Scheduling periodic $SYS status");
            self.schedule_sys_status();
        }
    }

    /// Publish the status triple, then re-enqueue the tick. A tick that
    /// finds the engine stopped does nothing and breaks the chain.
    fn handle_sys_status(&mut self) {
        if !self.engine.is_running() {
            debug!("Engine not running, dropping $SYS tick");
            return;
        }

        let clients = self.engine.connected_clients().len();
        let uptime_secs = self
            .started_at
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0);

        self.publish_sys(SYS_TOPIC_CLIENTS_CONNECTED, clients.to_string());
        self.publish_sys(SYS_TOPIC_TIME, now_ms().to_string());
        self.publish_sys(SYS_TOPIC_UPTIME, uptime_secs.to_string());

        self.schedule_sys_status();
    }

    fn publish_sys(&mut self, topic: &str, value: String) {
        let message = InternalMessage {
            topic: topic.to_string(),
            payload: value.into_bytes(),
            qos: 0,
            retained: true,
            origin_id: SYS_ORIGIN_ID.to_string(),
        };
        if let Err(e) = self.engine.publish_internal(message) {
            error!(topic = %topic, error = %e, "$SYS publish failed");
        }
    }

    fn schedule_sys_status(&self) {
        let command_tx = self.command_tx.clone();
        let delay = self.sys_interval;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = command_tx.send(BrokerCommand::PublishSysStatus);
        });
    }
}
