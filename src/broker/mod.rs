//! Broker-side lifecycle: the engine abstraction and the command loop that
//! owns it.

pub mod command_loop;
pub mod engine;

pub use command_loop::{BrokerCommand, BrokerLoopHandle};
pub use engine::{BrokerEngine, BrokerError, ClientDescriptor, InternalMessage};
