//! Self-measuring monitor client
//!
//! The client connects to the local broker, subscribes to the monitor
//! topics, and runs the heartbeat, latency, and $SYS handlers over a
//! single-threaded core loop.

pub mod core;
pub mod heartbeat;
pub mod latency;
pub mod router;
pub mod state;
pub mod sys;

pub use self::core::{spawn_client, ClientCommand, ClientHandle};
pub use heartbeat::HeartbeatHandler;
pub use latency::{LatencyHandler, LatencyStatistics};
pub use router::{DispatchOutcome, DispatchResult, TopicHandler, TopicRouter};
pub use state::{ConnectionState, ConnectionStateMachine};
pub use sys::SysHandler;
