//! Observability infrastructure for the broker monitor

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};
