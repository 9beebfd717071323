//! Testing utilities and mock implementations
//!
//! Mock transport and broker engine for exercising the client core and the
//! broker command loop without a real broker.

pub mod mocks;

pub use mocks::*;
