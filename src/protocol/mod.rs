//! Wire-level conventions shared by the monitor client and the broker loop:
//! topic names, pattern matching, and the message envelope.

pub mod envelope;
pub mod topics;

pub use envelope::{create_header, now_ms, FieldMap};
pub use topics::{add_root_topic, remove_root_topic, TopicPattern};
