//! MQTT topic surface used by the sample
//!
//! Fixed topics plus the topic name and topic filter rules enforced before
//! anything is handed to the broker.

pub mod topics;

pub use topics::*;
