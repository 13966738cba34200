//! Testing utilities and mock implementations
//!
//! This module provides a mock session client for exercising the lifecycle
//! controller without an MQTT broker.

pub mod mocks;

pub use mocks::*;
