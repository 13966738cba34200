//! Transport layer for the sample session
//!
//! This module provides the session abstraction and its MQTT implementation.

use crate::config::ConnectionSettings;

pub mod mqtt;

pub use mqtt::{SessionError, SessionState};

/// A single broker session
///
/// This trait abstracts the MQTT engine so the lifecycle controller can be
/// driven by a mock in tests.
#[async_trait::async_trait]
pub trait SessionClient: Send + Sync {
    /// Establish the session; resolves once the broker acknowledges it
    async fn connect(&mut self, settings: &ConnectionSettings) -> Result<(), SessionError>;

    /// Subscribe to a topic filter; resolves once the broker grants it
    async fn subscribe(&mut self, topic_filter: &str) -> Result<(), SessionError>;

    /// Publish a UTF-8 payload at QoS 1 without retain
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), SessionError>;

    /// Gracefully end the session. No-op unless connected.
    async fn end_session(&mut self);

    fn state(&self) -> SessionState;

    fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }
}
