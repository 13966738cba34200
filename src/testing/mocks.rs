//! Mock implementations for testing
//!
//! Provides a mock [`SessionClient`] that records every call and can be told to
//! fail a given step or to hold the connect step open, so lifecycle behavior
//! can be tested without a broker.

use crate::config::ConnectionSettings;
use crate::transport::{SessionClient, SessionError, SessionState};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// One call made against a [`MockSessionClient`]
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCall {
    Connect { hostname: String, port: u16 },
    Subscribe(String),
    Publish { topic: String, payload: String },
    EndSession,
}

/// Protocol step a mock should fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailingStep {
    Connect,
    Subscribe,
    Publish,
}

/// Shared view of what mocks built from the same recorder did
#[derive(Debug, Clone, Default)]
pub struct MockSessionRecorder {
    pub calls: Arc<Mutex<Vec<SessionCall>>>,
    pub sessions_ended: Arc<AtomicUsize>,
    pub sessions_dropped: Arc<AtomicUsize>,
}

impl MockSessionRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_calls(&self) -> Vec<SessionCall> {
        self.calls.lock().await.clone()
    }

    /// Number of `end_session` calls that actually closed a session
    pub fn sessions_ended(&self) -> usize {
        self.sessions_ended.load(Ordering::SeqCst)
    }

    /// Number of mock clients that have been dropped
    pub fn sessions_dropped(&self) -> usize {
        self.sessions_dropped.load(Ordering::SeqCst)
    }

    async fn record(&self, call: SessionCall) {
        self.calls.lock().await.push(call);
    }
}

/// Mock session client for testing
#[derive(Debug, Default)]
pub struct MockSessionClient {
    pub recorder: MockSessionRecorder,
    pub fail_on: Option<FailingStep>,
    pub connect_delay: Option<Duration>,
    state: SessionState,
}

impl MockSessionClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recorder(recorder: MockSessionRecorder) -> Self {
        Self {
            recorder,
            fail_on: None,
            connect_delay: None,
            state: SessionState::Idle,
        }
    }

    pub fn with_failure(mut self, step: FailingStep) -> Self {
        self.fail_on = Some(step);
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    fn fails(&self, step: FailingStep) -> bool {
        self.fail_on == Some(step)
    }
}

#[async_trait]
impl SessionClient for MockSessionClient {
    async fn connect(&mut self, settings: &ConnectionSettings) -> Result<(), SessionError> {
        if !self.state.can_connect() {
            return Err(SessionError::invalid_state("connect", self.state));
        }
        self.recorder
            .record(SessionCall::Connect {
                hostname: settings.hostname.clone(),
                port: settings.tcp_port,
            })
            .await;

        self.state = SessionState::Connecting;
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }

        if self.fails(FailingStep::Connect) {
            self.state = SessionState::Idle;
            return Err(SessionError::ConnectionFailed(
                "Mock connection failure".to_string(),
            ));
        }

        self.state = SessionState::Connected;
        Ok(())
    }

    async fn subscribe(&mut self, topic_filter: &str) -> Result<(), SessionError> {
        if !self.state.can_subscribe() {
            return Err(SessionError::invalid_state("subscribe", self.state));
        }
        crate::protocol::validate_topic_filter(topic_filter)?;
        self.recorder
            .record(SessionCall::Subscribe(topic_filter.to_string()))
            .await;

        if self.fails(FailingStep::Subscribe) {
            return Err(SessionError::SubscriptionFailed(
                "Mock subscription failure".to_string(),
            ));
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<(), SessionError> {
        if !self.state.can_publish() {
            return Err(SessionError::invalid_state("publish", self.state));
        }
        crate::protocol::validate_topic_name(topic)?;
        self.recorder
            .record(SessionCall::Publish {
                topic: topic.to_string(),
                payload: payload.to_string(),
            })
            .await;

        if self.fails(FailingStep::Publish) {
            return Err(SessionError::PublishFailed(
                "Mock publish failure".to_string(),
            ));
        }
        Ok(())
    }

    async fn end_session(&mut self) {
        self.recorder.record(SessionCall::EndSession).await;
        if self.state == SessionState::Connected {
            self.recorder.sessions_ended.fetch_add(1, Ordering::SeqCst);
            self.state = SessionState::Ended;
        }
    }

    fn state(&self) -> SessionState {
        self.state
    }
}

impl Drop for MockSessionClient {
    fn drop(&mut self) {
        self.recorder.sessions_dropped.fetch_add(1, Ordering::SeqCst);
    }
}
