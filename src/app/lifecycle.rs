//! Session lifecycle management
//!
//! [`SessionLifecycle`] owns the sample's single session. It runs the startup
//! sequence (resolve settings, connect, subscribe, publish) and the one-time
//! shutdown that ends the session if, and only if, it is connected.
//!
//! Startup and shutdown may race: a termination signal can arrive while a
//! protocol step is in flight. Shutdown sets the stopping flag and then waits
//! for the session lock, so the in-flight step completes first and startup
//! sees the flag before its next step.

use crate::config::{self, ConfigError};
use crate::lifecycle_span;
use crate::protocol::{SAMPLE_PAYLOAD, SAMPLE_TOPIC, SAMPLE_TOPIC_FILTER};
use crate::transport::{SessionClient, SessionError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::{watch, Mutex, OnceCell};
use tracing::{error, info, warn, Instrument};

type ClientFactory<C> = Box<dyn Fn() -> C + Send + Sync>;

/// What a call to [`SessionLifecycle::stop`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// No client existed or it was not connected; nothing was sent
    NoActiveSession,
    /// The connected session was ended gracefully
    SessionEnded,
}

/// What the process does once startup has returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterStartup {
    /// A session is open or shutdown is under way; wait for it to finish
    AwaitShutdown,
    /// Nothing is open; exit right away
    Exit,
}

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    #[error("Session lifecycle already started")]
    AlreadyStarted,
    #[error("Shutdown requested before startup completed")]
    ShutdownRequested,
}

/// Lifecycle of the single sample session, shared behind an `Arc`
pub struct SessionLifecycle<C>
where
    C: SessionClient + 'static,
{
    raw_config: HashMap<String, String>,
    client_factory: ClientFactory<C>,
    session: Mutex<Option<C>>,
    started: AtomicBool,
    stopping: AtomicBool,
    shutdown: OnceCell<ShutdownOutcome>,
    shutdown_done: watch::Sender<bool>,
}

impl<C> SessionLifecycle<C>
where
    C: SessionClient + 'static,
{
    /// Create a lifecycle over a raw configuration mapping.
    ///
    /// The factory is called once, during startup, after the settings resolve.
    pub fn new<F>(raw_config: HashMap<String, String>, client_factory: F) -> Self
    where
        F: Fn() -> C + Send + Sync + 'static,
    {
        let (shutdown_done, _) = watch::channel(false);
        Self {
            raw_config,
            client_factory: Box::new(client_factory),
            session: Mutex::new(None),
            started: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            shutdown: OnceCell::new(),
            shutdown_done,
        }
    }

    /// Run the startup sequence.
    ///
    /// Any failure stops the sequence; steps already completed are kept, so
    /// a failed subscribe or publish leaves the session connected.
    pub async fn start(&self) -> Result<(), LifecycleError> {
        self.run_startup()
            .instrument(lifecycle_span!("startup"))
            .await
    }

    async fn run_startup(&self) -> Result<(), LifecycleError> {
        let settings = config::resolve(&self.raw_config)?;

        if self.started.swap(true, Ordering::SeqCst) {
            return Err(LifecycleError::AlreadyStarted);
        }

        {
            let mut session = self.session.lock().await;
            self.ensure_running("connect")?;
            let client = session.insert((self.client_factory)());
            client.connect(&settings).await?;
        }

        {
            let mut session = self.session.lock().await;
            self.ensure_running("subscribe")?;
            let client = Self::active_client(&mut session, "subscribe")?;
            client.subscribe(SAMPLE_TOPIC_FILTER).await?;
        }

        {
            let mut session = self.session.lock().await;
            self.ensure_running("publish")?;
            let client = Self::active_client(&mut session, "publish")?;
            client.publish(SAMPLE_TOPIC, SAMPLE_PAYLOAD).await?;
        }

        info!("Startup sequence complete");
        Ok(())
    }

    /// Checked with the session lock held, so a concurrent stop either already
    /// ran or is waiting for this step
    fn ensure_running(&self, step: &str) -> Result<(), LifecycleError> {
        if self.stopping.load(Ordering::SeqCst) {
            warn!("Shutdown requested, skipping {}", step);
            return Err(LifecycleError::ShutdownRequested);
        }
        Ok(())
    }

    fn active_client<'a>(
        session: &'a mut Option<C>,
        operation: &'static str,
    ) -> Result<&'a mut C, LifecycleError> {
        session.as_mut().ok_or_else(|| {
            LifecycleError::Session(SessionError::invalid_state(
                operation,
                crate::transport::SessionState::Idle,
            ))
        })
    }

    /// End the session if it is connected.
    ///
    /// Runs at most once. Concurrent and repeated callers wait for the first
    /// run and get its outcome.
    pub async fn stop(&self) -> ShutdownOutcome {
        *self
            .shutdown
            .get_or_init(|| self.run_shutdown().instrument(lifecycle_span!("shutdown")))
            .await
    }

    async fn run_shutdown(&self) -> ShutdownOutcome {
        self.stopping.store(true, Ordering::SeqCst);

        let mut session = self.session.lock().await;
        // The session is released here whatever its state
        let outcome = match session.take() {
            Some(mut client) if client.is_connected() => {
                info!("Ending MQTT session");
                client.end_session().await;
                ShutdownOutcome::SessionEnded
            }
            Some(client) => {
                info!(state = ?client.state(), "Session not connected, nothing to end");
                ShutdownOutcome::NoActiveSession
            }
            None => {
                info!("No session was created, nothing to end");
                ShutdownOutcome::NoActiveSession
            }
        };
        drop(session);

        self.shutdown_done.send_replace(true);
        info!(outcome = ?outcome, "Shutdown complete");
        outcome
    }

    /// Whether the process should wait for shutdown after `start` returned
    pub async fn after_startup(&self) -> AfterStartup {
        if self.is_stopping() || self.is_connected().await {
            AfterStartup::AwaitShutdown
        } else {
            AfterStartup::Exit
        }
    }

    /// Start, then wait for shutdown while a session is open.
    ///
    /// Startup failures are logged as they happen and never retried. The error
    /// is returned once the wait is over. A startup cut short by shutdown is
    /// not an error.
    pub async fn run(&self) -> Result<(), LifecycleError> {
        let startup = match self.start().await {
            Err(LifecycleError::ShutdownRequested) => Ok(()),
            Err(e) => {
                error!("Startup failed: {}", e);
                Err(e)
            }
            Ok(()) => Ok(()),
        };

        match self.after_startup().await {
            AfterStartup::AwaitShutdown => {
                info!("Waiting for SIGINT or SIGTERM to end the session");
                self.wait_for_shutdown().await;
            }
            AfterStartup::Exit => {
                info!("No session is open, exiting");
            }
        }

        startup
    }

    /// Whether a session exists and is connected
    pub async fn is_connected(&self) -> bool {
        self.session
            .lock()
            .await
            .as_ref()
            .is_some_and(|client| client.is_connected())
    }

    /// Whether shutdown has begun
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Outcome of the shutdown, once it has completed
    pub fn shutdown_outcome(&self) -> Option<ShutdownOutcome> {
        self.shutdown.get().copied()
    }

    /// Resolves once shutdown has completed
    pub async fn wait_for_shutdown(&self) {
        let mut done = self.shutdown_done.subscribe();
        // The sender lives in self, so the channel cannot close while we wait
        let _ = done.wait_for(|finished| *finished).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingStep, MockSessionClient, MockSessionRecorder, SessionCall};
    use std::sync::Arc;
    use std::time::Duration;

    fn raw(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn valid_raw() -> HashMap<String, String> {
        raw(&[("MQTT_HOST_NAME", "broker.test")])
    }

    fn lifecycle_with(
        raw_config: HashMap<String, String>,
        recorder: &MockSessionRecorder,
        fail_on: Option<FailingStep>,
    ) -> SessionLifecycle<MockSessionClient> {
        let recorder = recorder.clone();
        SessionLifecycle::new(raw_config, move || {
            let mut client = MockSessionClient::with_recorder(recorder.clone());
            client.fail_on = fail_on;
            client
        })
    }

    #[tokio::test]
    async fn test_start_runs_full_sequence() {
        let recorder = MockSessionRecorder::new();
        let lifecycle = lifecycle_with(valid_raw(), &recorder, None);

        lifecycle.start().await.unwrap();

        assert!(lifecycle.is_connected().await);
        let calls = recorder.get_calls().await;
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1], SessionCall::Subscribe("sample/+".to_string()));
        assert_eq!(
            calls[2],
            SessionCall::Publish {
                topic: "sample/topic1".to_string(),
                payload: "Hello World!".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_start_with_missing_hostname_creates_no_client() {
        let recorder = MockSessionRecorder::new();
        let lifecycle = lifecycle_with(HashMap::new(), &recorder, None);

        let result = lifecycle.start().await;

        assert!(matches!(
            result,
            Err(LifecycleError::Configuration(ConfigError::MissingHostName))
        ));
        assert!(recorder.get_calls().await.is_empty());
        assert_eq!(lifecycle.stop().await, ShutdownOutcome::NoActiveSession);
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let recorder = MockSessionRecorder::new();
        let lifecycle = lifecycle_with(valid_raw(), &recorder, None);

        lifecycle.start().await.unwrap();
        assert!(matches!(
            lifecycle.start().await,
            Err(LifecycleError::AlreadyStarted)
        ));
        assert_eq!(recorder.get_calls().await.len(), 3);
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_nothing_to_end() {
        let recorder = MockSessionRecorder::new();
        let lifecycle = lifecycle_with(valid_raw(), &recorder, Some(FailingStep::Connect));

        assert!(matches!(
            lifecycle.start().await,
            Err(LifecycleError::Session(SessionError::ConnectionFailed(_)))
        ));
        assert!(!lifecycle.is_connected().await);
        assert_eq!(lifecycle.stop().await, ShutdownOutcome::NoActiveSession);
        assert_eq!(recorder.sessions_ended(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_failure_keeps_session_open() {
        let recorder = MockSessionRecorder::new();
        let lifecycle = lifecycle_with(valid_raw(), &recorder, Some(FailingStep::Subscribe));

        assert!(matches!(
            lifecycle.start().await,
            Err(LifecycleError::Session(SessionError::SubscriptionFailed(_)))
        ));

        // No publish after the failed step, and no rollback either
        let calls = recorder.get_calls().await;
        assert!(!calls
            .iter()
            .any(|call| matches!(call, SessionCall::Publish { .. })));
        assert!(lifecycle.is_connected().await);

        assert_eq!(lifecycle.stop().await, ShutdownOutcome::SessionEnded);
        assert_eq!(recorder.sessions_ended(), 1);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let recorder = MockSessionRecorder::new();
        let lifecycle = lifecycle_with(valid_raw(), &recorder, None);
        lifecycle.start().await.unwrap();

        assert_eq!(lifecycle.stop().await, ShutdownOutcome::SessionEnded);
        assert_eq!(lifecycle.stop().await, ShutdownOutcome::SessionEnded);

        assert_eq!(recorder.sessions_ended(), 1);
        let end_calls = recorder
            .get_calls()
            .await
            .into_iter()
            .filter(|call| *call == SessionCall::EndSession)
            .count();
        assert_eq!(end_calls, 1);
        assert!(lifecycle.is_stopping());
        assert_eq!(
            lifecycle.shutdown_outcome(),
            Some(ShutdownOutcome::SessionEnded)
        );
    }

    #[tokio::test]
    async fn test_concurrent_stops_end_session_once() {
        let recorder = MockSessionRecorder::new();
        let lifecycle = Arc::new(lifecycle_with(valid_raw(), &recorder, None));
        lifecycle.start().await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lifecycle = Arc::clone(&lifecycle);
                tokio::spawn(async move { lifecycle.stop().await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), ShutdownOutcome::SessionEnded);
        }
        assert_eq!(recorder.sessions_ended(), 1);
    }

    #[tokio::test]
    async fn test_stop_during_connect_prevents_subscribe() {
        let recorder = MockSessionRecorder::new();
        let factory_recorder = recorder.clone();
        let lifecycle = Arc::new(SessionLifecycle::new(valid_raw(), move || {
            MockSessionClient::with_recorder(factory_recorder.clone())
                .with_connect_delay(Duration::from_millis(100))
        }));

        let starter = {
            let lifecycle = Arc::clone(&lifecycle);
            tokio::spawn(async move { lifecycle.start().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        let outcome = lifecycle.stop().await;

        // Stop waited for the in-flight connect, then ended the fresh session
        assert_eq!(outcome, ShutdownOutcome::SessionEnded);
        assert!(matches!(
            starter.await.unwrap(),
            Err(LifecycleError::ShutdownRequested)
        ));

        let calls = recorder.get_calls().await;
        assert!(!calls
            .iter()
            .any(|call| matches!(call, SessionCall::Subscribe(_))));
        assert_eq!(recorder.sessions_ended(), 1);
    }

    #[tokio::test]
    async fn test_stop_before_start_blocks_startup() {
        let recorder = MockSessionRecorder::new();
        let lifecycle = lifecycle_with(valid_raw(), &recorder, None);

        assert_eq!(lifecycle.stop().await, ShutdownOutcome::NoActiveSession);
        assert!(matches!(
            lifecycle.start().await,
            Err(LifecycleError::ShutdownRequested)
        ));
        assert!(recorder.get_calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_resolves_after_stop() {
        let recorder = MockSessionRecorder::new();
        let lifecycle = Arc::new(lifecycle_with(valid_raw(), &recorder, None));
        lifecycle.start().await.unwrap();

        let waiter = {
            let lifecycle = Arc::clone(&lifecycle);
            tokio::spawn(async move { lifecycle.wait_for_shutdown().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        lifecycle.stop().await;
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish after stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_stop_releases_the_session() {
        let recorder = MockSessionRecorder::new();
        let lifecycle = lifecycle_with(valid_raw(), &recorder, None);
        lifecycle.start().await.unwrap();
        assert_eq!(recorder.sessions_dropped(), 0);

        lifecycle.stop().await;

        assert_eq!(recorder.sessions_ended(), 1);
        assert_eq!(recorder.sessions_dropped(), 1);
        assert!(!lifecycle.is_connected().await);
    }

    #[tokio::test]
    async fn test_after_startup_exits_when_connect_failed() {
        let recorder = MockSessionRecorder::new();
        let lifecycle = lifecycle_with(valid_raw(), &recorder, Some(FailingStep::Connect));

        assert!(lifecycle.start().await.is_err());
        assert_eq!(lifecycle.after_startup().await, AfterStartup::Exit);
    }

    #[tokio::test]
    async fn test_after_startup_waits_when_subscribe_failed() {
        let recorder = MockSessionRecorder::new();
        let lifecycle = lifecycle_with(valid_raw(), &recorder, Some(FailingStep::Subscribe));

        assert!(lifecycle.start().await.is_err());
        assert_eq!(lifecycle.after_startup().await, AfterStartup::AwaitShutdown);
    }

    #[tokio::test]
    async fn test_after_startup_waits_when_signal_arrived_during_connect() {
        let recorder = MockSessionRecorder::new();
        let factory_recorder = recorder.clone();
        let lifecycle = Arc::new(SessionLifecycle::new(valid_raw(), move || {
            MockSessionClient::with_recorder(factory_recorder.clone())
                .with_failure(FailingStep::Connect)
                .with_connect_delay(Duration::from_millis(100))
        }));

        let stopper = {
            let lifecycle = Arc::clone(&lifecycle);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                lifecycle.stop().await
            })
        };

        assert!(lifecycle.start().await.is_err());
        assert_eq!(lifecycle.after_startup().await, AfterStartup::AwaitShutdown);
        assert_eq!(stopper.await.unwrap(), ShutdownOutcome::NoActiveSession);
    }

    #[tokio::test]
    async fn test_run_returns_immediately_on_config_error() {
        let recorder = MockSessionRecorder::new();
        let lifecycle = lifecycle_with(HashMap::new(), &recorder, None);

        let result = tokio::time::timeout(Duration::from_secs(1), lifecycle.run())
            .await
            .expect("run should not wait without a session");
        assert!(matches!(result, Err(LifecycleError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_run_waits_for_stop_then_reports_partial_failure() {
        let recorder = MockSessionRecorder::new();
        let lifecycle = Arc::new(lifecycle_with(valid_raw(), &recorder, Some(FailingStep::Publish)));

        let runner = {
            let lifecycle = Arc::clone(&lifecycle);
            tokio::spawn(async move { lifecycle.run().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!runner.is_finished());

        assert_eq!(lifecycle.stop().await, ShutdownOutcome::SessionEnded);
        let result = tokio::time::timeout(Duration::from_secs(1), runner)
            .await
            .expect("run should finish after stop")
            .unwrap();
        assert!(matches!(
            result,
            Err(LifecycleError::Session(SessionError::PublishFailed(_)))
        ));
    }

    #[tokio::test]
    async fn test_run_treats_shutdown_during_startup_as_success() {
        let recorder = MockSessionRecorder::new();
        let lifecycle = lifecycle_with(valid_raw(), &recorder, None);

        lifecycle.stop().await;
        assert!(lifecycle.run().await.is_ok());
    }
}
