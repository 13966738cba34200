//! Termination signal handling
//!
//! SIGINT and SIGTERM both request shutdown of the session lifecycle. The
//! lifecycle's shutdown latch makes repeated signals harmless.

use super::lifecycle::{SessionLifecycle, ShutdownOutcome};
use crate::transport::SessionClient;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tracing::info;

/// Log the signal and stop the lifecycle
pub async fn handle_signal<C>(lifecycle: &SessionLifecycle<C>, signal_name: &str) -> ShutdownOutcome
where
    C: SessionClient + 'static,
{
    info!("{} received: ending the session and exiting the sample...", signal_name);
    lifecycle.stop().await
}

/// Install SIGINT and SIGTERM handlers that stop the lifecycle.
///
/// Handlers are installed before this returns, so a signal delivered
/// afterwards never takes the default terminate action.
pub fn spawn_signal_listener<C>(
    lifecycle: Arc<SessionLifecycle<C>>,
) -> std::io::Result<JoinHandle<()>>
where
    C: SessionClient + 'static,
{
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        loop {
            let signal_name = tokio::select! {
                received = sigint.recv() => match received {
                    Some(()) => "SIGINT",
                    None => break,
                },
                received = sigterm.recv() => match received {
                    Some(()) => "SIGTERM",
                    None => break,
                },
            };
            handle_signal(&lifecycle, signal_name).await;
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockSessionClient, MockSessionRecorder};
    use std::collections::HashMap;

    fn mock_lifecycle(recorder: &MockSessionRecorder) -> SessionLifecycle<MockSessionClient> {
        let raw: HashMap<String, String> =
            [("MQTT_HOST_NAME".to_string(), "broker.test".to_string())].into();
        let recorder = recorder.clone();
        SessionLifecycle::new(raw, move || {
            MockSessionClient::with_recorder(recorder.clone())
        })
    }

    #[tokio::test]
    async fn test_repeated_signals_end_session_once() {
        let recorder = MockSessionRecorder::new();
        let lifecycle = mock_lifecycle(&recorder);
        lifecycle.start().await.unwrap();

        assert_eq!(
            handle_signal(&lifecycle, "SIGINT").await,
            ShutdownOutcome::SessionEnded
        );
        assert_eq!(
            handle_signal(&lifecycle, "SIGTERM").await,
            ShutdownOutcome::SessionEnded
        );
        assert_eq!(recorder.sessions_ended(), 1);
    }

    #[tokio::test]
    async fn test_signal_before_connect_is_noop() {
        let recorder = MockSessionRecorder::new();
        let lifecycle = mock_lifecycle(&recorder);

        assert_eq!(
            handle_signal(&lifecycle, "SIGINT").await,
            ShutdownOutcome::NoActiveSession
        );
        assert_eq!(recorder.sessions_ended(), 0);
    }

    #[tokio::test]
    async fn test_listener_installs_and_aborts() {
        let recorder = MockSessionRecorder::new();
        let lifecycle = Arc::new(mock_lifecycle(&recorder));

        let handle = spawn_signal_listener(Arc::clone(&lifecycle)).unwrap();
        assert!(!handle.is_finished());

        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
        assert!(!lifecycle.is_stopping());
    }
}
