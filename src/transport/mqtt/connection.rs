//! Pure connection state management for the MQTT session
//!
//! This module contains the session state machine, the error taxonomy of the
//! session layer, and the translation of [`ConnectionSettings`] into
//! `rumqttc` options.

use crate::config::ConnectionSettings;
use crate::protocol::TopicError;
use rumqttc::v5::MqttOptions;
use rumqttc::{TlsConfiguration, Transport as RumqttcTransport};
use std::time::Duration;
use thiserror::Error;

/// Prefix of client ids generated when none is configured
pub const GENERATED_CLIENT_ID_PREFIX: &str = "mqtt-sample";

/// Capacity of the request channel between the client handle and its event loop
pub const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Smallest keep-alive the engine accepts
pub const MIN_KEEP_ALIVE_SECS: u16 = 5;

/// Session state machine: `Idle -> Connecting -> Connected -> Ended`.
///
/// `Ended` is terminal. A failed connect returns to `Idle`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed, or a connect attempt failed
    #[default]
    Idle,
    /// Waiting for the broker to acknowledge the connection
    Connecting,
    /// Acknowledged by the broker; subscribe and publish are allowed
    Connected,
    /// Gracefully disconnected; no further transitions
    Ended,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Ended)
    }

    pub fn can_connect(&self) -> bool {
        matches!(self, SessionState::Idle)
    }

    pub fn can_subscribe(&self) -> bool {
        matches!(self, SessionState::Connected)
    }

    pub fn can_publish(&self) -> bool {
        matches!(self, SessionState::Connected)
    }
}

/// Session layer errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),
    #[error("Publishing failed: {0}")]
    PublishFailed(String),
    #[error("Cannot {operation} while session is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
    #[error("Invalid topic: {0}")]
    InvalidTopic(#[from] TopicError),
}

impl SessionError {
    pub fn invalid_state(operation: &'static str, state: SessionState) -> Self {
        Self::InvalidState { operation, state }
    }
}

/// TLS material read from the configured files, handed to the engine as-is
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TlsMaterial {
    pub ca: Option<Vec<u8>>,
    pub client_auth: Option<(Vec<u8>, Vec<u8>)>,
}

impl TlsMaterial {
    /// Read the CA and client certificate files named in the settings
    pub async fn load(settings: &ConnectionSettings) -> Result<Self, SessionError> {
        let ca = if settings.ca_file.is_empty() {
            None
        } else {
            Some(read_file(&settings.ca_file).await?)
        };

        let client_auth = if settings.has_client_auth() {
            let cert = read_file(&settings.cert_file).await?;
            let key = read_file(&settings.key_file).await?;
            Some((cert, key))
        } else {
            None
        };

        Ok(Self { ca, client_auth })
    }
}

async fn read_file(path: &str) -> Result<Vec<u8>, SessionError> {
    tokio::fs::read(path)
        .await
        .map_err(|e| SessionError::ConnectionFailed(format!("Failed to read {path}: {e}")))
}

/// Client id to present to the broker; the engine rejects empty ids
pub fn effective_client_id(settings: &ConnectionSettings) -> String {
    if settings.client_id.is_empty() {
        format!("{GENERATED_CLIENT_ID_PREFIX}-{}", uuid::Uuid::new_v4())
    } else {
        settings.client_id.clone()
    }
}

/// Pick the network transport for the settings
pub fn select_transport(settings: &ConnectionSettings, tls: TlsMaterial) -> RumqttcTransport {
    if !settings.use_tls {
        return RumqttcTransport::Tcp;
    }

    match tls.ca {
        Some(ca) => RumqttcTransport::Tls(TlsConfiguration::Simple {
            ca,
            alpn: None,
            client_auth: tls.client_auth,
        }),
        None => {
            if tls.client_auth.is_some() {
                tracing::warn!(
                    "Client certificate configured without MQTT_CA_FILE; using default TLS roots without client auth"
                );
            }
            RumqttcTransport::tls_with_default_config()
        }
    }
}

/// Pure function to configure MQTT options from resolved settings.
///
/// Keep-alive values below [`MIN_KEEP_ALIVE_SECS`] are rejected here; the
/// engine asserts on them.
pub fn configure_mqtt_options(
    settings: &ConnectionSettings,
    client_id: &str,
    transport: RumqttcTransport,
) -> Result<MqttOptions, SessionError> {
    if settings.keep_alive_seconds < MIN_KEEP_ALIVE_SECS {
        return Err(SessionError::ConnectionFailed(format!(
            "Keep-alive must be at least {MIN_KEEP_ALIVE_SECS} s, got {} s",
            settings.keep_alive_seconds
        )));
    }

    let mut mqtt_options = MqttOptions::new(client_id, &settings.hostname, settings.tcp_port);

    mqtt_options.set_keep_alive(Duration::from_secs(u64::from(settings.keep_alive_seconds)));
    mqtt_options.set_clean_start(settings.clean_session);

    if settings.has_credentials() {
        mqtt_options.set_credentials(&settings.username, &settings.password);
    }

    mqtt_options.set_transport(transport);
    Ok(mqtt_options)
}
