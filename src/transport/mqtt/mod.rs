//! MQTT 5 session client built on `rumqttc`
//!
//! The module separates pure functions from I/O operations:
//!
//! - [`connection`] - Session state machine, errors and option building
//! - [`message_handler`] - Pure routing of event loop events
//! - [`client`] - Impure I/O operations and coordination
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_sample::config::RawConfig;
//! use mqtt_sample::transport::{mqtt::MqttSessionClient, SessionClient};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = RawConfig::layered(std::path::Path::new(".env"), false)?.resolve()?;
//!
//! let mut client = MqttSessionClient::new();
//! client.connect(&settings).await?;
//! client.subscribe("sample/+").await?;
//! client.publish("sample/topic1", "Hello World!").await?;
//! client.end_session().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::{LinkStatus, MqttSessionClient};
pub use connection::{
    configure_mqtt_options, effective_client_id, select_transport, SessionError, SessionState,
    TlsMaterial,
};
pub use message_handler::{EventRoute, MessageHandler};
