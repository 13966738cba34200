//! MQTT Sample - Rust Implementation
//!
//! A getting-started MQTT 5 client: it resolves connection settings from a
//! key-value configuration, opens one session, subscribes to `sample/+`,
//! publishes `Hello World!` to `sample/topic1`, and ends the session
//! gracefully when the process receives SIGINT or SIGTERM.
//!
//! # Overview
//!
//! - [`config`] - Configuration mapping and settings resolution
//! - [`protocol`] - Fixed topics and topic validation
//! - [`transport`] - The [`SessionClient`] seam and its MQTT implementation
//! - [`app`] - Startup and shutdown sequencing plus signal wiring
//! - [`observability`] - Structured logging
//!
//! # Quick Start
//!
//! ```rust
//! use mqtt_sample::config::resolve;
//! use std::collections::HashMap;
//!
//! let raw: HashMap<String, String> =
//!     [("MQTT_HOST_NAME".to_string(), "broker.example.com".to_string())].into();
//!
//! let settings = resolve(&raw).unwrap();
//! assert_eq!(settings.tcp_port, 8883);
//! assert!(settings.use_tls);
//! ```

pub mod app;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod testing;
pub mod transport;

pub use app::{LifecycleError, SessionLifecycle, ShutdownOutcome};
pub use config::{resolve, ConfigError, ConnectionSettings, RawConfig};
pub use error::{SampleError, SampleResult};
pub use protocol::*;
pub use transport::mqtt::MqttSessionClient;
pub use transport::{SessionClient, SessionError, SessionState};
