//! Sample application: session lifecycle and its signal wiring

pub mod lifecycle;
pub mod signals;

pub use lifecycle::{AfterStartup, LifecycleError, SessionLifecycle, ShutdownOutcome};
pub use signals::{handle_signal, spawn_signal_listener};
