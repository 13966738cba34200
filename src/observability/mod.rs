//! Observability for the sample: structured logging through `tracing`.

pub mod logging;

// Re-export for convenience
pub use logging::{init_logging, init_with_settings, LogFormat, LogSettings};

// Span macros for structured logging
pub use logging::{lifecycle_span, session_span};
