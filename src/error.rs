//! Crate-level error type
//!
//! Wraps the errors of each layer so the binary can report any failure through
//! one type and decide whether it is worth exiting over.

use crate::app::LifecycleError;
use crate::config::ConfigError;
use thiserror::Error;

/// Main error type for sample operations
#[derive(Debug, Error)]
pub enum SampleError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Signal handling error: {0}")]
    Signal(#[from] std::io::Error),

    #[error("Failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),
}

pub type SampleResult<T> = Result<T, SampleError>;

impl SampleError {
    /// Configuration problems cannot be fixed by waiting; session problems are
    /// reported and the sample keeps waiting for a termination signal
    pub fn is_fatal(&self) -> bool {
        match self {
            SampleError::Config(_) | SampleError::Signal(_) | SampleError::Render(_) => true,
            SampleError::Lifecycle(LifecycleError::Configuration(_)) => true,
            SampleError::Lifecycle(_) => false,
        }
    }
}
