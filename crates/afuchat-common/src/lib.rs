//! # AfuChat Common
//!
//! Shared error types, logging configuration and timing utilities for the
//! AfuChat offline worker crates.
//!
//! ## Features
//!
//! - Unified error type with categories
//! - Logging configuration and setup
//! - Timeout helper for bounded network waits
//! - Injectable clock for cache expiration

use std::time::Duration;
use thiserror::Error;

pub mod clock;
pub mod logging;
pub mod timeout;

pub use clock::{Clock, ManualClock, SystemClock};
pub use logging::{init_logging, LogConfig, LogFormat};
pub use timeout::with_timeout;

/// Unified error type for AfuChat crates.
#[derive(Error, Debug)]
pub enum AfuError {
    /// Configuration errors.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Timeout errors.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl AfuError {
    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config error with source.
    pub fn config_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Get the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            AfuError::Config { .. } => "config",
            AfuError::Io(_) => "io",
            AfuError::Timeout(_) => "timeout",
            AfuError::InvalidArgument(_) => "invalid_argument",
        }
    }
}

/// Result type alias for AfuChat operations.
pub type Result<T> = std::result::Result<T, AfuError>;

/// Extension trait for Result.
pub trait ResultExt<T> {
    /// Wrap an error as a config error with context.
    fn context(self, message: impl Into<String>) -> Result<T>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| AfuError::config_with_source(message, e))
    }
}
