//! Error types for swreset.
//!
//! Only conditions that stop a run from starting, or that break the link to
//! the device, are errors. A prompt that never shows up, a rejected password
//! or a device-side error marker are ordinary outcomes and are reported
//! through the handler result enums instead.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for swreset operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for swreset operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Invalid or incomplete configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A mandatory configuration file does not exist.
    #[error("Configuration file not found: {}", path.display())]
    ConfigNotFound {
        /// Path that was looked up.
        path: PathBuf,
    },

    /// A configuration or statistics file could not be parsed.
    #[error("Invalid JSON in {}: {source}", path.display())]
    Json {
        /// File being parsed.
        path: PathBuf,
        /// Underlying parser error.
        source: serde_json::Error,
    },

    /// A console pattern is not a valid regular expression.
    #[error("Invalid pattern for {signal}: {source}")]
    Pattern {
        /// Logical signal the expression belongs to.
        signal: String,
        /// Underlying regex error.
        source: regex::Error,
    },

    /// A key combination is not valid hexadecimal.
    #[error("Invalid key combination '{id}': {source}")]
    Hex {
        /// Identifier of the combination.
        id: String,
        /// Underlying decode error.
        source: hex::FromHexError,
    },

    /// The channel was used after it had been closed.
    #[error("Channel is closed")]
    ChannelClosed,

    /// The operator side of an acknowledgment channel went away.
    #[error("Operator unavailable: {0}")]
    Operator(String),
}

impl Error {
    /// Whether the error is a startup (configuration) failure, as opposed to
    /// a failure of the link to the device.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::ConfigNotFound { .. }
                | Self::Json { .. }
                | Self::Pattern { .. }
                | Self::Hex { .. }
        )
    }
}
