//! Error types for the settings crate.

use std::io;
use thiserror::Error;

/// Errors that can occur while loading, saving or applying a configuration.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// The file extension is neither `.json` nor `.toml`.
    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),

    /// A configuration value is invalid.
    #[error("Invalid setting '{key}': {reason}")]
    InvalidSetting { key: String, reason: String },

    /// The configuration directory could not be determined.
    #[error("Config directory error: {0}")]
    ConfigDirectory(String),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// TOML deserialization error.
    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("TOML error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    /// A template or pattern was rejected by the registry.
    #[error(transparent)]
    Driver(#[from] gcodelink_core::Error),
}

impl SettingsError {
    pub(crate) fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSetting {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

impl From<SettingsError> for gcodelink_core::Error {
    fn from(err: SettingsError) -> Self {
        match err {
            SettingsError::Driver(e) => e,
            SettingsError::IoError(e) => gcodelink_core::Error::Io(e),
            other => gcodelink_core::Error::other(other.to_string()),
        }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
