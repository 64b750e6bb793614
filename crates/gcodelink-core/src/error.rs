//! Error handling for GCodeLink
//!
//! Errors are grouped by where they originate:
//! - Configuration errors (missing or malformed templates and patterns)
//! - Protocol errors (the device answered, but not as configured, or not in time)
//! - Connection errors (the byte stream itself failed)
//!
//! Configuration errors are always raised before any bytes are written.

use crate::command::{CommandKind, Subject};
use thiserror::Error;

/// Configuration error type
///
/// Raised while registering or resolving templates and patterns.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// No template registered for the subject or as a global default
    #[error("No {kind} command configured for {subject}")]
    MissingCommand {
        /// Subject the command was resolved for.
        subject: Subject,
        /// Kind of the missing command.
        kind: CommandKind,
    },

    /// A read command has a template but no response pattern
    #[error("No {kind} response pattern configured for {subject}")]
    MissingPattern {
        /// Subject the pattern was resolved for.
        subject: Subject,
        /// Kind of the missing pattern.
        kind: CommandKind,
    },

    /// Pattern text does not compile
    #[error("Invalid response pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The rejected pattern text.
        pattern: String,
        /// Compiler diagnostic.
        reason: String,
    },

    /// A pattern was registered for a kind that never reads a value
    #[error("Command kind {kind} does not accept a response pattern")]
    PatternNotSupported {
        /// The non-read kind.
        kind: CommandKind,
    },

    /// Template placeholder syntax is malformed
    #[error("Invalid command template '{template}': {reason}")]
    InvalidTemplate {
        /// The rejected template text.
        template: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Templates and patterns may only change while the driver is disabled
    #[error("Command registry is locked while the driver is enabled")]
    RegistryLocked,
}

/// Protocol error type
///
/// Raised by an exchange that was sent but did not conclude as expected.
/// Carries the reply lines received so far for diagnostics.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Terminal marker arrived but the response pattern never matched
    #[error("Response to '{command}' did not match pattern '{pattern}': {lines:?}")]
    NoMatch {
        /// The command that was sent.
        command: String,
        /// The pattern that failed to match.
        pattern: String,
        /// Lines received before the terminal marker.
        lines: Vec<String>,
    },

    /// Neither the terminal marker nor an error line arrived in time
    #[error("Timeout after {timeout_ms}ms waiting for response to '{command}'")]
    Timeout {
        /// The command that was sent.
        command: String,
        /// The response deadline in milliseconds.
        timeout_ms: u64,
        /// Lines received before the deadline.
        lines: Vec<String>,
    },

    /// The device answered with a line matching the error pattern
    #[error("Command '{command}' rejected: {line}")]
    Rejected {
        /// The command that was sent.
        command: String,
        /// The error line reported by the device.
        line: String,
    },
}

/// Connection error type
///
/// Represents failures of the underlying byte stream (TCP socket or serial port).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Channel is not open
    #[error("Not connected")]
    NotConnected,

    /// Failed to open the transport
    #[error("Failed to open {target}: {reason}")]
    FailedToOpen {
        /// Address or port name.
        target: String,
        /// The reason the open failed.
        reason: String,
    },

    /// Connection attempt took too long
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// The peer closed the stream
    #[error("Connection lost: {reason}")]
    ConnectionLost {
        /// The reason the connection was lost.
        reason: String,
    },

    /// Read or write failure
    #[error("I/O error: {reason}")]
    Io {
        /// The underlying I/O diagnostic.
        reason: String,
    },

    /// Invalid connection parameters
    #[error("Invalid connection parameters: {reason}")]
    InvalidParameters {
        /// The reason the parameters are invalid.
        reason: String,
    },
}

/// Main error type for GCodeLink
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Protocol error
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::Protocol(ProtocolError::Timeout { .. })
                | Error::Connection(ConnectionError::ConnectionTimeout { .. })
        )
    }

    /// Check if this is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    /// Check if this is a protocol error
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }

    /// Check if this is a transport failure
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Io(_))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::MissingCommand {
            subject: Subject::named("A1"),
            kind: CommandKind::ActuatorRead,
        };
        assert_eq!(err.to_string(), "No actuator_read command configured for A1");

        let err = ConfigError::MissingPattern {
            subject: Subject::Global,
            kind: CommandKind::ActuatorRead,
        };
        assert_eq!(
            err.to_string(),
            "No actuator_read response pattern configured for global"
        );
    }

    #[test]
    fn test_error_classification() {
        let err: Error = ProtocolError::Timeout {
            command: "M400".to_string(),
            timeout_ms: 500,
            lines: vec![],
        }
        .into();
        assert!(err.is_timeout());
        assert!(err.is_protocol_error());
        assert!(!err.is_config_error());

        let err: Error = ConfigError::RegistryLocked.into();
        assert!(err.is_config_error());
        assert!(!err.is_timeout());

        let err: Error = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone").into();
        assert!(err.is_connection_error());
    }
}
