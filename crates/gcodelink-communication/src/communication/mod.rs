//! Byte-stream channels
//!
//! A [`Channel`] is the narrow contract the protocol layer depends on:
//! open, close, write one line, read one line before a deadline. TCP and
//! serial transports both frame their byte stream with [`stream::LineStream`].

pub mod serial;
pub mod stream;
pub mod tcp;

pub use serial::SerialChannel;
pub use stream::{LineStream, StreamChannel};
pub use tcp::TcpChannel;

use async_trait::async_trait;
use gcodelink_core::{ConnectionError, Result};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Transport used to reach the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionDriver {
    /// TCP/IP socket
    #[default]
    Tcp,
    /// Serial/USB port
    Serial,
}

impl std::fmt::Display for ConnectionDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Serial => write!(f, "serial"),
        }
    }
}

/// Serial parity setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    /// No parity bit
    #[default]
    None,
    /// Even parity
    Even,
    /// Odd parity
    Odd,
}

/// Parameters needed to open a channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Transport type
    pub driver: ConnectionDriver,
    /// Hostname (TCP) or port name (serial, e.g. "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// TCP port number
    pub network_port: u16,
    /// Serial baud rate
    pub baud_rate: u32,
    /// Serial data bits (5-8)
    pub data_bits: u8,
    /// Serial stop bits (1 or 2)
    pub stop_bits: u8,
    /// Serial parity
    pub parity: SerialParity,
    /// Hardware (RTS/CTS) flow control
    pub flow_control: bool,
    /// Maximum time to establish the connection
    pub timeout_ms: u64,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            driver: ConnectionDriver::Tcp,
            port: "localhost".to_string(),
            network_port: 23,
            baud_rate: 115200,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            flow_control: false,
            timeout_ms: 5000,
        }
    }
}

impl ConnectionParams {
    /// Parameters for a TCP connection
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            driver: ConnectionDriver::Tcp,
            port: host.into(),
            network_port: port,
            ..Default::default()
        }
    }

    /// Parameters for a serial connection
    pub fn serial(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            driver: ConnectionDriver::Serial,
            port: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Human readable target, used in logs and errors
    pub fn target(&self) -> String {
        match self.driver {
            ConnectionDriver::Tcp => format!("{}:{}", self.port, self.network_port),
            ConnectionDriver::Serial => format!("{}@{}", self.port, self.baud_rate),
        }
    }

    /// Validate the parameters for the selected driver
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| -> Result<()> {
            Err(ConnectionError::InvalidParameters {
                reason: reason.to_string(),
            }
            .into())
        };

        if self.port.trim().is_empty() {
            return invalid("port/host must not be empty");
        }

        match self.driver {
            ConnectionDriver::Tcp => {
                if self.network_port == 0 {
                    return invalid("TCP port must be > 0");
                }
            }
            ConnectionDriver::Serial => {
                if self.baud_rate == 0 {
                    return invalid("baud rate must be > 0");
                }
                if !(5..=8).contains(&self.data_bits) {
                    return invalid("data bits must be between 5 and 8");
                }
                if !(1..=2).contains(&self.stop_bits) {
                    return invalid("stop bits must be 1 or 2");
                }
            }
        }

        Ok(())
    }
}

/// Line-oriented byte-stream channel
///
/// Lines are written with a trailing `\n`. Lines read back are stripped of
/// surrounding whitespace and blank lines are skipped.
#[async_trait]
pub trait Channel: Send {
    /// Open the underlying transport
    async fn connect(&mut self) -> Result<()>;

    /// Close the transport. Closing an already closed channel is not an error.
    async fn disconnect(&mut self) -> Result<()>;

    /// Check if the transport is open
    fn is_connected(&self) -> bool;

    /// Write one line
    async fn write_line(&mut self, line: &str) -> Result<()>;

    /// Read the next line, or `None` once `deadline` has passed
    async fn read_line(&mut self, deadline: Instant) -> Result<Option<String>>;

    /// Drop reply data already received but not yet read as a line
    fn discard_buffered(&mut self) -> Vec<String>;

    /// Name used in logs
    fn name(&self) -> String;
}

/// Create a channel for the given parameters
///
/// The channel is not opened; call [`Channel::connect`].
pub fn open_channel(params: &ConnectionParams) -> Result<Box<dyn Channel>> {
    params.validate()?;
    Ok(match params.driver {
        ConnectionDriver::Tcp => Box::new(TcpChannel::new(params.clone())),
        ConnectionDriver::Serial => Box::new(SerialChannel::new(params.clone())),
    })
}
