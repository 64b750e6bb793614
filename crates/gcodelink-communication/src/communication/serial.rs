//! Serial port channel
//!
//! Direct USB or RS-232 connection to a controller. Port settings come
//! from [`ConnectionParams`]; the async stream is provided by `tokio-serial`.

use super::stream::LineStream;
use super::{Channel, ConnectionDriver, ConnectionParams, SerialParity};
use async_trait::async_trait;
use gcodelink_core::{ConnectionError, Result};
use tokio::time::Instant;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

/// Convert a parity setting to serialport format
fn to_serialport_parity(parity: SerialParity) -> serialport::Parity {
    match parity {
        SerialParity::None => serialport::Parity::None,
        SerialParity::Even => serialport::Parity::Even,
        SerialParity::Odd => serialport::Parity::Odd,
    }
}

fn to_serialport_data_bits(bits: u8) -> Result<serialport::DataBits> {
    match bits {
        5 => Ok(serialport::DataBits::Five),
        6 => Ok(serialport::DataBits::Six),
        7 => Ok(serialport::DataBits::Seven),
        8 => Ok(serialport::DataBits::Eight),
        _ => Err(ConnectionError::InvalidParameters {
            reason: format!("Invalid data bits: {}", bits),
        }
        .into()),
    }
}

fn to_serialport_stop_bits(bits: u8) -> Result<serialport::StopBits> {
    match bits {
        1 => Ok(serialport::StopBits::One),
        2 => Ok(serialport::StopBits::Two),
        _ => Err(ConnectionError::InvalidParameters {
            reason: format!("Invalid stop bits: {}", bits),
        }
        .into()),
    }
}

/// Channel over a serial port
pub struct SerialChannel {
    params: ConnectionParams,
    stream: Option<LineStream<SerialStream>>,
}

impl SerialChannel {
    /// Create an unopened channel
    pub fn new(params: ConnectionParams) -> Self {
        Self {
            params,
            stream: None,
        }
    }

    /// Connection parameters
    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    fn stream_mut(&mut self) -> Result<&mut LineStream<SerialStream>> {
        self.stream
            .as_mut()
            .ok_or_else(|| ConnectionError::NotConnected.into())
    }
}

#[async_trait]
impl Channel for SerialChannel {
    async fn connect(&mut self) -> Result<()> {
        if self.params.driver != ConnectionDriver::Serial {
            return Err(ConnectionError::InvalidParameters {
                reason: "SerialChannel requires Serial driver type".to_string(),
            }
            .into());
        }
        if self.stream.is_some() {
            return Ok(());
        }

        let builder = tokio_serial::new(&self.params.port, self.params.baud_rate)
            .data_bits(to_serialport_data_bits(self.params.data_bits)?)
            .stop_bits(to_serialport_stop_bits(self.params.stop_bits)?)
            .parity(to_serialport_parity(self.params.parity))
            .flow_control(if self.params.flow_control {
                serialport::FlowControl::Hardware
            } else {
                serialport::FlowControl::None
            });

        match builder.open_native_async() {
            Ok(port) => {
                tracing::info!("Opened serial port {}", self.params.target());
                self.stream = Some(LineStream::new(port));
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Failed to open serial port {}: {}", self.params.port, e);
                Err(ConnectionError::FailedToOpen {
                    target: self.params.port.clone(),
                    reason: e.to_string(),
                }
                .into())
            }
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        if self.stream.take().is_some() {
            tracing::info!("Closed serial port {}", self.params.port);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        self.stream_mut()?.write_line(line).await
    }

    async fn read_line(&mut self, deadline: Instant) -> Result<Option<String>> {
        self.stream_mut()?.read_line(deadline).await
    }

    fn discard_buffered(&mut self) -> Vec<String> {
        self.stream
            .as_mut()
            .map(LineStream::discard_buffered)
            .unwrap_or_default()
    }

    fn name(&self) -> String {
        format!("serial:{}", self.params.target())
    }
}
