//! TCP/IP channel
//!
//! Connects to controllers exposing a raw G-code socket (ESP3D, FluidNC
//! telnet, Smoothieware network, or a serial-to-ethernet bridge).

use super::stream::LineStream;
use super::{Channel, ConnectionDriver, ConnectionParams};
use async_trait::async_trait;
use gcodelink_core::{ConnectionError, Result};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;

/// Channel over a TCP socket
pub struct TcpChannel {
    params: ConnectionParams,
    stream: Option<LineStream<TcpStream>>,
}

impl TcpChannel {
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

    fn stream_mut(&mut self) -> Result<&mut LineStream<TcpStream>> {
        self.stream
            .as_mut()
            .ok_or_else(|| ConnectionError::NotConnected.into())
    }
}

#[async_trait]
impl Channel for TcpChannel {
    async fn connect(&mut self) -> Result<()> {
        if self.params.driver != ConnectionDriver::Tcp {
            return Err(ConnectionError::InvalidParameters {
                reason: "TcpChannel requires Tcp driver type".to_string(),
            }
            .into());
        }
        if self.stream.is_some() {
            return Ok(());
        }

        let target = self.params.target();
        let timeout = Duration::from_millis(self.params.timeout_ms);
        let address = (self.params.port.as_str(), self.params.network_port);

        let socket = match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
            Err(_) => {
                return Err(ConnectionError::ConnectionTimeout {
                    timeout_ms: self.params.timeout_ms,
                }
                .into())
            }
            Ok(Err(e)) => {
                tracing::warn!("Failed to connect to {}: {}", target, e);
                return Err(ConnectionError::FailedToOpen {
                    target,
                    reason: e.to_string(),
                }
                .into());
            }
            Ok(Ok(socket)) => socket,
        };

        if let Err(e) = socket.set_nodelay(true) {
            tracing::debug!("Could not disable Nagle on {}: {}", target, e);
        }

        tracing::info!("Connected to {}", target);
        self.stream = Some(LineStream::new(socket));
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                tracing::warn!("Error closing {}: {}", self.params.target(), e);
            }
            tracing::info!("Disconnected from {}", self.params.target());
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
        format!("tcp:{}", self.params.target())
    }
}
