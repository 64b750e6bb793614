//! Line framing over an async byte stream
//!
//! Controllers frame replies with line breaks only. [`LineStream`] buffers
//! partial reads and hands out complete lines; bytes that arrive after the
//! last complete line are kept for the next read.

use super::Channel;
use async_trait::async_trait;
use gcodelink_core::{ConnectionError, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

const READ_CHUNK: usize = 256;

/// Async line reader/writer over any byte stream
pub struct LineStream<S> {
    stream: S,
    buffer: Vec<u8>,
}

impl<S> LineStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an open stream
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: Vec::with_capacity(READ_CHUNK),
        }
    }

    /// Write `line` followed by a newline and flush
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');

        self.stream
            .write_all(&data)
            .await
            .map_err(|e| io_error("write", e))?;
        self.stream.flush().await.map_err(|e| io_error("flush", e))?;
        Ok(())
    }

    /// Read the next non-blank line, or `None` if `deadline` passes first
    pub async fn read_line(&mut self, deadline: Instant) -> Result<Option<String>> {
        loop {
            if let Some(line) = self.take_line() {
                if line.is_empty() {
                    continue;
                }
                return Ok(Some(line));
            }

            let mut chunk = [0u8; READ_CHUNK];
            match tokio::time::timeout_at(deadline, self.stream.read(&mut chunk)).await {
                Err(_) => return Ok(None),
                Ok(Ok(0)) => {
                    return Err(ConnectionError::ConnectionLost {
                        reason: "stream closed by peer".to_string(),
                    }
                    .into())
                }
                Ok(Ok(n)) => self.buffer.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => return Err(io_error("read", e)),
            }
        }
    }

    /// Shut down the write half of the stream
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stream
            .shutdown()
            .await
            .map_err(|e| io_error("shutdown", e))
    }

    /// Drop everything already buffered, returning the discarded lines
    ///
    /// Only bytes already read from the stream are affected.
    pub fn discard_buffered(&mut self) -> Vec<String> {
        let mut stale = Vec::new();
        while let Some(line) = self.take_line() {
            if !line.is_empty() {
                stale.push(line);
            }
        }
        if self.pending_bytes() > 0 {
            let rest: Vec<u8> = self.buffer.drain(..).collect();
            let partial = String::from_utf8_lossy(&rest).trim().to_string();
            if !partial.is_empty() {
                stale.push(partial);
            }
        }
        stale
    }

    fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    fn take_line(&mut self) -> Option<String> {
        let pos = self.buffer.iter().position(|b| *b == b'\n')?;
        let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
        Some(String::from_utf8_lossy(&raw).trim().to_string())
    }
}

fn io_error(op: &str, e: std::io::Error) -> gcodelink_core::Error {
    match e.kind() {
        std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::UnexpectedEof => ConnectionError::ConnectionLost {
            reason: format!("{} failed: {}", op, e),
        }
        .into(),
        _ => ConnectionError::Io {
            reason: format!("{} failed: {}", op, e),
        }
        .into(),
    }
}

/// Channel over a stream that is already open
///
/// `connect` is a no-op while the stream is held; once disconnected the
/// channel cannot be reopened. Useful for in-memory pipes and adapters.
pub struct StreamChannel<S> {
    name: String,
    stream: Option<LineStream<S>>,
}

impl<S> StreamChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an open stream under the given log name
    pub fn new(name: impl Into<String>, stream: S) -> Self {
        Self {
            name: name.into(),
            stream: Some(LineStream::new(stream)),
        }
    }

    fn stream_mut(&mut self) -> Result<&mut LineStream<S>> {
        self.stream
            .as_mut()
            .ok_or_else(|| ConnectionError::NotConnected.into())
    }
}

#[async_trait]
impl<S> Channel for StreamChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn connect(&mut self) -> Result<()> {
        if self.stream.is_none() {
            return Err(ConnectionError::FailedToOpen {
                target: self.name.clone(),
                reason: "stream already closed".to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                tracing::warn!("Closing {}: {}", self.name, e);
            }
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
        self.name.clone()
    }
}
