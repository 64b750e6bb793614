//! Protocol session
//!
//! One exchange = write one command line, then collect reply lines until the
//! terminal marker (`ok`) arrives or the deadline passes. When a response
//! pattern is supplied, the first matching line provides the value. An error
//! line marks the exchange as rejected. In both cases the exchange still runs
//! until the terminal marker so trailing reply lines never bleed into the
//! next command.

use super::matcher::{MatchOutcome, ResponsePattern};
use crate::communication::Channel;
use gcodelink_core::{ConnectionError, ProtocolError, Result, TERMINAL_MARKER};
use std::time::Duration;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

/// Default response timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No exchange in flight
    Idle,
    /// Command written, collecting replies
    AwaitingReply,
    /// Exchange concluded; `true` on success
    Completed(bool),
}

/// Bookkeeping for the exchange in flight
#[derive(Debug)]
struct PendingExchange<'p> {
    id: Uuid,
    command: String,
    pattern: Option<&'p ResponsePattern>,
    deadline: Instant,
    lines: Vec<String>,
    matched: bool,
    value: Option<String>,
    rejection: Option<String>,
}

impl<'p> PendingExchange<'p> {
    fn new(command: &str, pattern: Option<&'p ResponsePattern>, timeout: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            command: command.to_string(),
            pattern,
            deadline: Instant::now() + timeout,
            lines: Vec::new(),
            matched: false,
            value: None,
            rejection: None,
        }
    }

    /// Record a non-terminal line; the first pattern match is retained
    fn accept(&mut self, line: String) {
        if let (Some(pattern), false) = (self.pattern, self.matched) {
            match pattern.match_line(&line) {
                MatchOutcome::Captured(value) => {
                    self.matched = true;
                    self.value = Some(value);
                    return;
                }
                MatchOutcome::Matched => {
                    self.matched = true;
                    return;
                }
                MatchOutcome::NoMatch => {}
            }
        }
        self.lines.push(line);
    }

    fn finish(self, terminal: String) -> ExchangeResult {
        ExchangeResult {
            command: self.command,
            pattern: self.pattern.map(|p| p.as_str().to_string()),
            terminal: Some(terminal),
            matched: self.matched,
            value: self.value,
            lines: self.lines,
        }
    }
}

/// Outcome of a concluded exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeResult {
    /// Command as written
    pub command: String,
    /// Response pattern applied, if any
    pub pattern: Option<String>,
    /// Terminal line seen
    pub terminal: Option<String>,
    /// Whether the response pattern matched a line
    pub matched: bool,
    /// Value captured by the first matching line
    pub value: Option<String>,
    /// Reply lines that were neither terminal nor the pattern match
    pub lines: Vec<String>,
}

impl ExchangeResult {
    /// Whether the exchange reached the terminal marker and, if a pattern
    /// was applied, matched it
    pub fn is_success(&self) -> bool {
        self.terminal.is_some() && (self.pattern.is_none() || self.matched)
    }

    /// Extracted value, or `NoMatch` if the pattern never matched
    ///
    /// A pattern without a `Value` group yields an empty string on match.
    pub fn into_value(self) -> Result<String> {
        if !self.matched {
            return Err(ProtocolError::NoMatch {
                command: self.command,
                pattern: self.pattern.unwrap_or_default(),
                lines: self.lines,
            }
            .into());
        }
        Ok(self.value.unwrap_or_default())
    }
}

/// Command/response state machine over one channel
pub struct ProtocolSession {
    channel: Box<dyn Channel>,
    state: SessionState,
    timeout: Duration,
    error_pattern: Option<ResponsePattern>,
}

impl ProtocolSession {
    /// Create a session over a channel
    pub fn new(channel: Box<dyn Channel>) -> Self {
        Self {
            channel,
            state: SessionState::Idle,
            timeout: DEFAULT_TIMEOUT,
            error_pattern: None,
        }
    }

    /// Set the response timeout, builder style
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Response timeout applied to each exchange
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Change the response timeout
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Pattern that marks a reply line as a command rejection
    pub fn set_error_pattern(&mut self, pattern: Option<ResponsePattern>) {
        self.error_pattern = pattern;
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Name of the underlying channel
    pub fn channel_name(&self) -> String {
        self.channel.name()
    }

    /// Check if the channel is open
    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    /// Open the channel
    pub async fn connect(&mut self) -> Result<()> {
        self.channel.connect().await
    }

    /// Close the channel; tolerates a channel that is already closed
    pub async fn disconnect(&mut self) -> Result<()> {
        self.state = SessionState::Idle;
        self.channel.disconnect().await
    }

    /// Send a command and wait for the terminal marker
    pub async fn send(&mut self, command: &str) -> Result<ExchangeResult> {
        self.exchange(command, None).await
    }

    /// Run one exchange
    ///
    /// With a pattern, the first matching line supplies the value; use
    /// [`ExchangeResult::into_value`] to turn a missed match into `NoMatch`.
    pub async fn exchange(
        &mut self,
        command: &str,
        pattern: Option<&ResponsePattern>,
    ) -> Result<ExchangeResult> {
        if !self.channel.is_connected() {
            return Err(ConnectionError::NotConnected.into());
        }

        let pending = PendingExchange::new(command, pattern, self.timeout);
        let span = tracing::debug_span!("exchange", id = %pending.id, command = %command);

        let result = self.run(pending).instrument(span).await;
        self.state = SessionState::Completed(result.is_ok());
        if let Err(e) = &result {
            tracing::error!("Exchange '{}' failed: {}", command, e);
        }
        self.state = SessionState::Idle;
        result
    }

    async fn run(&mut self, mut pending: PendingExchange<'_>) -> Result<ExchangeResult> {
        for stale in self.channel.discard_buffered() {
            tracing::warn!("Discarding stale reply '{}' before '{}'", stale, pending.command);
        }

        self.state = SessionState::AwaitingReply;
        tracing::debug!(">> {}", pending.command);
        self.channel.write_line(&pending.command).await?;

        loop {
            let line = match self.channel.read_line(pending.deadline).await? {
                Some(line) => line,
                None => {
                    if let Some(line) = pending.rejection {
                        return Err(ProtocolError::Rejected {
                            command: pending.command,
                            line,
                        }
                        .into());
                    }
                    return Err(ProtocolError::Timeout {
                        command: pending.command,
                        timeout_ms: self.timeout.as_millis() as u64,
                        lines: pending.lines,
                    }
                    .into());
                }
            };
            tracing::debug!("<< {}", line);

            if line == TERMINAL_MARKER {
                if let Some(line) = pending.rejection {
                    return Err(ProtocolError::Rejected {
                        command: pending.command,
                        line,
                    }
                    .into());
                }
                return Ok(pending.finish(line));
            }

            let is_error = self
                .error_pattern
                .as_ref()
                .is_some_and(|p| p.match_line(&line).is_match());
            if is_error && pending.rejection.is_none() {
                pending.rejection = Some(line);
                continue;
            }

            pending.accept(line);
        }
    }
}
