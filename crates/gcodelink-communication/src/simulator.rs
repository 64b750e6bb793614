//! Scripted G-code server
//!
//! A TCP listener on the loopback interface that answers configured command
//! lines with canned responses. Used to exercise a driver dialect without
//! hardware. Commands without a configured response get no reply at all,
//! which is how a hung controller looks from the driver's side.

use gcodelink_core::{ConnectionError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Something the server observed, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// A command line arrived
    Received(String),
    /// The response to a command is being written
    Replied(String),
}

#[derive(Default)]
struct ServerState {
    responses: HashMap<String, String>,
    events: Vec<ServerEvent>,
    delay: Duration,
}

/// Scripted loopback G-code server
pub struct GcodeServer {
    port: u16,
    state: Arc<Mutex<ServerState>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl GcodeServer {
    /// Bind to an ephemeral loopback port and start accepting connections
    pub async fn bind() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await.map_err(|e| {
            ConnectionError::FailedToOpen {
                target: "127.0.0.1:0".to_string(),
                reason: e.to_string(),
            }
        })?;
        let port = listener.local_addr()?.port();
        let state = Arc::new(Mutex::new(ServerState::default()));
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let accept_state = state.clone();
        let task = tokio::spawn(async move {
            let mut connections: Vec<JoinHandle<()>> = Vec::new();
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    accepted = listener.accept() => match accepted {
                        Ok((socket, peer)) => {
                            tracing::debug!("GcodeServer accepted {}", peer);
                            connections.push(tokio::spawn(serve(socket, accept_state.clone())));
                        }
                        Err(e) => {
                            tracing::warn!("GcodeServer accept failed: {}", e);
                            break;
                        }
                    },
                }
            }
            for connection in connections {
                connection.abort();
            }
        });

        tracing::debug!("GcodeServer listening on 127.0.0.1:{}", port);
        Ok(Self {
            port,
            state,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    /// Port the server is listening on
    pub fn listener_port(&self) -> u16 {
        self.port
    }

    /// Answer `command` with `response`
    ///
    /// `response` may span several lines separated by `\n`.
    pub fn add_command_response(&self, command: impl Into<String>, response: impl Into<String>) {
        self.state
            .lock()
            .responses
            .insert(command.into(), response.into());
    }

    /// Wait this long before writing each response
    pub fn set_response_delay(&self, delay: Duration) {
        self.state.lock().delay = delay;
    }

    /// Commands received so far, in arrival order
    pub fn received(&self) -> Vec<String> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|event| match event {
                ServerEvent::Received(command) => Some(command.clone()),
                ServerEvent::Replied(_) => None,
            })
            .collect()
    }

    /// Everything the server observed, in order
    pub fn events(&self) -> Vec<ServerEvent> {
        self.state.lock().events.clone()
    }

    /// Stop accepting and drop all open connections
    pub async fn shutdown(mut self) {
        self.stop().await;
    }

    async fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for GcodeServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Serve one connection
///
/// Reading and replying run separately so that a command arriving while a
/// previous reply is still pending is logged at the moment it arrives.
async fn serve(socket: TcpStream, state: Arc<Mutex<ServerState>>) {
    let (read, write) = socket.into_split();
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let responder = tokio::spawn(respond(write, rx, state.clone()));

    let mut lines = BufReader::new(read).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let command = line.trim().to_string();
        if command.is_empty() {
            continue;
        }
        state.lock().events.push(ServerEvent::Received(command.clone()));
        if tx.send(command).is_err() {
            break;
        }
    }
    drop(tx);
    let _ = responder.await;
}

async fn respond(
    mut write: OwnedWriteHalf,
    mut commands: mpsc::UnboundedReceiver<String>,
    state: Arc<Mutex<ServerState>>,
) {
    while let Some(command) = commands.recv().await {
        let (response, delay) = {
            let state = state.lock();
            (state.responses.get(&command).cloned(), state.delay)
        };
        let Some(response) = response else {
            tracing::debug!("GcodeServer has no response for '{}'", command);
            continue;
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        // logged before the write so the client cannot observe the reply first
        state.lock().events.push(ServerEvent::Replied(command));
        let mut payload = response.into_bytes();
        payload.push(b'\n');
        if write.write_all(&payload).await.is_err() {
            break;
        }
    }
}
