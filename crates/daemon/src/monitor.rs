// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The TCP monitor: newline-terminated command verbs in, JSON state
//! snapshots out.
//!
//! The hub outlives server instances; each instance attaches on start and
//! detaches on exit, so monitor connections persist across reloads. Late
//! joiners get the most recent snapshot on connect.

use indexmap::IndexMap;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tend_core::State;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Lifecycle verbs a monitor client may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorCommand {
    Start,
    Pause,
    Stop,
    Restart,
}

/// Shared state between the accept loop, connections and the current
/// server instance.
#[derive(Clone)]
pub struct MonitorHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    addr: SocketAddr,
    /// Pre-serialized JSON frames (no trailing newline).
    frames: broadcast::Sender<String>,
    last_snapshot: Mutex<Option<String>>,
    commands: Mutex<Option<mpsc::UnboundedSender<MonitorCommand>>>,
}

impl MonitorHub {
    /// Bind the listener and start accepting monitor connections.
    pub async fn bind(addr: &str) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        info!(%addr, "monitor listening");
        let (frames, _) = broadcast::channel(64);
        let hub = Self {
            inner: Arc::new(HubInner {
                addr,
                frames,
                last_snapshot: Mutex::new(None),
                commands: Mutex::new(None),
            }),
        };
        tokio::spawn(accept_loop(listener, hub.clone()));
        Ok(hub)
    }

    pub fn addr(&self) -> SocketAddr {
        self.inner.addr
    }

    /// Route client commands to the current instance. Replaces any
    /// previous attachment.
    pub fn attach(&self) -> mpsc::UnboundedReceiver<MonitorCommand> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.commands.lock() = Some(tx);
        rx
    }

    /// Drop the current attachment; commands are discarded until the next
    /// instance attaches.
    pub fn detach(&self) {
        *self.inner.commands.lock() = None;
    }

    /// Broadcast a state snapshot and remember it for late joiners.
    pub fn publish_states(&self, states: &IndexMap<String, State>) {
        match serde_json::to_string(states) {
            Ok(line) => {
                *self.inner.last_snapshot.lock() = Some(line.clone());
                let _ = self.inner.frames.send(line);
            }
            Err(e) => warn!(error = %e, "failed to serialize state snapshot"),
        }
    }

    /// Broadcast a bare JSON string (`"reloading"` / `"shutting down"`).
    pub fn publish_literal(&self, word: &str) {
        match serde_json::to_string(word) {
            Ok(line) => {
                let _ = self.inner.frames.send(line);
            }
            Err(e) => warn!(error = %e, "failed to serialize literal"),
        }
    }

    fn send_command(&self, command: MonitorCommand) {
        match self.inner.commands.lock().as_ref() {
            Some(tx) => {
                let _ = tx.send(command);
            }
            None => debug!(?command, "no instance attached, dropping monitor command"),
        }
    }
}

async fn accept_loop(listener: TcpListener, hub: MonitorHub) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(%peer, "monitor connection");
                tokio::spawn(handle_connection(stream, hub.clone()));
            }
            Err(e) => {
                warn!(error = %e, "monitor accept failed");
                return;
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, hub: MonitorHub) {
    let (read_half, mut write_half) = stream.into_split();
    let mut frames = hub.inner.frames.subscribe();

    let initial = hub.inner.last_snapshot.lock().clone();
    if let Some(snapshot) = initial {
        if write_line(&mut write_half, &snapshot).await.is_err() {
            return;
        }
    }

    let mut lines = BufReader::new(read_half).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => match line.trim() {
                    "start" => hub.send_command(MonitorCommand::Start),
                    "pause" => hub.send_command(MonitorCommand::Pause),
                    "stop" => hub.send_command(MonitorCommand::Stop),
                    "restart" => hub.send_command(MonitorCommand::Restart),
                    "" => {}
                    other => warn!(command = other, "unrecognized monitor command"),
                },
                Ok(None) | Err(_) => return,
            },
            frame = frames.recv() => match frame {
                Ok(line) => {
                    if write_line(&mut write_half, &line).await.is_err() {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "monitor connection lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
        }
    }
}

async fn write_line(writer: &mut OwnedWriteHalf, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

#[cfg(test)]
#[path = "monitor_tests.rs"]
mod tests;
