// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervisor-side handle to the forked controller.
//!
//! The controller runs in a child process created by re-executing the
//! current binary with the hidden `controller` subcommand; its
//! stdin/stdout are the RPC pipe. Calls are matched to replies by id;
//! unsolicited events are surfaced as a [`GatewayEvent`] stream.

use crate::protocol::wire::{self, ProtocolError};
use crate::protocol::{Call, ChildMessage, EventMessage, Method, RemoteError, ReplyValue};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tend_core::State;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The controller raised; message, context chain and traceback detail
    /// come along.
    #[error(transparent)]
    Remote(RemoteError),

    #[error("controller process is gone")]
    ChildGone,

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("unexpected reply shape")]
    UnexpectedReply,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Asynchronous notifications surfaced by the reader task.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// Aggregate `name -> state` snapshot from the controller.
    StateChange(IndexMap<String, State>),
    /// The controller wants a restart (change detector fired).
    Restart,
    /// The pipe reached EOF: the child exited or is exiting.
    Closed,
}

type PendingMap = HashMap<u64, oneshot::Sender<Result<ReplyValue, RemoteError>>>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Parent-side RPC handle onto the controller child.
pub struct Gateway {
    writer: tokio::sync::Mutex<BoxedWriter>,
    /// `None` once the pipe is closed; dropping a pending sender wakes
    /// its caller with `ChildGone`.
    pending: Arc<Mutex<Option<PendingMap>>>,
    next_call_id: AtomicU64,
    child: Option<Child>,
    reader_task: Option<JoinHandle<()>>,
}

impl Gateway {
    /// Launch the controller child: re-execute `binary` with the hidden
    /// `controller` subcommand, stdin/stdout piped. The embedding binary
    /// must route that subcommand to
    /// [`run_controller`](crate::controller::run_controller).
    pub fn spawn(
        binary: &Path,
        conf: &Path,
        autoreload: bool,
    ) -> Result<(Self, mpsc::UnboundedReceiver<GatewayEvent>), GatewayError> {
        let mut command = Command::new(binary);
        command.arg("controller").arg("--conf").arg(conf);
        if autoreload {
            command.arg("--autoreload");
        }
        command.stdin(Stdio::piped()).stdout(Stdio::piped());
        let mut child = command.spawn()?;
        let stdin = child.stdin.take().ok_or(GatewayError::ChildGone)?;
        let stdout = child.stdout.take().ok_or(GatewayError::ChildGone)?;
        info!(pid = child.id(), "controller forked");
        Ok(Self::over(stdout, stdin, Some(child)))
    }

    /// Build a gateway over an existing pipe pair. Used directly by tests
    /// that run the controller loop in-process.
    pub fn over(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
        child: Option<Child>,
    ) -> (Self, mpsc::UnboundedReceiver<GatewayEvent>) {
        let pending: Arc<Mutex<Option<PendingMap>>> = Arc::new(Mutex::new(Some(HashMap::new())));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let reader_task = tokio::spawn(read_child(reader, Arc::clone(&pending), event_tx));
        (
            Self {
                writer: tokio::sync::Mutex::new(Box::new(writer)),
                pending,
                next_call_id: AtomicU64::new(0),
                child,
                reader_task: Some(reader_task),
            },
            event_rx,
        )
    }

    pub async fn start(&self) -> Result<(), GatewayError> {
        self.call(Method::Start).await.map(|_| ())
    }

    pub async fn pause(&self) -> Result<(), GatewayError> {
        self.call(Method::Pause).await.map(|_| ())
    }

    pub async fn stop(&self) -> Result<(), GatewayError> {
        self.call(Method::Stop).await.map(|_| ())
    }

    pub async fn service_states(&self) -> Result<IndexMap<String, State>, GatewayError> {
        match self.call(Method::ServiceStates).await? {
            ReplyValue::States(states) => Ok(states),
            ReplyValue::Unit => Err(GatewayError::UnexpectedReply),
        }
    }

    /// Stop the child's event loop and reap it. Tolerates a child that is
    /// already on its way down.
    pub async fn kill(&mut self) -> Result<Option<std::process::ExitStatus>, GatewayError> {
        match self.call(Method::Kill).await {
            Ok(_) | Err(GatewayError::ChildGone) => {}
            Err(e) => warn!(error = %e, "kill call failed"),
        }
        self.reap().await
    }

    /// Wait for the child and return its exit status; `None` when there
    /// is no child (or it was already reaped).
    pub async fn reap(&mut self) -> Result<Option<std::process::ExitStatus>, GatewayError> {
        match self.child.take() {
            Some(mut child) => {
                let status = child.wait().await?;
                info!(%status, "controller reaped");
                Ok(Some(status))
            }
            None => Ok(None),
        }
    }

    /// Wait for the reader task to drain after the child has exited.
    pub async fn join_reader(&mut self) {
        if let Some(task) = self.reader_task.take() {
            let _ = task.await;
        }
    }

    async fn call(&self, method: Method) -> Result<ReplyValue, GatewayError> {
        let id = self.next_call_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            match pending.as_mut() {
                Some(map) => {
                    map.insert(id, tx);
                }
                None => return Err(GatewayError::ChildGone),
            }
        }
        debug!(id, ?method, "sending call");
        let written = {
            let mut writer = self.writer.lock().await;
            wire::write_frame(&mut *writer, &Call { id, method }).await
        };
        if let Err(e) = written {
            if let Some(map) = self.pending.lock().as_mut() {
                map.remove(&id);
            }
            return Err(match e {
                ProtocolError::Io(_) | ProtocolError::ConnectionClosed => GatewayError::ChildGone,
                other => other.into(),
            });
        }
        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(remote)) => Err(GatewayError::Remote(remote)),
            Err(_) => Err(GatewayError::ChildGone),
        }
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        // Safety net: never leave an orphaned controller behind.
        if let Some(child) = &self.child {
            if let Some(pid) = child.id() {
                warn!(pid, "gateway dropped with live controller, sending SIGTERM");
                let _ = nix::sys::signal::kill(
                    nix::unistd::Pid::from_raw(pid as i32),
                    nix::sys::signal::Signal::SIGTERM,
                );
            }
        }
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
    }
}

/// Reader task: demultiplex replies and events until the pipe closes.
async fn read_child(
    mut reader: impl AsyncRead + Send + Unpin + 'static,
    pending: Arc<Mutex<Option<PendingMap>>>,
    events: mpsc::UnboundedSender<GatewayEvent>,
) {
    loop {
        match wire::read_frame::<_, ChildMessage>(&mut reader).await {
            Ok(ChildMessage::Reply(reply)) => {
                let sender = {
                    let mut pending = pending.lock();
                    pending.as_mut().and_then(|map| map.remove(&reply.id))
                };
                match sender {
                    Some(tx) => {
                        let _ = tx.send(reply.result);
                    }
                    None => warn!(id = reply.id, "reply for unknown call"),
                }
            }
            Ok(ChildMessage::Event(EventMessage::StateChange { states })) => {
                let _ = events.send(GatewayEvent::StateChange(states));
            }
            Ok(ChildMessage::Event(EventMessage::Restart)) => {
                let _ = events.send(GatewayEvent::Restart);
            }
            // The frame was fully consumed; an undecodable payload does
            // not desynchronize the stream.
            Err(ProtocolError::Json(e)) => {
                warn!(error = %e, "undecodable message from controller");
            }
            Err(ProtocolError::ConnectionClosed) => {
                debug!("controller pipe closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "pipe read failed");
                break;
            }
        }
    }
    // Wake every pending caller with ChildGone, refuse new calls.
    *pending.lock() = None;
    let _ = events.send(GatewayEvent::Closed);
}

#[cfg(test)]
#[path = "gateway_tests.rs"]
mod tests;
