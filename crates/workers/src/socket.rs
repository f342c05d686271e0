// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A worker base serving TCP connections.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tend_core::Worker;
use tracing::{debug, warn};

/// How often the accept loop re-checks the shutdown flag.
const ACCEPT_POLL: Duration = Duration::from_millis(25);

/// Handles one accepted connection. Called on a per-connection thread;
/// errors are logged and do not affect the worker.
pub trait ConnectionHandler: Send + Sync + 'static {
    fn handle(&self, stream: TcpStream, peer: SocketAddr) -> anyhow::Result<()>;
}

impl<F> ConnectionHandler for F
where
    F: Fn(TcpStream, SocketAddr) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn handle(&self, stream: TcpStream, peer: SocketAddr) -> anyhow::Result<()> {
        self(stream, peer)
    }
}

/// A worker that binds a TCP listener on prepare and serves connections
/// between start and pause. The listener survives pauses; stop releases
/// it.
pub struct TcpServerWorker<H: ConnectionHandler> {
    addr: SocketAddr,
    handler: Arc<H>,
    listener: Option<TcpListener>,
    accepting: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl<H: ConnectionHandler> TcpServerWorker<H> {
    pub fn new(addr: SocketAddr, handler: H) -> Self {
        Self {
            addr,
            handler: Arc::new(handler),
            listener: None,
            accepting: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    /// The bound address; useful when constructed with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    fn join_accept_loop(&mut self) -> anyhow::Result<()> {
        self.accepting.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| anyhow::anyhow!("accept loop thread panicked"))?;
        }
        Ok(())
    }
}

impl<H: ConnectionHandler> Worker for TcpServerWorker<H> {
    fn prepare(&mut self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.addr)?;
        // Non-blocking so the accept loop can notice the shutdown flag.
        listener.set_nonblocking(true)?;
        self.listener = Some(listener);
        Ok(())
    }

    fn start(&mut self) -> anyhow::Result<()> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("listener not prepared"))?
            .try_clone()?;
        self.accepting.store(true, Ordering::SeqCst);
        let accepting = Arc::clone(&self.accepting);
        let handler = Arc::clone(&self.handler);
        self.thread = Some(
            std::thread::Builder::new()
                .name("tcp-accept".to_string())
                .spawn(move || accept_loop(&listener, &accepting, &handler))?,
        );
        Ok(())
    }

    fn pause(&mut self) -> anyhow::Result<()> {
        self.join_accept_loop()
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        self.join_accept_loop()?;
        self.listener = None;
        Ok(())
    }

    fn cleanup(&mut self, _cause: &anyhow::Error) {
        self.accepting.store(false, Ordering::SeqCst);
        self.thread = None;
        self.listener = None;
    }
}

fn accept_loop<H: ConnectionHandler>(
    listener: &TcpListener,
    accepting: &Arc<AtomicBool>,
    handler: &Arc<H>,
) {
    while accepting.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!(%peer, "connection accepted");
                // Handled connections may block; the stream reverts to
                // blocking mode for the handler's benefit.
                if let Err(e) = stream.set_nonblocking(false) {
                    warn!(%peer, error = %e, "failed to reset stream mode");
                    continue;
                }
                let handler = Arc::clone(handler);
                let spawned = std::thread::Builder::new()
                    .name("tcp-connection".to_string())
                    .spawn(move || {
                        if let Err(e) = handler.handle(stream, peer) {
                            warn!(%peer, error = %e, "connection handler failed");
                        }
                    });
                if let Err(e) = spawned {
                    warn!(%peer, error = %e, "failed to spawn connection thread");
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                warn!(error = %e, "accept failed");
                std::thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

#[cfg(test)]
#[path = "socket_tests.rs"]
mod tests;
