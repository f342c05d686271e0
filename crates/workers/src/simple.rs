// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A worker base that hides thread management behind a run loop.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tend_core::{ServiceHandle, Worker};

/// Shared running flag handed to the loop body.
#[derive(Clone, Default)]
pub struct LoopToken {
    running: Arc<AtomicBool>,
}

impl LoopToken {
    /// False once a pause or stop has been requested; the loop should
    /// return promptly when it observes this.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// The body of a [`SimpleWorker`].
///
/// `run` is called on a dedicated thread on every start and should loop
/// while `token.is_running()`:
///
/// ```no_run
/// # use tend_workers::{LoopToken, RunLoop};
/// struct Spammer;
///
/// impl RunLoop for Spammer {
///     fn run(&mut self, token: &LoopToken) -> anyhow::Result<()> {
///         while token.is_running() {
///             tracing::info!("spam");
///             std::thread::sleep(std::time::Duration::from_secs(1));
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait RunLoop: Send + 'static {
    fn run(&mut self, token: &LoopToken) -> anyhow::Result<()>;
}

impl<F> RunLoop for F
where
    F: FnMut(&LoopToken) -> anyhow::Result<()> + Send + 'static,
{
    fn run(&mut self, token: &LoopToken) -> anyhow::Result<()> {
        self(token)
    }
}

/// A simplified worker that runs a [`RunLoop`] on a thread between start
/// and pause. Errors returned by the loop flip the owning service to the
/// exception state.
pub struct SimpleWorker<L: RunLoop> {
    body: Arc<Mutex<L>>,
    token: LoopToken,
    thread: Option<JoinHandle<()>>,
    service: Option<ServiceHandle>,
}

impl<L: RunLoop> SimpleWorker<L> {
    pub fn new(body: L) -> Self {
        Self {
            body: Arc::new(Mutex::new(body)),
            token: LoopToken::default(),
            thread: None,
            service: None,
        }
    }

    fn halt(&mut self) -> anyhow::Result<()> {
        self.token.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| anyhow::anyhow!("run loop thread panicked"))?;
        }
        Ok(())
    }
}

impl<L: RunLoop> Worker for SimpleWorker<L> {
    fn attach(&mut self, service: ServiceHandle) {
        self.service = Some(service);
    }

    fn prepare(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn start(&mut self) -> anyhow::Result<()> {
        self.token.running.store(true, Ordering::SeqCst);
        let body = Arc::clone(&self.body);
        let token = self.token.clone();
        let service = self.service.clone();
        self.thread = Some(
            std::thread::Builder::new()
                .name("run-loop".to_string())
                .spawn(move || {
                    let result = body.lock().run(&token);
                    if let Err(e) = result {
                        // Reported from a detached thread: pause() joins
                        // this one while the service holds the worker, and
                        // set_exception needs the worker for cleanup.
                        match service {
                            Some(handle) => {
                                std::thread::spawn(move || handle.set_exception(e));
                            }
                            None => tracing::error!(error = %e, "unattached run loop failed"),
                        }
                    }
                })?,
        );
        Ok(())
    }

    fn pause(&mut self) -> anyhow::Result<()> {
        self.halt()
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        self.halt()
    }

    fn cleanup(&mut self, _cause: &anyhow::Error) {
        self.token.running.store(false, Ordering::SeqCst);
        self.thread = None;
    }
}

#[cfg(test)]
#[path = "simple_tests.rs"]
mod tests;
