// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A worker base that owns a tokio runtime on a dedicated thread.

use async_trait::async_trait;
use std::sync::Arc;
use std::thread::JoinHandle;
use tend_core::{ServiceHandle, Worker};
use tokio_util::sync::CancellationToken;
use tracing::error;

/// The async body of an [`AsyncWorker`].
///
/// `serve` runs on the worker's private runtime between start and pause
/// and should return promptly once `shutdown` is cancelled. Returning an
/// error flips the owning service to the exception state.
#[async_trait]
pub trait AsyncService: Send + Sync + 'static {
    async fn serve(&self, shutdown: CancellationToken) -> anyhow::Result<()>;
}

/// A worker that runs an [`AsyncService`] on a current-thread tokio
/// runtime owned by a dedicated thread.
pub struct AsyncWorker<S: AsyncService> {
    body: Arc<S>,
    shutdown: Option<CancellationToken>,
    thread: Option<JoinHandle<()>>,
    service: Option<ServiceHandle>,
}

impl<S: AsyncService> AsyncWorker<S> {
    pub fn new(body: S) -> Self {
        Self {
            body: Arc::new(body),
            shutdown: None,
            thread: None,
            service: None,
        }
    }

    fn halt(&mut self) -> anyhow::Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.cancel();
        }
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| anyhow::anyhow!("async worker thread panicked"))?;
        }
        Ok(())
    }
}

impl<S: AsyncService> Worker for AsyncWorker<S> {
    fn attach(&mut self, service: ServiceHandle) {
        self.service = Some(service);
    }

    fn prepare(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn start(&mut self) -> anyhow::Result<()> {
        let shutdown = CancellationToken::new();
        self.shutdown = Some(shutdown.clone());
        let body = Arc::clone(&self.body);
        let service = self.service.clone();
        self.thread = Some(
            std::thread::Builder::new()
                .name("async-worker".to_string())
                .spawn(move || {
                    let runtime = match tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                    {
                        Ok(runtime) => runtime,
                        Err(e) => {
                            report(service.as_ref(), anyhow::Error::new(e), "runtime build failed");
                            return;
                        }
                    };
                    if let Err(e) = runtime.block_on(body.serve(shutdown)) {
                        report(service.as_ref(), e, "serve failed");
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
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.cancel();
        }
        self.thread = None;
    }
}

/// Report a failure without deadlocking against a pause() that is joining
/// this thread while the service holds the worker.
fn report(service: Option<&ServiceHandle>, error: anyhow::Error, context: &'static str) {
    match service {
        Some(handle) => {
            let handle = handle.clone();
            std::thread::spawn(move || handle.set_exception(error.context(context)));
        }
        None => error!(error = %error, context, "unattached async worker failed"),
    }
}

#[cfg(test)]
#[path = "async_task_tests.rs"]
mod tests;
