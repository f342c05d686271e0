// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The controller: owns every service, runs in the child process.
//!
//! Services are initialized lazily on the first `start`/`pause` call so
//! that configuration and module-loading errors surface through the call
//! that needed them. With autoreload enabled a [`ChangeDetector`] watches
//! the configuration file and module sources; a change either asks the
//! supervisor for a restart (services running) or, after a failed load,
//! makes the child exit with [`RELOAD_EXIT_CODE`].

use crate::changedetect::ChangeDetector;
use crate::config::ServeConfig;
use crate::protocol::wire::{self, ProtocolError};
use crate::protocol::{Call, ChildMessage, EventMessage, Method, Reply, RemoteError, ReplyValue};
use crate::registry::{involved_files, ModuleRegistry};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tend_core::{Service, State};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Child exit status that tells the supervisor to reload.
pub const RELOAD_EXIT_CODE: u8 = 200;

/// Owns the ordered service collection in the child process.
pub struct ServiceController {
    conf: PathBuf,
    autoreload: bool,
    registry: ModuleRegistry,
    services: Arc<Mutex<IndexMap<String, Service>>>,
    initialized: bool,
    detector: Option<ChangeDetector>,
    events: mpsc::UnboundedSender<EventMessage>,
    exit_reload: mpsc::UnboundedSender<()>,
    init_failed: Arc<AtomicBool>,
    restart_sent: Arc<AtomicBool>,
}

impl ServiceController {
    pub fn new(
        conf: PathBuf,
        autoreload: bool,
        registry: ModuleRegistry,
        events: mpsc::UnboundedSender<EventMessage>,
        exit_reload: mpsc::UnboundedSender<()>,
    ) -> Self {
        Self {
            conf,
            autoreload,
            registry,
            services: Arc::new(Mutex::new(IndexMap::new())),
            initialized: false,
            detector: None,
            events,
            exit_reload,
            init_failed: Arc::new(AtomicBool::new(false)),
            restart_sent: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start every service, initializing them first if needed.
    pub fn start(&mut self) -> anyhow::Result<()> {
        self.ensure_services()?;
        for service in self.snapshot() {
            service.start();
        }
        Ok(())
    }

    /// Pause every service, initializing them first if needed.
    pub fn pause(&mut self) -> anyhow::Result<()> {
        self.ensure_services()?;
        for service in self.snapshot() {
            service.pause();
        }
        Ok(())
    }

    /// Stop every service and the change detector. Quietly does nothing
    /// when services were never initialized.
    pub fn stop(&mut self) {
        if !self.initialized {
            return;
        }
        if let Some(detector) = self.detector.take() {
            detector.stop();
        }
        for service in self.snapshot() {
            service.stop();
        }
    }

    /// Ordered `name -> state` snapshot; empty before initialization.
    pub fn service_states(&self) -> IndexMap<String, State> {
        self.services
            .lock()
            .iter()
            .map(|(name, service)| (name.clone(), service.state()))
            .collect()
    }

    /// Service handles cloned out from under the collection lock, so
    /// lifecycle calls never run while it is held.
    fn snapshot(&self) -> Vec<Service> {
        self.services.lock().values().cloned().collect()
    }

    fn ensure_services(&mut self) -> anyhow::Result<()> {
        if self.initialized {
            return Ok(());
        }
        if self.autoreload && self.detector.is_none() {
            self.arm_detector()?;
        }
        match self.load_services() {
            Ok(()) => {
                self.init_failed.store(false, Ordering::SeqCst);
                self.initialized = true;
                Ok(())
            }
            Err(e) => {
                error!(error = ?e, "failed to initialize services");
                if let Some(detector) = &self.detector {
                    self.init_failed.store(true, Ordering::SeqCst);
                    detector.observe(&self.conf, None);
                    for file in involved_files(&e) {
                        detector.observe(&file, None);
                    }
                }
                Err(e)
            }
        }
    }

    fn arm_detector(&mut self) -> anyhow::Result<()> {
        let detector = ChangeDetector::new()?;
        detector.observe(&self.conf, None);

        let handle = detector.handle();
        let events = self.events.clone();
        let exit_reload = self.exit_reload.clone();
        let init_failed = Arc::clone(&self.init_failed);
        let restart_sent = Arc::clone(&self.restart_sent);
        let services = Arc::clone(&self.services);
        detector.add_callback(move |path, _tags| {
            if init_failed.load(Ordering::SeqCst) {
                info!(path = %path.display(), "change detected after failed load");
                let _ = exit_reload.send(());
                return;
            }
            if restart_sent.swap(true, Ordering::SeqCst) {
                return;
            }
            info!(path = %path.display(), "change detected, requesting restart");
            let _ = events.send(EventMessage::Restart);
            handle.stop();
            let snapshot: Vec<Service> = services.lock().values().cloned().collect();
            for service in snapshot {
                service.stop();
            }
        });

        self.detector = Some(detector);
        Ok(())
    }

    fn load_services(&mut self) -> anyhow::Result<()> {
        let config = ServeConfig::load(&self.conf)?;
        let workers = self.registry.collect(&config)?;

        let mut map = IndexMap::new();
        for (name, worker) in workers {
            let service = Service::new(name.clone(), worker)?;
            map.insert(name, service);
        }
        *self.services.lock() = map;

        for service in self.snapshot() {
            let services = Arc::clone(&self.services);
            let events = self.events.clone();
            service.register_state_change_listener(move |_service, _old, _new| {
                let states: IndexMap<String, State> = services
                    .lock()
                    .iter()
                    .map(|(name, service)| (name.clone(), service.state()))
                    .collect();
                let _ = events.send(EventMessage::StateChange { states });
            });
        }

        if let Some(detector) = &self.detector {
            let sources = self.registry.source_files();
            let conf = self.conf.clone();
            detector.add_source_provider(move || {
                let mut pairs: Vec<(PathBuf, Option<String>)> = vec![(conf.clone(), None)];
                pairs.extend(
                    sources
                        .iter()
                        .map(|(file, module)| (file.clone(), Some(module.clone()))),
                );
                pairs
            });
        }
        Ok(())
    }
}

/// Child-process entry point: serve the controller over stdin/stdout.
/// Returns the process exit code.
pub fn run_controller(conf: PathBuf, autoreload: bool, registry: ModuleRegistry) -> u8 {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to build controller runtime");
            return 1;
        }
    };
    runtime.block_on(async move {
        let stdin = tokio::io::stdin();
        let stdout = tokio::io::stdout();
        controller_loop(conf, autoreload, registry, stdin, stdout).await
    })
}

/// The controller's event loop over an arbitrary pipe pair. Returns the
/// exit code the child should terminate with.
pub async fn controller_loop<R, W>(
    conf: PathBuf,
    autoreload: bool,
    registry: ModuleRegistry,
    reader: R,
    mut writer: W,
) -> u8
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Unpin,
{
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let (reload_tx, mut reload_rx) = mpsc::unbounded_channel();
    let mut controller = ServiceController::new(conf, autoreload, registry, event_tx, reload_tx);

    // Calls arrive via a dedicated task: length-prefixed reads are not
    // cancellation-safe inside select!.
    let (call_tx, mut call_rx) = mpsc::unbounded_channel();
    let reader_task = tokio::spawn(read_calls(reader, call_tx));

    // Interrupts are the supervisor's business; the child swallows them.
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(stream) => Some(stream),
        Err(e) => {
            warn!(error = %e, "failed to install interrupt handler");
            None
        }
    };

    let code = loop {
        tokio::select! {
            maybe_call = call_rx.recv() => {
                match maybe_call {
                    Some(Ok(call)) => {
                        let is_kill = call.method == Method::Kill;
                        let reply = dispatch(&mut controller, &call);
                        if let Err(e) = send(&mut writer, &ChildMessage::Reply(reply)).await {
                            error!(error = %e, "failed to write reply");
                            break 1;
                        }
                        if is_kill {
                            info!("controller shutting down");
                            break 0;
                        }
                    }
                    Some(Err(ProtocolError::ConnectionClosed)) | None => {
                        info!("supervisor pipe closed");
                        break 1;
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "failed to read call");
                        break 1;
                    }
                }
            }
            Some(event) = event_rx.recv() => {
                if let Err(e) = send(&mut writer, &ChildMessage::Event(event)).await {
                    error!(error = %e, "failed to write event");
                    break 1;
                }
            }
            Some(()) = reload_rx.recv() => {
                info!("watched file changed during failed load, reloading");
                break RELOAD_EXIT_CODE;
            }
            Some(()) = recv_interrupt(&mut sigint) => {
                debug!("interrupt ignored");
            }
        }
    };
    reader_task.abort();
    code
}

fn dispatch(controller: &mut ServiceController, call: &Call) -> Reply {
    debug!(id = call.id, method = ?call.method, "dispatching call");
    let result = match call.method {
        Method::Start => controller
            .start()
            .map(|()| ReplyValue::Unit)
            .map_err(|e| RemoteError::from_error(&e)),
        Method::Pause => controller
            .pause()
            .map(|()| ReplyValue::Unit)
            .map_err(|e| RemoteError::from_error(&e)),
        Method::Stop => {
            controller.stop();
            Ok(ReplyValue::Unit)
        }
        Method::ServiceStates => Ok(ReplyValue::States(controller.service_states())),
        Method::Kill => Ok(ReplyValue::Unit),
    };
    Reply {
        id: call.id,
        result,
    }
}

async fn send<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &ChildMessage,
) -> Result<(), ProtocolError> {
    wire::write_frame(writer, message).await
}

async fn read_calls<R: AsyncRead + Send + Unpin>(
    mut reader: R,
    calls: mpsc::UnboundedSender<Result<Call, ProtocolError>>,
) {
    loop {
        let result = wire::read_frame::<_, Call>(&mut reader).await;
        let failed = result.is_err();
        if calls.send(result).is_err() || failed {
            return;
        }
    }
}

async fn recv_interrupt(sigint: &mut Option<Signal>) -> Option<()> {
    match sigint {
        Some(stream) => stream.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod tests;
