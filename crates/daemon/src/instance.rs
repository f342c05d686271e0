// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-fork supervisor loop.
//!
//! One instance drives one controller child from launch to exit: pause
//! then start on the way up; on the way down an idempotent stop sequence
//! that waits for every service to report a terminal state before
//! reaping the child. The `reload` outcome tells the [`Server`] whether
//! to construct a fresh instance; the first writer wins, except that an
//! interrupt always clears a pending reload.

use crate::config::ServeConfig;
use crate::controller::RELOAD_EXIT_CODE;
use crate::error::ServeError;
use crate::gateway::{Gateway, GatewayError, GatewayEvent};
use crate::monitor::{MonitorCommand, MonitorHub};
use indexmap::IndexMap;
use tend_core::State;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub(crate) struct InstanceOutcome {
    pub reload: bool,
}

pub(crate) struct ServerInstance {
    autoreload: bool,
    gateway: Gateway,
    events: mpsc::UnboundedReceiver<GatewayEvent>,
    monitor: Option<MonitorHub>,
    reload: Option<bool>,
    stopping: bool,
    finished: bool,
    trap_signals: bool,
}

impl ServerInstance {
    /// Fork a controller child for `config`.
    pub fn spawn(config: &ServeConfig, monitor: Option<MonitorHub>) -> Result<Self, ServeError> {
        let binary = std::env::current_exe()?;
        let (gateway, events) = Gateway::spawn(&binary, &config.conf, config.autoreload)?;
        Ok(Self::assemble(config.autoreload, gateway, events, monitor, true))
    }

    /// Wrap an existing gateway; used by tests that run the controller
    /// loop in-process.
    #[cfg(test)]
    pub fn over(
        autoreload: bool,
        gateway: Gateway,
        events: mpsc::UnboundedReceiver<GatewayEvent>,
        monitor: Option<MonitorHub>,
    ) -> Self {
        Self::assemble(autoreload, gateway, events, monitor, false)
    }

    fn assemble(
        autoreload: bool,
        gateway: Gateway,
        events: mpsc::UnboundedReceiver<GatewayEvent>,
        monitor: Option<MonitorHub>,
        trap_signals: bool,
    ) -> Self {
        Self {
            autoreload,
            gateway,
            events,
            monitor,
            reload: None,
            stopping: false,
            finished: false,
            trap_signals,
        }
    }

    /// Drive the controller until this instance is done; the outcome says
    /// whether the server should reload.
    pub async fn run_until_stopped(mut self) -> Result<InstanceOutcome, ServeError> {
        let mut sigint = if self.trap_signals {
            match signal(SignalKind::interrupt()) {
                Ok(stream) => Some(stream),
                Err(e) => {
                    warn!(error = %e, "failed to install interrupt handler");
                    None
                }
            }
        } else {
            None
        };
        let mut commands = self.monitor.as_ref().map(MonitorHub::attach);

        self.startup().await?;

        while !self.finished {
            tokio::select! {
                maybe_event = self.events.recv() => match maybe_event {
                    Some(GatewayEvent::StateChange(states)) => self.on_state_change(states).await?,
                    Some(GatewayEvent::Restart) => self.on_restart().await?,
                    Some(GatewayEvent::Closed) | None => self.on_closed().await?,
                },
                Some(command) = recv_command(&mut commands) => self.on_command(command).await?,
                Some(()) = recv_interrupt(&mut sigint) => self.on_interrupt().await?,
            }
        }

        self.gateway.join_reader().await;
        if let Some(hub) = &self.monitor {
            hub.detach();
        }
        Ok(InstanceOutcome {
            reload: self.reload.unwrap_or(false),
        })
    }

    async fn startup(&mut self) -> Result<(), ServeError> {
        if let Err(e) = self.gateway.pause().await {
            return self.tolerate_startup_error(e).await;
        }
        if let Err(e) = self.gateway.start().await {
            return self.tolerate_startup_error(e).await;
        }
        info!("started");
        if let Some(hub) = &self.monitor {
            if let Ok(states) = self.gateway.service_states().await {
                hub.publish_states(&states);
            }
        }
        Ok(())
    }

    /// Decide what a failed pause/start means. With autoreload the child
    /// stays up watching the files behind the failure and will exit with
    /// the reload status on a change, so the instance keeps running.
    async fn tolerate_startup_error(&mut self, error: GatewayError) -> Result<(), ServeError> {
        match error {
            GatewayError::ChildGone => {
                // The Closed event decides what the exit means.
                warn!("controller vanished during startup");
                Ok(())
            }
            GatewayError::Remote(remote) if self.autoreload => {
                warn!(
                    error = %remote,
                    "service initialization failed, waiting for a change to reload"
                );
                Ok(())
            }
            GatewayError::Remote(remote) => {
                error!(error = %remote, detail = %remote.detail, "service initialization failed");
                let _ = self.gateway.kill().await;
                Err(ServeError::Startup(GatewayError::Remote(remote)))
            }
            other => {
                let _ = self.gateway.kill().await;
                Err(other.into())
            }
        }
    }

    async fn on_state_change(&mut self, states: IndexMap<String, State>) -> Result<(), ServeError> {
        if let Some(hub) = &self.monitor {
            hub.publish_states(&states);
        }
        if all_terminal(&states) {
            if self.stopping {
                self.finish().await
            } else {
                // Every service came to rest on its own; wind down.
                self.initiate_stop().await
            }
        } else {
            Ok(())
        }
    }

    async fn on_restart(&mut self) -> Result<(), ServeError> {
        if self.reload.is_none() {
            self.reload = Some(true);
        }
        self.initiate_stop().await
    }

    async fn on_interrupt(&mut self) -> Result<(), ServeError> {
        info!("interrupt received, stopping");
        // An interrupt clears any pending reload.
        self.reload = Some(false);
        self.initiate_stop().await
    }

    async fn on_command(&mut self, command: MonitorCommand) -> Result<(), ServeError> {
        debug!(?command, "monitor command");
        match command {
            MonitorCommand::Start => {
                if let Err(e) = self.gateway.start().await {
                    warn!(error = %e, "monitor start failed");
                }
                Ok(())
            }
            MonitorCommand::Pause => {
                if let Err(e) = self.gateway.pause().await {
                    warn!(error = %e, "monitor pause failed");
                }
                Ok(())
            }
            MonitorCommand::Stop => self.initiate_stop().await,
            MonitorCommand::Restart => self.on_restart().await,
        }
    }

    /// Idempotent stop sequence: probe the states, stop what is not yet
    /// terminal, and let the all-terminal state-change complete the
    /// teardown.
    async fn initiate_stop(&mut self) -> Result<(), ServeError> {
        if self.stopping {
            return Ok(());
        }
        self.stopping = true;
        let states = match self.gateway.service_states().await {
            Ok(states) => states,
            Err(GatewayError::ChildGone) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if all_terminal(&states) {
            self.finish().await
        } else {
            if let Err(e) = self.gateway.stop().await {
                warn!(error = %e, "stop call failed");
            }
            Ok(())
        }
    }

    async fn finish(&mut self) -> Result<(), ServeError> {
        if self.finished {
            return Ok(());
        }
        match self.gateway.kill().await {
            Ok(status) => debug!(?status, "controller stopped"),
            Err(e) => warn!(error = %e, "kill failed"),
        }
        self.finished = true;
        Ok(())
    }

    async fn on_closed(&mut self) -> Result<(), ServeError> {
        let status = match self.gateway.reap().await {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e, "failed to reap controller");
                None
            }
        };
        let code = status.and_then(|s| s.code());
        if code == Some(i32::from(RELOAD_EXIT_CODE)) {
            info!("controller requested reload");
            if self.reload.is_none() {
                self.reload = Some(true);
            }
            self.finished = true;
            Ok(())
        } else if self.stopping || self.finished {
            self.finished = true;
            Ok(())
        } else {
            Err(ServeError::ChildDied { code })
        }
    }
}

fn all_terminal(states: &IndexMap<String, State>) -> bool {
    states.values().all(|state| state.is_terminal())
}

async fn recv_command(
    commands: &mut Option<mpsc::UnboundedReceiver<MonitorCommand>>,
) -> Option<MonitorCommand> {
    match commands {
        Some(rx) => {
            let value = rx.recv().await;
            if value.is_none() {
                *commands = None;
            }
            value
        }
        None => std::future::pending().await,
    }
}

async fn recv_interrupt(sigint: &mut Option<Signal>) -> Option<()> {
    match sigint {
        Some(stream) => {
            let value = stream.recv().await;
            if value.is_none() {
                *sigint = None;
            }
            value
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "instance_tests.rs"]
mod tests;
