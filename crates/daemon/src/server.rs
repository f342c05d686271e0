// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Top-level reload loop.

use crate::config::ServeConfig;
use crate::error::ServeError;
use crate::instance::ServerInstance;
use crate::monitor::MonitorHub;
use std::time::Duration;
use tracing::info;

/// Runs server instances until one decides not to reload.
///
/// The monitor listener (when configured) is bound once and survives
/// reloads; each instance attaches to it for the duration of one
/// controller child.
pub struct Server {
    config: ServeConfig,
}

impl Server {
    pub fn new(config: ServeConfig) -> Self {
        Self { config }
    }

    pub async fn run(self) -> Result<(), ServeError> {
        let monitor = match &self.config.monitor {
            Some(addr) => Some(MonitorHub::bind(addr).await?),
            None => None,
        };
        loop {
            let instance = ServerInstance::spawn(&self.config, monitor.clone())?;
            let outcome = instance.run_until_stopped();
            let outcome = match outcome.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    if let Some(hub) = &monitor {
                        hub.detach();
                    }
                    return Err(e);
                }
            };
            if outcome.reload {
                info!("reloading");
                if let Some(hub) = &monitor {
                    hub.publish_literal("reloading");
                }
            } else {
                if let Some(hub) = &monitor {
                    hub.publish_literal("shutting down");
                    // Let connection tasks flush the final frame before
                    // the process exits.
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                return Ok(());
            }
        }
    }
}
