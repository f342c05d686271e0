// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Top-level supervisor errors.

use crate::config::ConfigError;
use crate::gateway::GatewayError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("failed to initialize services: {0}")]
    Startup(GatewayError),

    #[error("controller exited unexpectedly (status {code:?})")]
    ChildDied { code: Option<i32> },

    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),
}
