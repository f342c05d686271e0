// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! tend-daemon: the supervisor that owns and reloads worker services.
//!
//! The [`Server`] runs in the foreground process and repeatedly launches a
//! controller in a child process (re-executing the current binary). The
//! controller owns the [`Service`](tend_core::Service) collection; the two
//! sides talk over a length-prefixed pipe protocol. With autoreload
//! enabled, a [`ChangeDetector`] in the child watches the configuration
//! and module sources and triggers a clean restart of the child on any
//! change.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod changedetect;
pub mod config;
pub mod controller;
pub mod error;
pub mod gateway;
mod instance;
pub mod monitor;
pub mod protocol;
pub mod registry;
pub mod server;

pub use changedetect::ChangeDetector;
pub use config::{ModuleSelector, ServeConfig};
pub use controller::{run_controller, ServiceController};
pub use error::ServeError;
pub use registry::{involved_files, ModuleRegistry, SourceFiles, WorkerModule, WorkerSet};
pub use server::Server;
