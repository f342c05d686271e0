// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! tend-workers: reusable worker base implementations.
//!
//! Each type here implements [`tend_core::Worker`] and hides one flavor of
//! concurrency behind the synchronous lifecycle verbs: a plain thread
//! loop, a TCP accept loop, a tokio runtime, and a filesystem watcher.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod async_task;
pub mod simple;
pub mod socket;
pub mod watcher;

pub use async_task::{AsyncService, AsyncWorker};
pub use simple::{LoopToken, RunLoop, SimpleWorker};
pub use socket::{ConnectionHandler, TcpServerWorker};
pub use watcher::FileWatcherWorker;
