// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! tend-core: service lifecycle state machine and worker contract.
//!
//! A [`Worker`] is a user-supplied lifecycle unit (prepare/start/pause/stop
//! plus cleanup). A [`Service`] wraps one worker and drives it through the
//! eight-state lifecycle without the caller having to think about threads:
//! transition requests are coalesced, run on background threads, and any
//! worker failure parks the service in the terminal `Exception` state.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod service;
pub mod state;
pub mod transitions;
pub mod worker;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use service::{ListenerId, Service, ServiceHandle};
pub use state::State;
pub use transitions::{Transition, TransitionDecl, TransitionError, TransitionTable, Verb};
pub use worker::Worker;
