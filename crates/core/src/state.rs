// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Service lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle state of a [`Service`](crate::Service).
///
/// Only `Stopped`, `Paused`, `Running` and `Exception` are resting states.
/// The remaining four are observable only while a transition thread is
/// executing the corresponding worker method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    /// Worker inert; no resources held.
    Stopped,
    /// Transitioning Stopped -> Paused.
    Preparing,
    /// Resources acquired, not serving.
    Paused,
    /// Transitioning Paused -> Running.
    Starting,
    /// Actively serving.
    Running,
    /// Transitioning Running -> Paused.
    Pausing,
    /// Transitioning Paused -> Stopped.
    Stopping,
    /// Terminal; the service has captured an error.
    Exception,
}

impl State {
    /// Terminal states: no further transitions will be honored from
    /// `Exception`, and `Stopped` is where a drained service rests.
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Stopped | State::Exception)
    }

    /// True while a transition thread is executing.
    pub fn is_intermediate(self) -> bool {
        matches!(
            self,
            State::Preparing | State::Starting | State::Pausing | State::Stopping
        )
    }

    /// The state to route through when no direct edge to `self` exists.
    ///
    /// `Running` and `Stopped` are both reachable from `Paused` in the
    /// canonical table, so a request targeting either first targets
    /// `Paused` and queues the original target as the follow-up.
    pub fn fallback_target(self) -> Option<State> {
        match self {
            State::Running | State::Stopped => Some(State::Paused),
            _ => None,
        }
    }

    /// Wire name, also used by `Display` and the monitor protocol.
    pub fn as_str(self) -> &'static str {
        match self {
            State::Stopped => "stopped",
            State::Preparing => "preparing",
            State::Paused => "paused",
            State::Starting => "starting",
            State::Running => "running",
            State::Pausing => "pausing",
            State::Stopping => "stopping",
            State::Exception => "exception",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
