// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pipe protocol between the supervisor and the forked controller.
//!
//! The supervisor sends [`Call`]s; the controller answers each with a
//! [`ChildMessage::Reply`] carrying the same id and pushes unsolicited
//! [`ChildMessage::Event`]s in between. Each message travels as one
//! length-prefixed JSON frame (see [`wire`]).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tend_core::State;
use thiserror::Error;

#[path = "protocol_wire.rs"]
pub mod wire;

/// A request from the supervisor to the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    pub id: u64,
    pub method: Method,
}

/// The controller's closed method surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Start,
    Pause,
    Stop,
    ServiceStates,
    /// Stop the controller's event loop; the child exits after replying.
    Kill,
}

/// Anything the controller writes to the pipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChildMessage {
    Reply(Reply),
    Event(EventMessage),
}

/// Response to one [`Call`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub id: u64,
    pub result: Result<ReplyValue, RemoteError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyValue {
    Unit,
    States(IndexMap<String, State>),
}

/// Unsolicited controller-to-supervisor notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum EventMessage {
    /// Aggregate snapshot of every service's current state, emitted on
    /// each state change.
    StateChange { states: IndexMap<String, State> },
    /// One-shot: a watched file changed, the supervisor should restart
    /// the controller.
    Restart,
}

/// An error reconstructed across the process boundary: message, context
/// chain (outermost first) and a debug rendering that includes a
/// backtrace when one was captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct RemoteError {
    pub message: String,
    pub chain: Vec<String>,
    pub detail: String,
}

impl RemoteError {
    pub fn from_error(error: &anyhow::Error) -> Self {
        Self {
            message: error.to_string(),
            chain: error.chain().skip(1).map(|cause| cause.to_string()).collect(),
            detail: format!("{error:?}"),
        }
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
