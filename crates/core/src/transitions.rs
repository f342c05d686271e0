// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transition table construction and validation.
//!
//! Every worker gets the four canonical edges for free. Additional edges
//! are declared with [`TransitionDecl`] and validated when the table is
//! built: the implicit completion edges stay off limits, and a verb with a
//! canonical end state may only ever end there.

use crate::state::State;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// A directed edge in the lifecycle graph: `(from, to)`.
pub type Transition = (State, State);

/// Edges that are implicit completions of an in-flight transition. They are
/// never user-driven and may not be declared.
const FORBIDDEN: [Transition; 4] = [
    (State::Starting, State::Running),
    (State::Stopping, State::Stopped),
    (State::Pausing, State::Paused),
    (State::Preparing, State::Paused),
];

/// The worker method a transition edge executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Prepare,
    Start,
    Pause,
    Stop,
    /// Dispatched through [`Worker::run_custom`](crate::Worker::run_custom).
    Custom(&'static str),
}

impl Verb {
    /// The method name, as used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Verb::Prepare => "prepare",
            Verb::Start => "start",
            Verb::Pause => "pause",
            Verb::Stop => "stop",
            Verb::Custom(name) => name,
        }
    }

    /// The end state this verb's name commits it to, if any.
    ///
    /// A custom verb that reuses a canonical name (e.g. a `stop` usable
    /// from `Running`) is held to the canonical contract.
    pub fn canonical_end(&self) -> Option<State> {
        match self.name() {
            "prepare" | "pause" => Some(State::Paused),
            "start" => Some(State::Running),
            "stop" => Some(State::Stopped),
            _ => None,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A declared extra transition: `from` -> `to` runs `verb`.
///
/// `to: None` defaults to the verb's canonical end state.
#[derive(Debug, Clone, Copy)]
pub struct TransitionDecl {
    pub from: State,
    pub to: Option<State>,
    pub verb: Verb,
}

impl TransitionDecl {
    /// Declare an edge ending at the verb's canonical end state.
    pub fn new(from: State, verb: Verb) -> Self {
        Self { from, to: None, verb }
    }

    /// Declare an edge with an explicit end state.
    pub fn ending_at(from: State, to: State, verb: Verb) -> Self {
        Self { from, to: Some(to), verb }
    }
}

/// Errors detected while building a worker's transition table.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("{verb}() has no end state for transition from {from}")]
    MissingEndState { verb: &'static str, from: State },

    #[error("{verb}() must transition to {expected}, not {declared}")]
    EndStateMismatch {
        verb: &'static str,
        expected: State,
        declared: State,
    },

    #[error("{verb}() cannot transition to both {first} and {second}")]
    ConflictingEndStates {
        verb: &'static str,
        first: State,
        second: State,
    },

    #[error("invalid transition ({from} -> {to})")]
    InvalidEdge { from: State, to: State },

    #[error("transition ({from} -> {to}) already registered as {verb}()")]
    DuplicateEdge {
        from: State,
        to: State,
        verb: &'static str,
    },
}

/// Immutable `edge -> verb` mapping consulted by the service.
#[derive(Debug, Clone)]
pub struct TransitionTable {
    edges: HashMap<Transition, Verb>,
}

impl TransitionTable {
    /// Build a table from the canonical edges plus `decls`.
    ///
    /// A declaration may re-route a canonical edge, but two declarations
    /// may not claim the same edge.
    pub fn build(decls: &[TransitionDecl]) -> Result<Self, TransitionError> {
        let mut declared: HashMap<Transition, Verb> = HashMap::new();
        let mut verb_ends: HashMap<&'static str, State> = HashMap::new();

        for decl in decls {
            let end = match (decl.to, decl.verb.canonical_end()) {
                (Some(to), Some(expected)) if to != expected => {
                    return Err(TransitionError::EndStateMismatch {
                        verb: decl.verb.name(),
                        expected,
                        declared: to,
                    });
                }
                (Some(to), _) => to,
                (None, Some(expected)) => expected,
                (None, None) => {
                    return Err(TransitionError::MissingEndState {
                        verb: decl.verb.name(),
                        from: decl.from,
                    });
                }
            };

            let edge = (decl.from, end);
            if decl.from == end || FORBIDDEN.contains(&edge) {
                return Err(TransitionError::InvalidEdge {
                    from: decl.from,
                    to: end,
                });
            }

            match verb_ends.insert(decl.verb.name(), end) {
                Some(previous) if previous != end => {
                    return Err(TransitionError::ConflictingEndStates {
                        verb: decl.verb.name(),
                        first: previous,
                        second: end,
                    });
                }
                _ => {}
            }

            if let Some(existing) = declared.insert(edge, decl.verb) {
                return Err(TransitionError::DuplicateEdge {
                    from: edge.0,
                    to: edge.1,
                    verb: existing.name(),
                });
            }
        }

        let mut edges = Self::canonical();
        edges.extend(declared);
        Ok(Self { edges })
    }

    fn canonical() -> HashMap<Transition, Verb> {
        HashMap::from([
            ((State::Stopped, State::Paused), Verb::Prepare),
            ((State::Paused, State::Running), Verb::Start),
            ((State::Running, State::Paused), Verb::Pause),
            ((State::Paused, State::Stopped), Verb::Stop),
        ])
    }

    /// Look up the verb implementing `edge`, if the edge exists.
    pub fn verb(&self, edge: Transition) -> Option<Verb> {
        self.edges.get(&edge).copied()
    }

    pub fn contains(&self, edge: Transition) -> bool {
        self.edges.contains_key(&edge)
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

#[cfg(test)]
#[path = "transitions_tests.rs"]
mod tests;
