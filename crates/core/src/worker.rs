// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The worker contract.

use crate::service::ServiceHandle;
use crate::transitions::{TransitionDecl, Verb};

/// A user-supplied lifecycle unit.
///
/// Each of the four canonical verbs performs one transition and returns
/// once the target state has been entered (or fails). The owning
/// [`Service`](crate::Service) calls them on a dedicated transition
/// thread, so implementations may block; they must not call back into the
/// owning service's transition methods.
pub trait Worker: Send + 'static {
    /// Called once when the worker is wrapped in a service. The handle is
    /// non-owning and is how background threads report failures via
    /// [`ServiceHandle::set_exception`].
    fn attach(&mut self, service: ServiceHandle) {
        let _ = service;
    }

    /// Acquire resources. Only called in the stopped state; the worker is
    /// paused when this returns.
    fn prepare(&mut self) -> anyhow::Result<()>;

    /// Begin serving. Only called in the paused state.
    fn start(&mut self) -> anyhow::Result<()>;

    /// Stop serving but keep resources. Only called in the running state.
    fn pause(&mut self) -> anyhow::Result<()>;

    /// Release resources. Only called in the paused state (unless a
    /// declared transition routes here from elsewhere).
    fn stop(&mut self) -> anyhow::Result<()>;

    /// Called exactly once when the service enters the exception state.
    /// Must be safe to call regardless of how far the worker got.
    fn cleanup(&mut self, cause: &anyhow::Error) {
        let _ = cause;
    }

    /// Extra transition edges beyond the canonical four.
    fn transitions(&self) -> Vec<TransitionDecl> {
        Vec::new()
    }

    /// Dispatch target for [`Verb::Custom`] edges declared in
    /// [`Worker::transitions`].
    fn run_custom(&mut self, name: &str) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("no transition method named {name}"))
    }
}

/// Invoke the worker method behind `verb`.
pub(crate) fn run_verb(worker: &mut dyn Worker, verb: Verb) -> anyhow::Result<()> {
    match verb {
        Verb::Prepare => worker.prepare(),
        Verb::Start => worker.start(),
        Verb::Pause => worker.pause(),
        Verb::Stop => worker.stop(),
        Verb::Custom(name) => worker.run_custom(name),
    }
}
