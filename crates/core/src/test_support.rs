// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Probe workers and polling helpers for lifecycle tests.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use crate::service::{Service, ServiceHandle};
use crate::state::State;
use crate::transitions::TransitionDecl;
use crate::worker::Worker;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A reusable open/closed gate for holding a transition mid-flight.
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    signal: Condvar,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open(&self) {
        let mut open = self.open.lock();
        *open = true;
        self.signal.notify_all();
    }

    pub fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.signal.wait(&mut open);
        }
    }
}

/// A worker that records every verb call and can be told to fail, block,
/// or declare extra edges.
#[derive(Default)]
pub struct ProbeWorker {
    calls: Arc<Mutex<Vec<String>>>,
    cleanups: Arc<AtomicUsize>,
    fail_in: Option<&'static str>,
    hold_in: Option<(&'static str, Arc<Gate>)>,
    extra: Vec<TransitionDecl>,
    handle: Option<ServiceHandle>,
}

impl ProbeWorker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return an `Err` from the named verb.
    pub fn failing_in(mut self, verb: &'static str) -> Self {
        self.fail_in = Some(verb);
        self
    }

    /// Block inside the named verb until the gate opens.
    pub fn holding_in(mut self, verb: &'static str, gate: Arc<Gate>) -> Self {
        self.hold_in = Some((verb, gate));
        self
    }

    pub fn with_transitions(mut self, extra: Vec<TransitionDecl>) -> Self {
        self.extra = extra;
        self
    }

    /// Shared view of the recorded verb calls.
    pub fn calls(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.calls)
    }

    /// Shared cleanup-invocation counter.
    pub fn cleanups(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.cleanups)
    }

    fn run(&mut self, verb: &str) -> anyhow::Result<()> {
        self.calls.lock().push(verb.to_string());
        if let Some((held, gate)) = &self.hold_in {
            if *held == verb {
                gate.wait();
            }
        }
        if self.fail_in == Some(verb) {
            anyhow::bail!("{verb} failed on purpose");
        }
        Ok(())
    }
}

impl Worker for ProbeWorker {
    fn attach(&mut self, service: ServiceHandle) {
        self.handle = Some(service);
    }

    fn prepare(&mut self) -> anyhow::Result<()> {
        self.run("prepare")
    }

    fn start(&mut self) -> anyhow::Result<()> {
        self.run("start")
    }

    fn pause(&mut self) -> anyhow::Result<()> {
        self.run("pause")
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        self.run("stop")
    }

    fn cleanup(&mut self, _cause: &anyhow::Error) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
    }

    fn transitions(&self) -> Vec<TransitionDecl> {
        self.extra.clone()
    }

    fn run_custom(&mut self, name: &str) -> anyhow::Result<()> {
        self.calls.lock().push(name.to_string());
        Ok(())
    }
}

/// Poll until the service reaches `want` or the timeout elapses.
pub fn wait_for_state(service: &Service, want: State, timeout: Duration) -> bool {
    wait_until(timeout, || service.state() == want)
}

/// Poll until `predicate` holds or the timeout elapses.
pub fn wait_until(timeout: Duration, predicate: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    predicate()
}

/// Generous default for awaiting background transitions in tests.
pub const WAIT: Duration = Duration::from_secs(5);
