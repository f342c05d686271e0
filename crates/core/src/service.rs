// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The service state machine wrapping one worker.
//!
//! Transition requests (`start`/`pause`/`stop`) are asynchronous: the
//! request records intent under the state lock and the worker method runs
//! on a freshly spawned transition thread. Requests are idempotent and
//! coalesced; when requests overlap, the most recent unreached target
//! wins. A failing worker method parks the service in
//! [`State::Exception`] permanently.
//!
//! Locking: the state lock guards the state cell and is never held while
//! listeners run. A separate dispatch lock is held across every
//! state-set-plus-notification sequence so listeners observe changes in
//! the order they happened. Worker methods run with neither lock held.

use crate::state::State;
use crate::transitions::{Transition, TransitionError, TransitionTable, Verb};
use crate::worker::{self, Worker};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::{debug, error};

type StateListener = Arc<dyn Fn(&Service, State, State) + Send + Sync>;

/// Token returned by [`Service::register_state_change_listener`], used to
/// unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A wrapper around one worker that drives it through the lifecycle
/// without the caller worrying about threading.
///
/// Cloning is cheap and yields another handle onto the same service.
///
/// Known limitation: there are no transition timeouts. A worker method
/// that hangs leaves its service in the intermediate state forever.
#[derive(Clone)]
pub struct Service {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    table: TransitionTable,
    worker: Mutex<Box<dyn Worker>>,
    cell: Mutex<Cell>,
    /// Serializes state changes together with their listener dispatch.
    dispatch: Mutex<()>,
    listeners: Mutex<Vec<(ListenerId, StateListener)>>,
    next_listener_id: AtomicU64,
}

/// Everything guarded by the state lock.
struct Cell {
    state: State,
    /// Bumped on every state set; transition completions that observe a
    /// newer epoch than they captured have been superseded.
    epoch: u64,
    changed_at: Instant,
    target_state: Option<State>,
    next_state: Option<State>,
    transition: Option<Transition>,
    exception: Option<Arc<anyhow::Error>>,
    /// Set when a transition thread could not be spawned; drained by the
    /// caller after the state lock is released.
    spawn_failure: Option<anyhow::Error>,
}

/// A state-change notification, fired with the state lock released.
type Note = Option<(State, State)>;

impl Service {
    /// Wrap `worker`, validating its transition declarations and
    /// installing the back-reference via [`Worker::attach`].
    pub fn new(name: impl Into<String>, worker: Box<dyn Worker>) -> Result<Self, TransitionError> {
        let table = TransitionTable::build(&worker.transitions())?;
        let service = Self {
            inner: Arc::new(Inner {
                name: name.into(),
                table,
                worker: Mutex::new(worker),
                cell: Mutex::new(Cell {
                    state: State::Stopped,
                    epoch: 0,
                    changed_at: Instant::now(),
                    target_state: None,
                    next_state: None,
                    transition: None,
                    exception: None,
                    spawn_failure: None,
                }),
                dispatch: Mutex::new(()),
                listeners: Mutex::new(Vec::new()),
                next_listener_id: AtomicU64::new(0),
            }),
        };
        service.inner.worker.lock().attach(service.handle());
        Ok(service)
    }

    /// A non-owning handle suitable for handing to worker threads.
    pub fn handle(&self) -> ServiceHandle {
        ServiceHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> State {
        self.inner.cell.lock().state
    }

    /// Generation counter bumped on every state change.
    pub fn state_epoch(&self) -> u64 {
        self.inner.cell.lock().epoch
    }

    /// When the current state was entered.
    pub fn state_changed_at(&self) -> Instant {
        self.inner.cell.lock().changed_at
    }

    /// The captured error, non-empty exactly when the state is
    /// [`State::Exception`].
    pub fn exception(&self) -> Option<Arc<anyhow::Error>> {
        self.inner.cell.lock().exception.clone()
    }

    /// Make sure the worker ends up running eventually.
    pub fn start(&self) {
        self.request(State::Running);
    }

    /// Make sure the worker ends up paused eventually.
    pub fn pause(&self) {
        self.request(State::Paused);
    }

    /// Make sure the worker ends up stopped eventually.
    pub fn stop(&self) {
        self.request(State::Stopped);
    }

    /// Register a callback invoked on every state change with
    /// `(service, old_state, new_state)`.
    ///
    /// Callbacks run on whichever thread completed the transition, with
    /// the state lock released, serialized in the order the changes
    /// happened; the service may already have moved past `new_state` by
    /// the time a callback observes it. Callbacks must be cheap and must
    /// not call back into this service's transition methods (or
    /// [`Service::set_exception`]) synchronously.
    pub fn register_state_change_listener<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&Service, State, State) + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.lock().push((id, Arc::new(callback)));
        id
    }

    /// Remove a previously registered listener. Unknown ids are ignored.
    pub fn unregister_state_change_listener(&self, id: ListenerId) {
        self.inner.listeners.lock().retain(|(lid, _)| *lid != id);
    }

    /// Park the service in the terminal exception state.
    ///
    /// The first call wins; later calls (and all further transition
    /// requests) are ignored. The worker's `cleanup` runs before
    /// listeners are notified. Must not be called from inside a worker
    /// transition method; return an `Err` from the method instead.
    pub fn set_exception(&self, error: anyhow::Error) {
        let _session = self.inner.dispatch.lock();
        let note = self.fail_now(error);
        self.drain(note);
    }

    fn request(&self, target: State) {
        let _session = self.inner.dispatch.lock();
        let (note, failed) = {
            let mut cell = self.inner.cell.lock();
            let note = self.transition_to(&mut cell, target);
            (note, cell.spawn_failure.take())
        };
        self.drain(note);
        if let Some(err) = failed {
            let note = self.fail_now(err);
            self.drain(note);
        }
    }

    /// Core transition algorithm. Runs under the state lock; returns the
    /// notification for any state set here, to be fired by the caller
    /// once the state lock is released.
    fn transition_to(&self, cell: &mut Cell, target: State) -> Note {
        let name = self.inner.name.as_str();
        if cell.state == State::Exception {
            debug!(service = name, %target, "transition request ignored: in exception state");
            return None;
        }
        if cell.state == target {
            cell.target_state = None;
            cell.next_state = None;
            debug!(service = name, %target, "transition request is a no-op");
            return None;
        }
        if cell.target_state == Some(target)
            && matches!(cell.transition, Some((_, to)) if to == target)
        {
            // Already transitioning to the requested state.
            cell.target_state = None;
            cell.next_state = None;
            debug!(service = name, %target, "transition already in progress");
            return None;
        }
        let edge = (cell.state, target);
        if let Some(verb) = self.inner.table.verb(edge) {
            debug!(service = name, %target, "transition initiated");
            cell.target_state = None;
            cell.next_state = None;
            let marker = match target {
                State::Running => Some(State::Starting),
                State::Stopped => Some(State::Stopping),
                State::Paused if cell.state == State::Stopped => Some(State::Preparing),
                State::Paused => Some(State::Pausing),
                _ => None,
            };
            let note = marker.and_then(|m| self.set_state_locked(cell, m));
            cell.target_state = Some(target);
            cell.transition = Some(edge);
            self.spawn_transition(cell, edge, verb);
            return note;
        }
        if let Some(intermediate) = target.fallback_target() {
            debug!(service = name, %target, %intermediate, "routing via intermediate target");
            let note = self.transition_to(cell, intermediate);
            cell.next_state = Some(target);
            note
        } else {
            debug!(service = name, %target, "transition request queued");
            cell.next_state = Some(target);
            None
        }
    }

    fn set_state_locked(&self, cell: &mut Cell, new: State) -> Note {
        if cell.state == new || cell.state == State::Exception {
            return None;
        }
        let old = cell.state;
        cell.state = new;
        cell.epoch += 1;
        cell.changed_at = Instant::now();
        Some((old, new))
    }

    fn spawn_transition(&self, cell: &mut Cell, edge: Transition, verb: Verb) {
        let epoch = cell.epoch;
        let service = self.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("{}-transition", self.inner.name))
            .spawn(move || service.execute_transition(edge, verb, epoch));
        if let Err(e) = spawned {
            cell.transition = None;
            cell.spawn_failure = Some(anyhow::Error::new(e).context("spawning transition thread"));
        }
    }

    /// Body of a transition thread.
    fn execute_transition(&self, edge: Transition, verb: Verb, epoch: u64) {
        debug!(
            service = %self.inner.name,
            %verb,
            from = %edge.0,
            to = %edge.1,
            "executing transition"
        );
        let result = {
            let mut worker = self.inner.worker.lock();
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                worker::run_verb(&mut **worker, verb)
            }));
            match outcome {
                Ok(result) => result,
                Err(payload) => Err(anyhow::anyhow!(
                    "{verb}() panicked: {}",
                    panic_message(&payload)
                )),
            }
        };
        let _session = self.inner.dispatch.lock();
        match result {
            Ok(()) => {
                let note = {
                    let mut cell = self.inner.cell.lock();
                    if cell.transition == Some(edge) {
                        cell.transition = None;
                    }
                    if epoch >= cell.epoch {
                        self.set_state_locked(&mut cell, edge.1)
                    } else {
                        debug!(service = %self.inner.name, to = %edge.1, "transition superseded");
                        None
                    }
                };
                self.drain(note);
            }
            Err(e) => {
                let note = self.fail_now(e);
                self.drain(note);
            }
        }
    }

    /// Flip to the exception state and run the worker's cleanup. Assumes
    /// the dispatch lock is held; returns the notification to drain.
    fn fail_now(&self, error: anyhow::Error) -> Note {
        let (old, cause) = {
            let mut cell = self.inner.cell.lock();
            if cell.state == State::Exception {
                return None;
            }
            let old = cell.state;
            cell.state = State::Exception;
            cell.epoch += 1;
            cell.changed_at = Instant::now();
            let cause = Arc::new(error);
            cell.exception = Some(Arc::clone(&cause));
            (old, cause)
        };
        {
            let mut worker = self.inner.worker.lock();
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                worker.cleanup(&cause);
            }));
            if outcome.is_err() {
                error!(service = %self.inner.name, "worker cleanup panicked");
            }
        }
        Some((old, State::Exception))
    }

    /// Fire `first` and any notifications produced by follow-up
    /// transitions, each with the state lock released. Assumes the
    /// dispatch lock is held.
    fn drain(&self, first: Note) {
        let mut queue: VecDeque<(State, State)> = VecDeque::new();
        queue.extend(first);
        while let Some((old, new)) = queue.pop_front() {
            debug!(service = %self.inner.name, %old, %new, "state changed");
            if new == State::Exception {
                if let Some(cause) = self.exception() {
                    error!(service = %self.inner.name, error = ?cause, "service failed");
                }
            }
            let listeners: Vec<StateListener> = {
                let registered = self.inner.listeners.lock();
                registered.iter().map(|(_, cb)| Arc::clone(cb)).collect()
            };
            for listener in listeners {
                listener(self, old, new);
            }
            let (note, failed) = {
                let mut cell = self.inner.cell.lock();
                let note = if cell.transition.is_some() {
                    // A live transition chases its own follow-ups on
                    // completion.
                    None
                } else if let Some(next) = cell.next_state.take() {
                    debug!(service = %self.inner.name, %next, "following up with queued state");
                    self.transition_to(&mut cell, next)
                } else if let Some(target) = cell.target_state.filter(|t| *t != cell.state) {
                    debug!(service = %self.inner.name, %target, "resuming pursuit of target state");
                    self.transition_to(&mut cell, target)
                } else {
                    None
                };
                (note, cell.spawn_failure.take())
            };
            queue.extend(note);
            if let Some(err) = failed {
                queue.extend(self.fail_now(err));
            }
        }
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Non-owning reference to a service, handed to workers via
/// [`Worker::attach`].
///
/// Holds a weak reference: a handle outliving its service simply stops
/// resolving instead of keeping the service alive.
#[derive(Clone)]
pub struct ServiceHandle {
    inner: Weak<Inner>,
}

impl ServiceHandle {
    pub fn upgrade(&self) -> Option<Service> {
        self.inner.upgrade().map(|inner| Service { inner })
    }

    pub fn name(&self) -> Option<String> {
        self.inner.upgrade().map(|inner| inner.name.clone())
    }

    pub fn state(&self) -> Option<State> {
        self.upgrade().map(|service| service.state())
    }

    /// Report a failure from a worker-internal thread. No-op once the
    /// service is gone.
    pub fn set_exception(&self, error: anyhow::Error) {
        if let Some(service) = self.upgrade() {
            service.set_exception(error);
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
