// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Recursive filesystem change detection.
//!
//! Files of interest are registered with [`ChangeDetector::observe`];
//! their parent directories are watched recursively, and overlapping
//! watches are coalesced so no two observed directories are in an
//! ancestor relationship. Callbacks fire for events touching an observed
//! file and for newly created files that look like the observed ones.
//!
//! A background sweep re-runs registered source providers every
//! [`SWEEP_INTERVAL`] so files that appear after startup get picked up
//! without explicit registration calls.

use crate::error::ServeError;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, warn};

/// How often source providers are re-swept for new files.
pub const SWEEP_INTERVAL: Duration = Duration::from_millis(500);

type DetectorCallback = Arc<dyn Fn(&Path, &BTreeSet<String>) + Send + Sync>;
type SourceProvider = Arc<dyn Fn() -> Vec<(PathBuf, Option<String>)> + Send + Sync>;

/// Token returned by [`ChangeDetector::add_callback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

/// Watches registered files for changes and notifies callbacks with
/// `(path, tags)`. Cloning yields another handle onto the same detector.
#[derive(Clone)]
pub struct ChangeDetector {
    inner: Arc<DetectorInner>,
}

/// Non-owning detector reference for use inside callbacks (a strong
/// reference there would keep the detector alive through itself).
#[derive(Clone)]
pub struct DetectorHandle {
    inner: Weak<DetectorInner>,
}

struct DetectorInner {
    running: AtomicBool,
    watcher: Mutex<Option<RecommendedWatcher>>,
    observed: Mutex<Observed>,
    callbacks: Mutex<Vec<(CallbackId, DetectorCallback)>>,
    next_callback_id: AtomicU64,
    providers: Mutex<Vec<SourceProvider>>,
    sweep: Arc<SweepSignal>,
}

#[derive(Default)]
struct Observed {
    files: HashSet<PathBuf>,
    dirs: HashSet<PathBuf>,
    tags: HashMap<PathBuf, BTreeSet<String>>,
}

#[derive(Default)]
struct SweepSignal {
    stopped: Mutex<bool>,
    signal: Condvar,
}

impl ChangeDetector {
    /// Start a detector: the watcher thread and the source sweep begin
    /// immediately.
    pub fn new() -> Result<Self, ServeError> {
        let inner = Arc::new(DetectorInner {
            running: AtomicBool::new(true),
            watcher: Mutex::new(None),
            observed: Mutex::new(Observed::default()),
            callbacks: Mutex::new(Vec::new()),
            next_callback_id: AtomicU64::new(0),
            providers: Mutex::new(Vec::new()),
            sweep: Arc::new(SweepSignal::default()),
        });

        let weak = Arc::downgrade(&inner);
        let watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
            match result {
                Ok(event) => {
                    if let Some(inner) = weak.upgrade() {
                        route(&inner, &event);
                    }
                }
                Err(e) => warn!(error = %e, "watch error"),
            }
        })?;
        *inner.watcher.lock() = Some(watcher);

        let weak = Arc::downgrade(&inner);
        let sweep = Arc::clone(&inner.sweep);
        std::thread::Builder::new()
            .name("change-sweep".to_string())
            .spawn(move || sweep_loop(&weak, &sweep))?;

        Ok(Self { inner })
    }

    /// Record a file of interest, optionally associated with a tag (a
    /// module name). Walks up from `path` to the nearest existing file
    /// and canonicalizes; paths with no existing file ancestor are
    /// ignored until a later sweep finds them.
    pub fn observe(&self, path: &Path, tag: Option<&str>) {
        let mut file = path.to_path_buf();
        while !file.is_file() {
            match file.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => file = parent.to_path_buf(),
                _ => return,
            }
        }
        let Ok(file) = file.canonicalize() else { return };
        let Some(dir) = file.parent().map(Path::to_path_buf) else {
            return;
        };

        // Decide under the observer lock, but never hold it across
        // watch/unwatch: those round-trip through the event thread, and
        // event routing takes this lock.
        let to_unschedule = {
            let mut observed = self.inner.observed.lock();
            if let Some(tag) = tag {
                observed
                    .tags
                    .entry(file.clone())
                    .or_default()
                    .insert(tag.to_string());
            }
            if !observed.files.insert(file.clone()) {
                return;
            }
            debug!(file = %file.display(), "observing");
            if observed.dirs.contains(&dir) {
                return;
            }
            if !self.inner.running.load(Ordering::SeqCst) {
                return;
            }
            let mut to_unschedule = Vec::new();
            for other in observed.dirs.clone() {
                if dir.starts_with(&other) {
                    // An ancestor is already watched recursively.
                    return;
                }
                if other.starts_with(&dir) {
                    debug!(
                        unscheduled = %other.display(),
                        favored = %dir.display(),
                        "coalescing watches"
                    );
                    observed.dirs.remove(&other);
                    to_unschedule.push(other);
                }
            }
            observed.dirs.insert(dir.clone());
            to_unschedule
        };

        let mut watcher_slot = self.inner.watcher.lock();
        let Some(watcher) = watcher_slot.as_mut() else {
            return;
        };
        for other in to_unschedule {
            if let Err(e) = watcher.unwatch(&other) {
                warn!(dir = %other.display(), error = %e, "failed to unschedule watch");
            }
        }
        debug!(dir = %dir.display(), "scheduling watch");
        if let Err(e) = watcher.watch(&dir, RecursiveMode::Recursive) {
            warn!(dir = %dir.display(), error = %e, "failed to schedule watch");
            self.inner.observed.lock().dirs.remove(&dir);
        }
    }

    /// Register a callback receiving `(changed path, tags)`.
    pub fn add_callback<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&Path, &BTreeSet<String>) + Send + Sync + 'static,
    {
        let id = CallbackId(self.inner.next_callback_id.fetch_add(1, Ordering::Relaxed));
        self.inner.callbacks.lock().push((id, Arc::new(callback)));
        id
    }

    /// Remove a previously registered callback. Unknown ids are ignored.
    pub fn remove_callback(&self, id: CallbackId) {
        self.inner.callbacks.lock().retain(|(cid, _)| *cid != id);
    }

    pub fn clear_callbacks(&self) {
        self.inner.callbacks.lock().clear();
    }

    /// Register a provider of `(path, tag)` pairs, re-run by the sweep so
    /// late-appearing files are observed without further calls.
    pub fn add_source_provider<F>(&self, provider: F)
    where
        F: Fn() -> Vec<(PathBuf, Option<String>)> + Send + Sync + 'static,
    {
        self.inner.providers.lock().push(Arc::new(provider));
        self.inner.sweep.signal.notify_all();
    }

    /// Stop delivering events and halt the sweep. The underlying watches
    /// are released when the last detector handle drops. Safe to call
    /// more than once, from any thread.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        let mut stopped = self.inner.sweep.stopped.lock();
        *stopped = true;
        self.inner.sweep.signal.notify_all();
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Non-owning handle for use inside callbacks.
    pub fn handle(&self) -> DetectorHandle {
        DetectorHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// The currently observed files (canonicalized).
    pub fn observed_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self.inner.observed.lock().files.iter().cloned().collect();
        files.sort();
        files
    }

    /// The currently watched directories. Invariant: no element is an
    /// ancestor of another.
    pub fn observed_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = self.inner.observed.lock().dirs.iter().cloned().collect();
        dirs.sort();
        dirs
    }
}

impl DetectorHandle {
    pub fn stop(&self) {
        if let Some(inner) = self.inner.upgrade() {
            ChangeDetector { inner }.stop();
        }
    }

    pub fn observe(&self, path: &Path, tag: Option<&str>) {
        if let Some(inner) = self.inner.upgrade() {
            ChangeDetector { inner }.observe(path, tag);
        }
    }
}

impl Drop for DetectorInner {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        {
            let mut stopped = self.sweep.stopped.lock();
            *stopped = true;
            self.sweep.signal.notify_all();
        }
        // Dropping the watcher joins its event thread; hand it to a
        // helper thread in case this drop is running on that thread.
        if let Some(watcher) = self.watcher.get_mut().take() {
            if std::thread::Builder::new()
                .name("watcher-drop".to_string())
                .spawn(move || drop(watcher))
                .is_err()
            {
                warn!("failed to spawn watcher teardown thread");
            }
        }
    }
}

/// Deliver one filesystem event to the registered callbacks.
fn route(inner: &Arc<DetectorInner>, event: &notify::Event) {
    if !inner.running.load(Ordering::SeqCst) {
        return;
    }
    let created = matches!(event.kind, EventKind::Create(_));
    for path in &event.paths {
        if path.is_dir() {
            continue;
        }
        let tags = {
            let observed = inner.observed.lock();
            if observed.files.contains(path) {
                debug!(path = %path.display(), "file changed");
                Some(observed.tags.get(path).cloned().unwrap_or_default())
            } else if created && matches_observed_shape(&observed, path) {
                debug!(path = %path.display(), "new file");
                Some(BTreeSet::new())
            } else {
                None
            }
        };
        let Some(tags) = tags else { continue };
        let callbacks: Vec<DetectorCallback> = {
            let registered = inner.callbacks.lock();
            registered.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        for callback in callbacks {
            callback(path, &tags);
        }
    }
}

/// A created file is interesting when its extension matches one of the
/// files already observed.
fn matches_observed_shape(observed: &Observed, path: &Path) -> bool {
    observed
        .files
        .iter()
        .any(|file| file.extension() == path.extension())
}

fn sweep_loop(weak: &Weak<DetectorInner>, sweep: &Arc<SweepSignal>) {
    loop {
        {
            let mut stopped = sweep.stopped.lock();
            if !*stopped {
                sweep.signal.wait_for(&mut stopped, SWEEP_INTERVAL);
            }
            if *stopped {
                return;
            }
        }
        let Some(inner) = weak.upgrade() else { return };
        if !inner.running.load(Ordering::SeqCst) {
            return;
        }
        let providers: Vec<SourceProvider> = inner.providers.lock().clone();
        let detector = ChangeDetector { inner };
        for provider in providers {
            for (path, tag) in provider() {
                detector.observe(&path, tag.as_deref());
            }
        }
    }
}

#[cfg(test)]
#[path = "changedetect_tests.rs"]
mod tests;
