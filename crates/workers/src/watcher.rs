// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A worker base that watches filesystem paths for changes.

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tend_core::Worker;
use tracing::{debug, warn};

type ChangeCallback = Arc<dyn Fn(&Path) + Send + Sync>;

/// A worker that observes files and directories and invokes a callback
/// with each changed path while running.
///
/// Directory watches are recursive and coalesced: when one configured
/// path contains another, only the outermost directory is scheduled.
pub struct FileWatcherWorker {
    configured: Vec<PathBuf>,
    on_change: ChangeCallback,
    target_files: Vec<PathBuf>,
    target_dirs: Vec<PathBuf>,
    watch_dirs: Vec<PathBuf>,
    watcher: Option<RecommendedWatcher>,
}

impl FileWatcherWorker {
    pub fn new<F>(paths: Vec<PathBuf>, on_change: F) -> Self
    where
        F: Fn(&Path) + Send + Sync + 'static,
    {
        Self {
            configured: paths,
            on_change: Arc::new(on_change),
            target_files: Vec::new(),
            target_dirs: Vec::new(),
            watch_dirs: Vec::new(),
            watcher: None,
        }
    }

    fn schedule(&mut self, dir: PathBuf) {
        for other in &self.watch_dirs {
            if dir.starts_with(other) {
                return;
            }
        }
        self.watch_dirs.retain(|other| {
            if other.starts_with(&dir) {
                debug!(dropped = %other.display(), kept = %dir.display(), "coalescing watch");
                false
            } else {
                true
            }
        });
        self.watch_dirs.push(dir);
    }
}

impl Worker for FileWatcherWorker {
    fn prepare(&mut self) -> anyhow::Result<()> {
        self.target_files.clear();
        self.target_dirs.clear();
        self.watch_dirs.clear();
        for path in self.configured.clone() {
            // Watch events carry canonical paths; compare like with like.
            let path = path.canonicalize().unwrap_or(path);
            if path.is_file() {
                let dir = path
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| path.clone());
                self.target_files.push(path);
                self.schedule(dir);
            } else if path.is_dir() {
                self.target_dirs.push(path.clone());
                self.schedule(path);
            } else {
                warn!(path = %path.display(), "cannot watch: path does not exist");
            }
        }
        Ok(())
    }

    fn start(&mut self) -> anyhow::Result<()> {
        let files = Arc::new(self.target_files.clone());
        let dirs = Arc::new(self.target_dirs.clone());
        let on_change = Arc::clone(&self.on_change);
        let mut watcher =
            notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
                let event = match result {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "watch error");
                        return;
                    }
                };
                for path in &event.paths {
                    let relevant = files.contains(path)
                        || dirs.iter().any(|dir| path.starts_with(dir));
                    if relevant {
                        on_change(path);
                    }
                }
            })?;
        for dir in &self.watch_dirs {
            watcher.watch(dir, RecursiveMode::Recursive)?;
        }
        self.watcher = Some(watcher);
        Ok(())
    }

    fn pause(&mut self) -> anyhow::Result<()> {
        self.watcher = None;
        Ok(())
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn cleanup(&mut self, _cause: &anyhow::Error) {
        self.watcher = None;
    }
}

#[cfg(test)]
#[path = "watcher_tests.rs"]
mod tests;
