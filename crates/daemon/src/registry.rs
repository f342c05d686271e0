// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The module registry that produces workers.
//!
//! The embedding application registers [`WorkerModule`] factories by
//! name; the controller pulls workers out of them when the configuration
//! selects a module. Modules declare the source files behind them so the
//! change detector can watch them without runtime reflection.

use crate::config::{ModuleSelector, ServeConfig};
use anyhow::Context;
use indexmap::IndexMap;
use std::fmt;
use std::path::PathBuf;
use tend_core::Worker;

/// What one module contributes to the served worker set.
pub enum WorkerSet {
    /// One worker, served under the module's own name.
    Single(Box<dyn Worker>),
    /// Workers served as `module:0`, `module:1`, ... (a single-element
    /// list collapses to the module name).
    List(Vec<Box<dyn Worker>>),
    /// Workers served as `module:name`, filterable by the selector.
    Named(IndexMap<String, Box<dyn Worker>>),
}

/// A named factory for workers.
pub trait WorkerModule: Send {
    /// Build this module's workers. Called once per controller life;
    /// failures surface through the lifecycle call that triggered
    /// initialization. Attach a [`SourceFiles`] context to errors caused
    /// by a specific file so autoreload can watch it.
    fn workers(&mut self, config: &ServeConfig) -> anyhow::Result<WorkerSet>;

    /// Files implementing this module, observed by the change detector.
    fn source_files(&self) -> Vec<PathBuf> {
        Vec::new()
    }
}

/// Ordered collection of registered modules.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: IndexMap<String, Box<dyn WorkerModule>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, module: impl WorkerModule + 'static) {
        self.modules.insert(name.into(), Box::new(module));
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Every module's declared source files, tagged with the module name.
    pub fn source_files(&self) -> Vec<(PathBuf, String)> {
        self.modules
            .iter()
            .flat_map(|(name, module)| {
                module
                    .source_files()
                    .into_iter()
                    .map(|file| (file, name.clone()))
            })
            .collect()
    }

    /// Produce the `(service name, worker)` list for the configured
    /// selectors, in configuration order.
    pub fn collect(
        &mut self,
        config: &ServeConfig,
    ) -> anyhow::Result<Vec<(String, Box<dyn Worker>)>> {
        let mut collected: Vec<(String, Box<dyn Worker>)> = Vec::new();
        for selector in &config.modules {
            let module = self
                .modules
                .get_mut(&selector.module)
                .ok_or_else(|| anyhow::anyhow!("unknown module {:?}", selector.module))?;
            let set = module
                .workers(config)
                .with_context(|| format!("loading workers from module {:?}", selector.module))?;
            match set {
                WorkerSet::Single(worker) => collected.push((selector.module.clone(), worker)),
                WorkerSet::List(mut workers) if workers.len() == 1 => {
                    if let Some(worker) = workers.pop() {
                        collected.push((selector.module.clone(), worker));
                    }
                }
                WorkerSet::List(workers) => {
                    for (index, worker) in workers.into_iter().enumerate() {
                        collected.push((format!("{}:{index}", selector.module), worker));
                    }
                }
                WorkerSet::Named(workers) => {
                    for (name, worker) in workers {
                        if !selector.includes(&name) {
                            continue;
                        }
                        collected.push((format!("{}:{name}", selector.module), worker));
                    }
                }
            }
        }
        Ok(collected)
    }
}

/// Error context naming the files behind a failure, mined by autoreload
/// recovery to decide what to watch for the retry.
#[derive(Debug)]
pub struct SourceFiles(pub Vec<PathBuf>);

impl fmt::Display for SourceFiles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "involves ")?;
        for (i, file) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", file.display())?;
        }
        Ok(())
    }
}

impl std::error::Error for SourceFiles {}

/// The files named by the error's [`SourceFiles`] context, if any. When
/// several contexts are attached, the outermost one wins.
pub fn involved_files(error: &anyhow::Error) -> Vec<PathBuf> {
    error
        .downcast_ref::<SourceFiles>()
        .map(|files| files.0.clone())
        .unwrap_or_default()
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
