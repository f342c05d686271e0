// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use tend_core::test_support::ProbeWorker;

struct FixedModule {
    shape: fn() -> WorkerSet,
    sources: Vec<PathBuf>,
}

impl WorkerModule for FixedModule {
    fn workers(&mut self, _config: &ServeConfig) -> anyhow::Result<WorkerSet> {
        Ok((self.shape)())
    }

    fn source_files(&self) -> Vec<PathBuf> {
        self.sources.clone()
    }
}

struct BrokenModule;

impl WorkerModule for BrokenModule {
    fn workers(&mut self, _config: &ServeConfig) -> anyhow::Result<WorkerSet> {
        Err(anyhow::anyhow!("boom"))
            .context(SourceFiles(vec![PathBuf::from("/srv/broken/module.rs")]))
    }
}

fn probe() -> Box<dyn Worker> {
    Box::new(ProbeWorker::new())
}

fn named(names: &[&str]) -> WorkerSet {
    WorkerSet::Named(
        names
            .iter()
            .map(|n| (n.to_string(), probe()))
            .collect::<IndexMap<_, _>>(),
    )
}

fn config_with_modules(modules: &[&str]) -> (tempfile::TempDir, ServeConfig) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tend.toml");
    let list = modules
        .iter()
        .map(|m| format!("{m:?}"))
        .collect::<Vec<_>>()
        .join(", ");
    std::fs::write(&path, format!("[serve]\nmodules = [{list}]\n")).unwrap();
    let config = crate::config::ServeConfig::load(&path).unwrap();
    (dir, config)
}

#[test]
fn single_worker_takes_the_module_name() {
    let mut registry = ModuleRegistry::new();
    registry.register(
        "tick",
        FixedModule {
            shape: || WorkerSet::Single(Box::new(ProbeWorker::new())),
            sources: vec![],
        },
    );
    let (_dir, config) = config_with_modules(&["tick"]);

    let collected = registry.collect(&config).unwrap();
    let names: Vec<&str> = collected.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["tick"]);
}

#[test]
fn single_element_list_collapses_to_the_module_name() {
    let mut registry = ModuleRegistry::new();
    registry.register(
        "tick",
        FixedModule {
            shape: || WorkerSet::List(vec![Box::new(ProbeWorker::new())]),
            sources: vec![],
        },
    );
    let (_dir, config) = config_with_modules(&["tick"]);

    let collected = registry.collect(&config).unwrap();
    assert_eq!(collected[0].0, "tick");
}

#[test]
fn lists_are_indexed() {
    let mut registry = ModuleRegistry::new();
    registry.register(
        "pool",
        FixedModule {
            shape: || {
                WorkerSet::List(vec![
                    Box::new(ProbeWorker::new()),
                    Box::new(ProbeWorker::new()),
                    Box::new(ProbeWorker::new()),
                ])
            },
            sources: vec![],
        },
    );
    let (_dir, config) = config_with_modules(&["pool"]);

    let collected = registry.collect(&config).unwrap();
    let names: Vec<&str> = collected.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["pool:0", "pool:1", "pool:2"]);
}

#[test]
fn named_workers_are_prefixed_and_ordered() {
    let mut registry = ModuleRegistry::new();
    registry.register(
        "web",
        FixedModule {
            shape: || named(&["api", "admin"]),
            sources: vec![],
        },
    );
    let (_dir, config) = config_with_modules(&["web"]);

    let collected = registry.collect(&config).unwrap();
    let names: Vec<&str> = collected.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["web:api", "web:admin"]);
}

#[test]
fn selector_subset_filters_named_workers() {
    let mut registry = ModuleRegistry::new();
    registry.register(
        "web",
        FixedModule {
            shape: || named(&["api", "admin", "metrics"]),
            sources: vec![],
        },
    );
    let (_dir, config) = config_with_modules(&["web:api,metrics"]);

    let collected = registry.collect(&config).unwrap();
    let names: Vec<&str> = collected.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["web:api", "web:metrics"]);
}

#[test]
fn unknown_module_is_an_error() {
    let mut registry = ModuleRegistry::new();
    let (_dir, config) = config_with_modules(&["ghost"]);

    let err = registry.collect(&config).unwrap_err();
    assert!(err.to_string().contains("ghost"));
}

#[test]
fn factory_errors_carry_their_source_files() {
    let mut registry = ModuleRegistry::new();
    registry.register("broken", BrokenModule);
    let (_dir, config) = config_with_modules(&["broken"]);

    let err = registry.collect(&config).unwrap_err();
    assert_eq!(
        involved_files(&err),
        vec![PathBuf::from("/srv/broken/module.rs")]
    );
}

#[test]
fn source_files_are_tagged_with_module_names() {
    let mut registry = ModuleRegistry::new();
    registry.register(
        "tick",
        FixedModule {
            shape: || WorkerSet::Single(Box::new(ProbeWorker::new())),
            sources: vec![PathBuf::from("/srv/tick/mod.rs")],
        },
    );

    assert_eq!(
        registry.source_files(),
        vec![(PathBuf::from("/srv/tick/mod.rs"), "tick".to_string())]
    );
}
