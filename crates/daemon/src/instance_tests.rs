// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::controller::controller_loop;
use crate::registry::{ModuleRegistry, WorkerSet};
use std::path::PathBuf;
use tend_core::test_support::ProbeWorker;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const WAIT: std::time::Duration = std::time::Duration::from_secs(10);

struct ProbeModule;

impl crate::registry::WorkerModule for ProbeModule {
    fn workers(&mut self, _config: &ServeConfig) -> anyhow::Result<WorkerSet> {
        Ok(WorkerSet::Single(Box::new(ProbeWorker::new())))
    }
}

struct Launched {
    instance: ServerInstance,
    controller: tokio::task::JoinHandle<u8>,
    conf: PathBuf,
    _dir: tempfile::TempDir,
}

fn launch(autoreload: bool, monitor: Option<MonitorHub>) -> Launched {
    let dir = tempfile::tempdir().unwrap();
    let conf = dir.path().join("tend.toml");
    std::fs::write(&conf, "[serve]\nmodules = [\"probe\"]\n").unwrap();

    let mut registry = ModuleRegistry::new();
    registry.register("probe", ProbeModule);

    let (parent_io, child_io) = tokio::io::duplex(1 << 16);
    let (parent_read, parent_write) = tokio::io::split(parent_io);
    let (child_read, child_write) = tokio::io::split(child_io);
    let controller = tokio::spawn(controller_loop(
        conf.clone(),
        autoreload,
        registry,
        child_read,
        child_write,
    ));
    let (gateway, events) = Gateway::over(parent_read, parent_write, None);
    let instance = ServerInstance::over(autoreload, gateway, events, monitor);
    Launched {
        instance,
        controller,
        conf,
        _dir: dir,
    }
}

#[tokio::test]
async fn monitor_stop_winds_the_instance_down_without_reload() {
    let hub = MonitorHub::bind("127.0.0.1:0").await.unwrap();
    let launched = launch(false, Some(hub.clone()));
    let running = tokio::spawn(launched.instance.run_until_stopped());

    // Wait for the started snapshot, then ask for a stop over TCP.
    let client = TcpStream::connect(hub.addr()).await.unwrap();
    let (read_half, mut write_half) = client.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = tokio::time::timeout(WAIT, lines.next_line())
            .await
            .expect("timed out waiting for a snapshot")
            .unwrap()
            .expect("connection closed early");
        let states: serde_json::Value = serde_json::from_str(&line).unwrap();
        if states.get("probe").and_then(|v| v.as_str()) == Some("running") {
            break;
        }
    }

    write_half.write_all(b"stop\n").await.unwrap();

    // Snapshots continue until everything is stopped.
    loop {
        let line = tokio::time::timeout(WAIT, lines.next_line())
            .await
            .expect("timed out waiting for the stopped snapshot")
            .unwrap()
            .expect("connection closed early");
        let states: serde_json::Value = serde_json::from_str(&line).unwrap();
        if states.get("probe").and_then(|v| v.as_str()) == Some("stopped") {
            break;
        }
    }

    let outcome = tokio::time::timeout(WAIT, running)
        .await
        .expect("instance did not finish")
        .unwrap()
        .unwrap();
    assert!(!outcome.reload);
    assert_eq!(launched.controller.await.unwrap(), 0);
}

#[tokio::test]
async fn restart_event_yields_a_reload_outcome() {
    let launched = launch(true, None);
    let running = tokio::spawn(launched.instance.run_until_stopped());

    // Give startup a moment, then touch the watched configuration.
    tokio::time::sleep(std::time::Duration::from_millis(400)).await;
    std::fs::write(&launched.conf, "[serve]\nmodules = [\"probe\"]\n# edit\n").unwrap();

    let outcome = tokio::time::timeout(WAIT, running)
        .await
        .expect("instance did not finish")
        .unwrap()
        .unwrap();
    assert!(outcome.reload);
    assert_eq!(launched.controller.await.unwrap(), 0);
}

#[tokio::test]
async fn unexpected_controller_death_is_an_error() {
    let launched = launch(false, None);
    let running = tokio::spawn(launched.instance.run_until_stopped());

    // Wait until startup finished, then kill the controller loop without
    // any stop sequence; the severed pipe must surface as an error.
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    launched.controller.abort();

    let result = tokio::time::timeout(WAIT, running)
        .await
        .expect("instance did not finish")
        .unwrap();
    match result {
        Err(ServeError::ChildDied { .. }) => {}
        other => panic!("expected ChildDied, got {other:?}"),
    }
}

#[tokio::test]
async fn states_settling_on_their_own_end_the_instance() {
    // A worker that reaches Running and is then stopped by the monitor
    // command path is covered above; here services that immediately fail
    // land in a terminal state and the instance winds itself down.
    struct FailingModule;
    impl crate::registry::WorkerModule for FailingModule {
        fn workers(&mut self, _config: &ServeConfig) -> anyhow::Result<WorkerSet> {
            Ok(WorkerSet::Single(Box::new(
                tend_core::test_support::ProbeWorker::new().failing_in("start"),
            )))
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let conf = dir.path().join("tend.toml");
    std::fs::write(&conf, "[serve]\nmodules = [\"fail\"]\n").unwrap();
    let mut registry = ModuleRegistry::new();
    registry.register("fail", FailingModule);

    let (parent_io, child_io) = tokio::io::duplex(1 << 16);
    let (parent_read, parent_write) = tokio::io::split(parent_io);
    let (child_read, child_write) = tokio::io::split(child_io);
    let controller = tokio::spawn(controller_loop(
        conf,
        false,
        registry,
        child_read,
        child_write,
    ));
    let (gateway, events) = Gateway::over(parent_read, parent_write, None);
    let instance = ServerInstance::over(false, gateway, events, None);

    let outcome = tokio::time::timeout(WAIT, instance.run_until_stopped())
        .await
        .expect("instance did not finish")
        .unwrap();
    assert!(!outcome.reload);
    assert_eq!(controller.await.unwrap(), 0);
}
