// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Built-in worker modules.
//!
//! These give the `serve` command something real to run out of the box:
//! `tick` logs a heartbeat, `echo` serves a TCP echo server. An embedding
//! application would register its own modules here.

use anyhow::Context as _;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};
use tend_daemon::{ModuleRegistry, ServeConfig, SourceFiles, WorkerModule, WorkerSet};
use tend_workers::{LoopToken, RunLoop, SimpleWorker, TcpServerWorker};
use tracing::info;

/// The registry served by this binary.
pub fn registry() -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();
    registry.register("tick", TickModule);
    registry.register("echo", EchoModule);
    registry
}

/// Logs a heartbeat at a configurable interval (`[tick] interval_ms`).
struct TickModule;

impl WorkerModule for TickModule {
    fn workers(&mut self, config: &ServeConfig) -> anyhow::Result<WorkerSet> {
        let interval_ms = config
            .module_table("tick")
            .and_then(|table| table.get("interval_ms"))
            .and_then(|value| value.as_integer())
            .unwrap_or(1000);
        let interval = Duration::from_millis(interval_ms.clamp(10, 60_000) as u64);
        Ok(WorkerSet::Single(Box::new(SimpleWorker::new(Tick {
            interval,
        }))))
    }
}

struct Tick {
    interval: Duration,
}

impl RunLoop for Tick {
    fn run(&mut self, token: &LoopToken) -> anyhow::Result<()> {
        let mut due = Instant::now();
        while token.is_running() {
            if Instant::now() >= due {
                info!("tick");
                due = Instant::now() + self.interval;
            }
            // Short naps keep pause() responsive at long intervals.
            std::thread::sleep(Duration::from_millis(25));
        }
        Ok(())
    }
}

/// A TCP echo server (`[echo] bind`, default 127.0.0.1:7878).
struct EchoModule;

impl WorkerModule for EchoModule {
    fn workers(&mut self, config: &ServeConfig) -> anyhow::Result<WorkerSet> {
        let bind = config
            .module_table("echo")
            .and_then(|table| table.get("bind"))
            .and_then(|value| value.as_str())
            .unwrap_or("127.0.0.1:7878");
        let addr: SocketAddr = bind
            .parse()
            .with_context(|| format!("invalid [echo] bind address {bind:?}"))
            .context(SourceFiles(vec![config.conf.clone()]))?;
        Ok(WorkerSet::Single(Box::new(TcpServerWorker::new(
            addr, echo,
        ))))
    }
}

fn echo(mut stream: TcpStream, _peer: SocketAddr) -> anyhow::Result<()> {
    let mut buf = [0u8; 1024];
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Ok(());
        }
        stream.write_all(&buf[..n])?;
    }
}
