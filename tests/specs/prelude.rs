//! Test helpers for behavioral specifications.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, dead_code)]

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

/// Generous ceiling for anything that involves process startup, inotify
/// latency or transition threads.
pub const SPEC_WAIT: Duration = Duration::from_secs(20);

/// Returns the path to the tend binary, checking the llvm-cov target
/// directory first. Falls back to resolving relative to the test binary
/// itself when CARGO_MANIFEST_DIR is stale.
pub fn tend_binary() -> PathBuf {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));

    let llvm_cov_path = manifest_dir.join("target/llvm-cov-target/debug/tend");
    if llvm_cov_path.exists() {
        return llvm_cov_path;
    }

    let standard = manifest_dir.join("target/debug/tend");
    if standard.exists() {
        return standard;
    }

    // The test binary lives at target/debug/deps/specs-<hash>, so its
    // grandparent is target/debug/ where tend is built.
    if let Ok(exe) = std::env::current_exe() {
        if let Some(debug_dir) = exe.parent().and_then(|d| d.parent()) {
            let fallback = debug_dir.join("tend");
            if fallback.exists() {
                return fallback;
            }
        }
    }

    standard
}

/// A project directory with a tend.toml.
pub struct Project {
    pub dir: tempfile::TempDir,
    pub conf: PathBuf,
}

impl Project {
    pub fn new(conf_contents: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("tend.toml");
        std::fs::write(&conf, conf_contents).unwrap();
        Self { dir, conf }
    }

    pub fn rewrite_conf(&self, contents: &str) {
        std::fs::write(&self.conf, contents).unwrap();
    }
}

/// Pick a free TCP port by briefly binding to it.
pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// A running `tend serve` process, killed on drop.
pub struct ServeProcess {
    child: Child,
}

impl ServeProcess {
    pub fn spawn(conf: &Path) -> Self {
        let child = Command::new(tend_binary())
            .arg("serve")
            .arg("--conf")
            .arg(conf)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();
        Self { child }
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn interrupt(&self) {
        nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(self.pid() as i32),
            nix::sys::signal::Signal::SIGINT,
        )
        .unwrap();
    }

    /// Poll until the process exits or the deadline passes.
    pub fn wait_with_timeout(&mut self, timeout: Duration) -> Option<ExitStatus> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Some(status) = self.child.try_wait().unwrap() {
                return Some(status);
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        self.child.try_wait().unwrap()
    }
}

impl Drop for ServeProcess {
    fn drop(&mut self) {
        if self.child.try_wait().ok().flatten().is_none() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// A monitor client connection.
pub struct Monitor {
    reader: BufReader<TcpStream>,
}

impl Monitor {
    /// Connect, retrying while the server starts up.
    pub fn connect(port: u16) -> Self {
        let deadline = Instant::now() + SPEC_WAIT;
        loop {
            match TcpStream::connect(("127.0.0.1", port)) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(SPEC_WAIT)).unwrap();
                    return Self {
                        reader: BufReader::new(stream),
                    };
                }
                Err(_) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(25));
                }
                Err(e) => panic!("could not connect to monitor: {e}"),
            }
        }
    }

    pub fn send(&mut self, verb: &str) {
        let stream = self.reader.get_mut();
        stream.write_all(verb.as_bytes()).unwrap();
        stream.write_all(b"\n").unwrap();
        stream.flush().unwrap();
    }

    fn read_line(&mut self) -> String {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).unwrap();
        assert!(n > 0, "monitor connection closed");
        line.trim_end().to_string()
    }

    /// Read frames until a state snapshot satisfies `predicate`.
    pub fn wait_for_snapshot(
        &mut self,
        predicate: impl Fn(&serde_json::Value) -> bool,
    ) -> serde_json::Value {
        let deadline = Instant::now() + SPEC_WAIT;
        while Instant::now() < deadline {
            let line = self.read_line();
            let value: serde_json::Value = serde_json::from_str(&line).unwrap();
            if value.is_object() && predicate(&value) {
                return value;
            }
        }
        panic!("no matching snapshot before the deadline");
    }

    /// Read frames until the given literal JSON string arrives.
    pub fn wait_for_literal(&mut self, word: &str) {
        let deadline = Instant::now() + SPEC_WAIT;
        while Instant::now() < deadline {
            let line = self.read_line();
            let value: serde_json::Value = serde_json::from_str(&line).unwrap();
            if value.as_str() == Some(word) {
                return;
            }
        }
        panic!("literal {word:?} did not arrive before the deadline");
    }
}

/// True when every state in the snapshot equals `want`.
pub fn all_states_are(snapshot: &serde_json::Value, want: &str) -> bool {
    snapshot
        .as_object()
        .map(|map| !map.is_empty() && map.values().all(|v| v.as_str() == Some(want)))
        .unwrap_or(false)
}
