//! End-to-end serve specs: lifecycle, monitor protocol, signals, reload.

use crate::prelude::*;
use serial_test::serial;

fn monitored_conf(port: u16, autoreload: bool, modules: &str) -> String {
    format!(
        "[serve]\nautoreload = {autoreload}\nmodules = [{modules}]\nmonitor = \"127.0.0.1:{port}\"\n\n[tick]\ninterval_ms = 50\n"
    )
}

#[test]
#[serial]
fn monitor_stop_drains_services_and_shuts_down() {
    let port = free_port();
    let project = Project::new(&monitored_conf(port, false, "\"tick\""));
    let mut serve = ServeProcess::spawn(&project.conf);

    let mut monitor = Monitor::connect(port);
    monitor.wait_for_snapshot(|s| all_states_are(s, "running"));

    monitor.send("stop");
    monitor.wait_for_snapshot(|s| all_states_are(s, "stopped"));
    monitor.wait_for_literal("shutting down");

    let status = serve.wait_with_timeout(SPEC_WAIT).expect("serve did not exit");
    assert!(status.success());
}

#[test]
#[serial]
fn interrupt_stops_services_and_exits_zero() {
    let port = free_port();
    let project = Project::new(&monitored_conf(port, false, "\"tick\""));
    let mut serve = ServeProcess::spawn(&project.conf);

    let mut monitor = Monitor::connect(port);
    monitor.wait_for_snapshot(|s| all_states_are(s, "running"));

    serve.interrupt();
    monitor.wait_for_snapshot(|s| all_states_are(s, "stopped"));

    let status = serve.wait_with_timeout(SPEC_WAIT).expect("serve did not exit");
    assert!(status.success(), "{status:?}");
}

#[test]
#[serial]
fn config_change_reloads_and_serves_again() {
    let port = free_port();
    let project = Project::new(&monitored_conf(port, true, "\"tick\""));
    let mut serve = ServeProcess::spawn(&project.conf);

    let mut monitor = Monitor::connect(port);
    monitor.wait_for_snapshot(|s| all_states_are(s, "running"));

    // Touch the watched configuration; the instance restarts and the
    // monitor connection survives the reload.
    std::thread::sleep(std::time::Duration::from_millis(300));
    project.rewrite_conf(&format!(
        "{}# touched\n",
        monitored_conf(port, true, "\"tick\"")
    ));

    monitor.wait_for_literal("reloading");
    monitor.wait_for_snapshot(|s| all_states_are(s, "running"));

    monitor.send("stop");
    monitor.wait_for_literal("shutting down");
    let status = serve.wait_with_timeout(SPEC_WAIT).expect("serve did not exit");
    assert!(status.success());
}

#[test]
#[serial]
fn broken_module_recovers_once_the_config_is_fixed() {
    let port = free_port();
    // "ghost" is not a registered module: initialization fails, but with
    // autoreload on the child waits for a config change instead of dying.
    let project = Project::new(&monitored_conf(port, true, "\"ghost\""));
    let mut serve = ServeProcess::spawn(&project.conf);

    let mut monitor = Monitor::connect(port);
    assert!(
        serve.wait_with_timeout(std::time::Duration::from_secs(2)).is_none(),
        "serve must keep waiting for a fix"
    );

    project.rewrite_conf(&monitored_conf(port, true, "\"tick\""));

    // The child exits with the reload status and the new instance serves.
    monitor.wait_for_snapshot(|s| all_states_are(s, "running"));

    monitor.send("stop");
    monitor.wait_for_literal("shutting down");
    let status = serve.wait_with_timeout(SPEC_WAIT).expect("serve did not exit");
    assert!(status.success());
}

#[test]
#[serial]
fn echo_module_answers_on_its_socket() {
    use std::io::{Read, Write};

    let port = free_port();
    let echo_port = free_port();
    let conf = format!(
        "[serve]\nmodules = [\"echo\"]\nmonitor = \"127.0.0.1:{port}\"\n\n[echo]\nbind = \"127.0.0.1:{echo_port}\"\n"
    );
    let project = Project::new(&conf);
    let mut serve = ServeProcess::spawn(&project.conf);

    let mut monitor = Monitor::connect(port);
    monitor.wait_for_snapshot(|s| all_states_are(s, "running"));

    let mut client = std::net::TcpStream::connect(("127.0.0.1", echo_port)).unwrap();
    client
        .set_read_timeout(Some(std::time::Duration::from_secs(5)))
        .unwrap();
    client.write_all(b"hello").unwrap();
    let mut reply = [0u8; 5];
    client.read_exact(&mut reply).unwrap();
    assert_eq!(&reply, b"hello");

    monitor.send("stop");
    monitor.wait_for_literal("shutting down");
    let status = serve.wait_with_timeout(SPEC_WAIT).expect("serve did not exit");
    assert!(status.success());
}
