//! CLI surface specs.

use crate::prelude::*;
use std::process::Command;

fn tend(args: &[&str]) -> std::process::Output {
    Command::new(tend_binary()).args(args).output().unwrap()
}

#[test]
fn help_shows_usage_and_hides_the_controller_entry_point() {
    let output = tend(&["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("Usage:"));
    assert!(stdout.contains("serve"));
    assert!(!stdout.contains("controller"));
}

#[test]
fn serve_help_shows_the_conf_flag() {
    let output = tend(&["serve", "--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("--conf"));
}

#[test]
fn version_shows_the_crate_version() {
    let output = tend(&["--version"]);
    assert!(output.status.success());
    assert!(String::from_utf8(output.stdout).unwrap().contains("0.1"));
}

#[test]
fn no_arguments_is_a_usage_error() {
    let output = tend(&[]);
    assert!(!output.status.success());
    assert!(String::from_utf8(output.stderr).unwrap().contains("Usage:"));
}

#[test]
fn missing_config_file_fails() {
    let output = tend(&["serve", "--conf", "/nonexistent/tend.toml"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("error"), "{stderr}");
}

#[test]
fn config_without_modules_fails() {
    let project = Project::new("[serve]\nautoreload = false\n");
    let output = tend(&["serve", "--conf", project.conf.to_str().unwrap()]);
    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("no modules configured"), "{stderr}");
}
