// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! tend: the application server supervisor CLI.
//!
//! `tend serve` runs the supervisor in the foreground. The hidden
//! `controller` subcommand is how the supervisor re-executes this binary
//! as the forked controller child; its stdin/stdout are the RPC pipe, so
//! all logging goes to stderr.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod modules;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tend_daemon::{run_controller, ServeConfig, Server};

#[derive(Parser)]
#[command(name = "tend", version, about = "Application server supervisor")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the application server
    Serve {
        /// Path to the configuration file
        #[arg(long, default_value = "tend.toml")]
        conf: PathBuf,
    },
    /// Controller child entry point (used by `serve`, not for direct use)
    #[command(hide = true)]
    Controller {
        #[arg(long)]
        conf: PathBuf,
        #[arg(long)]
        autoreload: bool,
    },
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    setup_logging();
    match cli.command {
        Commands::Serve { conf } => {
            let config = ServeConfig::load(&conf)?;
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            runtime.block_on(Server::new(config).run())?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Controller { conf, autoreload } => {
            let code = run_controller(conf, autoreload, modules::registry());
            Ok(ExitCode::from(code))
        }
    }
}

fn setup_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
