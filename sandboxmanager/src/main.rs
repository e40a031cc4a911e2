/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! The SandboxManager emulates the control plane a managed serverless
//! function negotiates with its platform: it supervises one function
//! runtime and its extension agents through their lifecycle, accepts
//! invocations on a public endpoint, and drives them through the init
//! and invoke rendezvous flows.
//!
//! * Serve the runtime API for the function process and the extensions
//!   API for its agents.
//! * Serve the standalone surface for callers: invoke and shutdown.
//! * Keep all entity state in the registration service and let the
//!   supervisor coordinate the phases.

use anyhow::Result;
use clap::Parser;
use sandboxmanager::config::Config;
use sandboxmanager::manager;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Sandbox manager command line arguments
#[derive(Parser, Debug)]
#[command(name = "sandboxmanager")]
#[command(about = "Local emulator for the managed serverless function runtime")]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/sandboxmanager/config.yaml")]
    config: PathBuf,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Initialize logging with the specified level
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("sandboxmanager={},warn", level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level)?;

    match Config::load(&args.config) {
        Ok(config) => {
            info!("loaded config from {:?}", args.config);
            Config::set_global(config);
        }
        Err(error) => {
            warn!(%error, "could not load config, using defaults");
            Config::set_global(Config::default());
        }
    }

    info!("starting sandbox manager");
    manager::initialize().await.map_err(|e| anyhow::anyhow!(e))
}
