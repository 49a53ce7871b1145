// SPDX-License-Identifier: AGPL-3.0-or-later
// Entry point wiring grounded on the teacher's binary
// (examples/Masorubka1-iscsi-client-rs/src/main.rs): resolve config path,
// load config, init logger, then drive the long-running loop.

use std::sync::Arc;

use anyhow::{Context, Result};
use navicore_rs::{
    cfg::{
        cli::{CliArgs, parse_args, resolve_config_path},
        config::ServerConfig,
        logger::{LogConfig, init_logger},
    },
    server::{Route, run_server},
    shutdown::ShutdownState,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let args = parse_args(&argv).context("failed to parse command-line arguments")?;

    let cfg = load_config(&args)?;
    let server_path = format!("ns/servers/{}", args.server.as_deref().unwrap_or("default"));

    let log_cfg = LogConfig {
        level: cfg
            .section(&server_path)
            .and_then(|s| s.get("loglevel"))
            .unwrap_or("info")
            .to_string(),
        ..LogConfig::default()
    };
    let _log_guard = init_logger(&log_cfg)?;

    let shutdown = ShutdownState::new();
    let shutdown_on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            shutdown_on_signal.trigger();
        }
    });

    let routes = vec![Route {
        key: "GET".to_string(),
        url: "/healthz".to_string(),
        handler: Arc::new(|_req, _ctx| Ok(())),
    }];

    run_server(&args, &cfg, shutdown, routes).await
}

fn load_config(args: &CliArgs) -> Result<ServerConfig> {
    match &args.config_path {
        Some(path) => {
            let resolved = resolve_config_path(&path.to_string_lossy())?;
            ServerConfig::load_from_file(resolved)
        },
        None => Ok(ServerConfig::default()),
    }
}
