// SPDX-License-Identifier: AGPL-3.0-or-later

use std::{net::SocketAddr, time::Duration};

use navicore_rs::{
    cfg::{cli::CliArgs, config::ServerConfig},
    server::{Route, run_server},
    shutdown::ShutdownState,
};
use tokio::{net::TcpListener, task::JoinHandle};

/// Binds an ephemeral port, loads a minimal config pointing at it, and
/// spawns `run_server` with `routes`. Returns the resolved address, a
/// shutdown handle the caller must trigger, and the server task's handle.
pub async fn start_server(
    routes: Vec<Route>,
) -> (SocketAddr, ShutdownState, JoinHandle<anyhow::Result<()>>) {
    let probe = TcpListener::bind("127.0.0.1:0").await.expect("bind probe listener");
    let addr = probe.local_addr().expect("probe local_addr");
    drop(probe);

    let cfg = ServerConfig::load_from_str(&format!(
        "sections:\n  - path: ns/servers/default\n    entries:\n      - [listen, \"{addr}\"]\n"
    ))
    .expect("parse test config");

    let args = CliArgs::default();
    let shutdown = ShutdownState::new();
    let shutdown_for_server = shutdown.clone();
    let handle =
        tokio::spawn(async move { run_server(&args, &cfg, shutdown_for_server, routes).await });

    // give the accept loop a moment to start listening before tests connect
    tokio::time::sleep(Duration::from_millis(30)).await;
    (addr, shutdown, handle)
}

pub async fn stop_server(shutdown: ShutdownState, handle: JoinHandle<anyhow::Result<()>>) {
    shutdown.trigger();
    handle.await.expect("server task panicked").expect("server returned an error");
}
