// SPDX-License-Identifier: AGPL-3.0-or-later

//! The server's top-level run loop, split out of the `navicored` binary so
//! it can be driven from tests with a caller-supplied [`ShutdownState`] and
//! a list of routes registered into the url space before the accept loop
//! starts.

use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    cfg::{cli::CliArgs, config::ServerConfig},
    conn::{Dispatcher, FilterChain, OpHandler, Request},
    driver::{Driver, Sock, TcpDriver},
    error::ServerError,
    scheduler::Scheduler,
    shutdown::ShutdownState,
    urlspace::{ChannelFlags, RequestContext, UrlSpace},
};

/// One route to register into the url space before the accept loop starts:
/// the request method key, the url pattern, and the handler to invoke.
pub struct Route {
    pub key: String,
    pub url: String,
    pub handler: OpHandler,
}

/// Runs one server instance to completion: binds a [`TcpDriver`], starts the
/// scheduler, and serves connections until `shutdown` fires. `routes` are
/// registered into the fresh url space before the listener starts accepting.
pub async fn run_server(
    args: &CliArgs,
    cfg: &ServerConfig,
    shutdown: ShutdownState,
    routes: Vec<Route>,
) -> Result<()> {
    let server_path = format!("ns/servers/{}", args.server.as_deref().unwrap_or("default"));

    let bind_addr: SocketAddr = cfg
        .section(&server_path)
        .and_then(|s| s.get("listen"))
        .unwrap_or("127.0.0.1:8080")
        .parse()
        .context("invalid listen address in configuration")?;

    let cancel = CancellationToken::new();

    let urlspace: Arc<UrlSpace<OpHandler>> = Arc::new(UrlSpace::new());
    let junction_id = urlspace.alloc();
    for route in routes {
        urlspace
            .set(junction_id, &route.key, &route.url, route.handler, false, None, ChannelFlags::empty())
            .await;
    }

    let dispatcher = Arc::new(Dispatcher::new(junction_id, FilterChain::new()));
    let driver: Arc<dyn Driver> = Arc::new(TcpDriver::new(cancel.clone()));
    driver.listen(bind_addr).await.context("failed to bind listener")?;
    info!(%bind_addr, "listening");

    let scheduler = Scheduler::new();
    let scheduler_task = tokio::spawn(scheduler.run(shutdown.clone()));

    let accept_shutdown = shutdown.clone();
    let accept_loop = tokio::spawn(accept_loop(driver, urlspace, dispatcher, accept_shutdown));

    shutdown.wait().await;
    cancel.cancel();

    let _ = accept_loop.await;
    let _ = scheduler_task.await;
    Ok(())
}

async fn accept_loop(
    driver: Arc<dyn Driver>,
    urlspace: Arc<UrlSpace<OpHandler>>,
    dispatcher: Arc<Dispatcher>,
    shutdown: ShutdownState,
) {
    loop {
        tokio::select! {
            () = shutdown.wait() => return,
            accepted = driver.accept() => {
                let sock = match accepted {
                    Ok(sock) => sock,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    },
                };
                let driver = driver.clone();
                let urlspace = urlspace.clone();
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(driver, urlspace, dispatcher, sock).await {
                        warn!(error = %e, "connection error");
                    }
                });
            }
        }
    }
}

async fn serve_connection(
    driver: Arc<dyn Driver>,
    urlspace: Arc<UrlSpace<OpHandler>>,
    dispatcher: Arc<Dispatcher>,
    sock: Arc<Sock>,
) -> Result<()> {
    let mut buf = vec![0u8; 8192];
    let n = driver.recv(&sock, &mut buf).await?;
    if n == 0 {
        return Ok(());
    }
    let raw = String::from_utf8_lossy(&buf[..n]);
    let line = raw.lines().next().unwrap_or_default();

    let request = match Request::parse_line(line, &Default::default()) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "malformed request line");
            return driver.close(&sock).await;
        },
    };

    let ctx = RequestContext {
        peer: Some(sock.peer.ip()),
        headers: None,
    };

    match dispatcher.dispatch(&urlspace, &request, &ctx).await {
        Ok(()) => {},
        Err(ServerError::EndData) => {
            let body = b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n";
            driver.send(&sock, &bytes::Bytes::from_static(body)).await?;
        },
        Err(e) => {
            error!(error = %e, "dispatch failed");
        },
    }
    driver.close(&sock).await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpStream,
    };

    use super::*;

    #[tokio::test]
    async fn run_server_serves_an_init_registered_route_then_shuts_down() {
        let cfg = ServerConfig::load_from_str(
            r#"
sections:
  - path: ns/servers/default
    entries:
      - [listen, "127.0.0.1:0"]
"#,
        )
        .unwrap();
        // port 0 means "any free port"; bind first to discover it, then
        // rebuild the config with the resolved address so the test client
        // can connect deterministically.
        let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);
        let cfg = ServerConfig::load_from_str(&format!(
            "sections:\n  - path: ns/servers/default\n    entries:\n      - [listen, \"{addr}\"]\n"
        ))
        .unwrap();

        let args = CliArgs::default();
        let shutdown = ShutdownState::new();
        let shutdown2 = shutdown.clone();
        let routes = vec![Route {
            key: "GET".to_string(),
            url: "/healthz".to_string(),
            handler: Arc::new(|_req, _ctx| Ok(())),
        }];

        let server = tokio::spawn(async move { run_server(&args, &cfg, shutdown2, routes).await });

        tokio::time::sleep(Duration::from_millis(30)).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"GET /healthz HTTP/1.1\r\n\r\n").await.unwrap();
        let mut buf = [0u8; 16];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(n, 0, "handler returning Ok closes the connection with no body");

        shutdown.trigger();
        server.await.unwrap().unwrap();
    }
}
