// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Exercises the driver, url space, and dispatcher together without going
// through `server::run_server`, so the registered route can carry a context
// constraint (`server::Route` has no constraint field).

use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use navicore_rs::{
    conn::{Dispatcher, FilterChain, OpHandler, Request},
    driver::{Driver, TcpDriver},
    urlspace::{ChannelFlags, ContextSpec, RequestContext, UrlSpace},
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

async fn free_addr() -> SocketAddr {
    let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind probe");
    probe.local_addr().expect("probe local_addr")
}

async fn accept_and_dispatch_once(
    driver: Arc<TcpDriver>,
    urlspace: Arc<UrlSpace<OpHandler>>,
    dispatcher: Arc<Dispatcher>,
) -> bool {
    let sock = driver.accept().await.expect("accept");
    let mut buf = [0u8; 512];
    let n = driver.recv(&sock, &mut buf).await.expect("recv");
    let line = String::from_utf8_lossy(&buf[..n]).lines().next().unwrap_or_default().to_string();
    let request = Request::parse_line(&line, &Default::default()).expect("parse request line");
    let ctx = RequestContext {
        peer: Some(sock.peer.ip()),
        headers: None,
    };
    let reached = dispatcher.dispatch(&urlspace, &request, &ctx).await.is_ok();
    driver.close(&sock).await.expect("close");
    reached
}

#[tokio::test]
async fn route_scoped_to_matching_subnet_is_reached_from_loopback() {
    let addr = free_addr().await;
    let driver = Arc::new(TcpDriver::new(CancellationToken::new()));
    driver.listen(addr).await.expect("listen");

    let urlspace: Arc<UrlSpace<OpHandler>> = Arc::new(UrlSpace::new());
    let junction = urlspace.alloc();

    let hits = Arc::new(AtomicUsize::new(0));
    let hits2 = hits.clone();
    let loopback = ContextSpec::ipv4_cidr(Ipv4Addr::new(127, 0, 0, 0), 8);
    urlspace
        .set(
            junction,
            "GET",
            "/only-local",
            Arc::new(move |_req, _ctx| {
                hits2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            false,
            Some(loopback),
            ChannelFlags::empty(),
        )
        .await;

    let dispatcher = Arc::new(Dispatcher::new(junction, FilterChain::new()));
    let accept = tokio::spawn(accept_and_dispatch_once(driver.clone(), urlspace, dispatcher));

    let mut stream = tokio::net::TcpStream::connect(addr).await.expect("connect");
    stream.write_all(b"GET /only-local HTTP/1.1\r\n\r\n").await.expect("write");
    let mut buf = [0u8; 16];
    let _ = stream.read(&mut buf).await;

    let reached = accept.await.expect("accept task panicked");
    assert!(reached, "loopback peer should satisfy a 127.0.0.0/8 constraint");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn route_scoped_to_a_different_subnet_is_unreachable_from_loopback() {
    let addr = free_addr().await;
    let driver = Arc::new(TcpDriver::new(CancellationToken::new()));
    driver.listen(addr).await.expect("listen");

    let urlspace: Arc<UrlSpace<OpHandler>> = Arc::new(UrlSpace::new());
    let junction = urlspace.alloc();

    let unreachable_subnet = ContextSpec::ipv4_cidr(Ipv4Addr::new(10, 0, 0, 0), 8);
    urlspace
        .set(
            junction,
            "GET",
            "/only-local",
            Arc::new(|_req, _ctx| Ok(())),
            false,
            Some(unreachable_subnet),
            ChannelFlags::empty(),
        )
        .await;

    let dispatcher = Arc::new(Dispatcher::new(junction, FilterChain::new()));
    let accept = tokio::spawn(accept_and_dispatch_once(driver.clone(), urlspace, dispatcher));

    let mut stream = tokio::net::TcpStream::connect(addr).await.expect("connect");
    stream.write_all(b"GET /only-local HTTP/1.1\r\n\r\n").await.expect("write");
    let mut buf = [0u8; 16];
    let _ = stream.read(&mut buf).await;

    let reached = accept.await.expect("accept task panicked");
    assert!(!reached, "a 10.0.0.0/8 constraint must not match a loopback peer");

    tokio::time::sleep(Duration::from_millis(5)).await;
}
