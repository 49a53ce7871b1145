// SPDX-License-Identifier: AGPL-3.0-or-later

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use navicore_rs::server::Route;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::integration_tests::common::{start_server, stop_server};

#[tokio::test]
async fn each_registered_route_invokes_its_own_handler() {
    let healthz_hits = Arc::new(AtomicUsize::new(0));
    let version_hits = Arc::new(AtomicUsize::new(0));

    let healthz_hits2 = healthz_hits.clone();
    let version_hits2 = version_hits.clone();
    let routes = vec![
        Route {
            key: "GET".to_string(),
            url: "/healthz".to_string(),
            handler: Arc::new(move |_req, _ctx| {
                healthz_hits2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        },
        Route {
            key: "GET".to_string(),
            url: "/version".to_string(),
            handler: Arc::new(move |_req, _ctx| {
                version_hits2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        },
    ];

    let (addr, shutdown, handle) = start_server(routes).await;

    for path in ["/healthz", "/version", "/healthz"] {
        let mut stream = tokio::net::TcpStream::connect(addr).await.expect("connect");
        stream.write_all(format!("GET {path} HTTP/1.1\r\n\r\n").as_bytes()).await.expect("write");
        let mut buf = [0u8; 16];
        let n = stream.read(&mut buf).await.expect("read");
        assert_eq!(n, 0, "handler returning Ok closes the connection with no body");
    }

    assert_eq!(healthz_hits.load(Ordering::SeqCst), 2);
    assert_eq!(version_hits.load(Ordering::SeqCst), 1);

    stop_server(shutdown, handle).await;
}
