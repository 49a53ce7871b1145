// SPDX-License-Identifier: AGPL-3.0-or-later

use std::sync::Arc;

use navicore_rs::server::Route;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::integration_tests::common::{start_server, stop_server};

#[tokio::test]
async fn request_for_an_unregistered_url_gets_a_404() {
    let routes = vec![Route {
        key: "GET".to_string(),
        url: "/healthz".to_string(),
        handler: Arc::new(|_req, _ctx| Ok(())),
    }];
    let (addr, shutdown, handle) = start_server(routes).await;

    let mut stream = tokio::net::TcpStream::connect(addr).await.expect("connect");
    stream.write_all(b"GET /does-not-exist HTTP/1.1\r\n\r\n").await.expect("write");
    let mut buf = [0u8; 256];
    let n = stream.read(&mut buf).await.expect("read");
    let response = String::from_utf8_lossy(&buf[..n]);
    assert!(response.starts_with("HTTP/1.1 404"), "unexpected response: {response}");

    stop_server(shutdown, handle).await;
}
