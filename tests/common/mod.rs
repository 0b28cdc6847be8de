//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use hostalias::admin::AdminClient;
use hostalias::config::{Config, Directive};

/// Start a simple mock backend that returns a fixed response.
pub async fn start_mock_backend(addr: SocketAddr, response: &'static str) {
    serve(addr, move |_| response.to_string()).await;
}

/// Start a backend that answers with the request head it received.
pub async fn start_echo_backend(addr: SocketAddr) {
    serve(addr, |head| head).await;
}

async fn serve<F>(addr: SocketAddr, respond: F)
where
    F: Fn(String) -> String + Send + Sync + Copy + 'static,
{
    let listener = TcpListener::bind(addr).await.unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let head = read_head(&mut socket).await;
                let body = respond(head);
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
}

async fn read_head(socket: &mut tokio::net::TcpStream) -> String {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
    String::from_utf8_lossy(&head).into_owned()
}

/// Config on fixed loopback ports with a temp hosts file.
pub fn test_config(dir: &Path, admin: u16, listen: u16, directives: &[(&str, &str)]) -> Config {
    let hosts = dir.join("hosts");
    std::fs::write(&hosts, "127.0.0.1 localhost\n").unwrap();

    let mut config = Config::default();
    config.admin.address = Some(format!("127.0.0.1:{admin}"));
    config.admin.timeout_secs = 2;
    config.server.listen = vec![format!("127.0.0.1:{listen}")];
    config.hosts.path = hosts;
    for (alias, upstream) in directives {
        config.directives.push(Directive::new(*alias, *upstream));
    }
    config
}

/// Polls the admin API until it answers.
pub async fn wait_for_admin(config: &Config) {
    let client = AdminClient::from_config(config).unwrap();
    for _ in 0..100 {
        if client.config().await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("admin API never became reachable");
}

/// GET through the proxy with the given Host header.
pub async fn get_via_proxy(listen: u16, host: &str, path: &str) -> (u16, String) {
    let response = reqwest::Client::builder()
        .no_proxy()
        .build()
        .unwrap()
        .get(format!("http://127.0.0.1:{listen}{path}"))
        .header("host", host)
        .send()
        .await
        .unwrap();
    let status = response.status().as_u16();
    (status, response.text().await.unwrap())
}
