//! Shared utilities for the end-to-end tests.

#![allow(dead_code)]

use axum::http::{request::Parts, StatusCode};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

use replay_proxy::config::{BackendConfig, ProxyConfig};
use replay_proxy::resilience::RetryListener;
use replay_proxy::{HttpServer, Shutdown};

/// A mock backend and the number of requests it answered.
pub struct MockBackend {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

/// Read one request and return its body. Honours `Content-Length` only.
async fn read_request(socket: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return Vec::new(),
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_ascii_lowercase();
    let length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < head_end + length {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    buf.split_off(head_end)
}

async fn respond(socket: &mut TcpStream, status: u16, body: &[u8]) {
    let reason = StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown");
    let head = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let _ = socket.write_all(head.as_bytes()).await;
    let _ = socket.write_all(body).await;
    let _ = socket.shutdown().await;
}

async fn spawn_backend<F>(answer: F) -> MockBackend
where
    F: Fn(Vec<u8>) -> (u16, Vec<u8>) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let answer = Arc::new(answer);

    let counter = hits.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let answer = answer.clone();
            let counter = counter.clone();
            tokio::spawn(async move {
                let body = read_request(&mut socket).await;
                counter.fetch_add(1, Ordering::SeqCst);
                let (status, reply) = answer(body);
                respond(&mut socket, status, &reply).await;
            });
        }
    });

    MockBackend { addr, hits }
}

/// Start a backend answering every request with `status` and `body`.
pub async fn start_mock_backend(status: u16, body: &'static str) -> MockBackend {
    spawn_backend(move |_| (status, body.as_bytes().to_vec())).await
}

/// Start a backend answering 200 with the request body.
pub async fn start_echo_backend() -> MockBackend {
    spawn_backend(|body| (200, body)).await
}

/// Backend URLs nothing listens on, all distinct.
pub async fn refused_backends(n: usize) -> Vec<String> {
    // Held together while collecting so no port is handed out twice.
    let mut listeners = Vec::with_capacity(n);
    for _ in 0..n {
        listeners.push(TcpListener::bind("127.0.0.1:0").await.unwrap());
    }
    listeners
        .iter()
        .map(|l| format!("http://{}", l.local_addr().unwrap()))
        .collect()
}

/// Start a backend streaming a chunked `"FULL "`, then `"DATA"` once `release`
/// is notified.
pub async fn start_streaming_backend(release: Arc<Notify>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let release = release.clone();
            tokio::spawn(async move {
                read_request(&mut socket).await;
                let head = "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\
                            Transfer-Encoding: chunked\r\nConnection: close\r\n\r\n";
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(b"5\r\nFULL \r\n").await;
                let _ = socket.flush().await;
                release.notified().await;
                let _ = socket.write_all(b"4\r\nDATA\r\n0\r\n\r\n").await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// Records the attempt numbers it is notified with.
#[derive(Debug, Default)]
pub struct RecordingListener {
    attempts: Mutex<Vec<usize>>,
}

impl RecordingListener {
    pub fn attempts(&self) -> Vec<usize> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn times_called(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    /// Notifications are delivered off the request path, so they can land
    /// after the response. Waits until `n` arrived, then a little longer to
    /// catch any extra.
    pub async fn wait_for(&self, n: usize) -> Vec<usize> {
        for _ in 0..100 {
            if self.times_called() >= n {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.attempts()
    }
}

impl RetryListener for RecordingListener {
    fn retried(&self, _req: &Parts, attempt: usize) {
        self.attempts.lock().unwrap().push(attempt);
    }
}

pub fn config(max_attempts: usize, backends: &[String]) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.observability.metrics_enabled = false;
    config.retries.max_attempts = max_attempts;
    config.backends = backends
        .iter()
        .enumerate()
        .map(|(i, url)| BackendConfig {
            name: format!("backend-{i}"),
            url: url.clone(),
        })
        .collect();
    config
}

/// A running proxy. Shuts down when dropped.
pub struct TestProxy {
    pub addr: SocketAddr,
    shutdown: Shutdown,
}

impl TestProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn start_proxy(config: ProxyConfig, listeners: Vec<Arc<dyn RetryListener>>) -> TestProxy {
    let server = HttpServer::with_listeners(&config, listeners).unwrap();
    let listener = TcpListener::bind(&config.listener.bind_address).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    let (_, config_updates) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(async move {
        let _ = server.run(listener, config_updates, server_shutdown).await;
    });

    TestProxy { addr, shutdown }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}
