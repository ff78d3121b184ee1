#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use webhook_fanout::{Dispatcher, DispatcherConfig, InMemoryWebhookStore};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Loopback targets allowed, retries fast.
pub fn test_config() -> DispatcherConfig {
    DispatcherConfig {
        allow_private_networks: true,
        retry_base_ms: 10,
        attempt_timeout_ms: 2_000,
        ..Default::default()
    }
}

pub fn dispatcher_with(config: DispatcherConfig) -> (Arc<InMemoryWebhookStore>, Dispatcher) {
    init_tracing();
    let store = Arc::new(InMemoryWebhookStore::new());
    let dispatcher = Dispatcher::new(config, store.clone()).expect("dispatcher");
    (store, dispatcher)
}

pub fn dispatcher() -> (Arc<InMemoryWebhookStore>, Dispatcher) {
    dispatcher_with(test_config())
}

/// Counters kept by [`SlowServer`].
#[derive(Debug, Default)]
pub struct SlowServerStats {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    total: AtomicUsize,
}

impl SlowServerStats {
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

/// HTTP target that holds every request for `delay` before answering 200,
/// recording how many requests were open at once.
pub struct SlowServer {
    pub addr: SocketAddr,
    pub stats: Arc<SlowServerStats>,
}

impl SlowServer {
    pub async fn start(delay: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let stats = Arc::new(SlowServerStats::default());

        let server_stats = stats.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let stats = server_stats.clone();
                tokio::spawn(async move {
                    let _ = handle(stream, stats, delay).await;
                });
            }
        });

        Self { addr, stats }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

async fn handle(
    mut stream: TcpStream,
    stats: Arc<SlowServerStats>,
    delay: Duration,
) -> std::io::Result<()> {
    if !read_request(&mut stream).await? {
        return Ok(());
    }

    let now = stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    stats.max_in_flight.fetch_max(now, Ordering::SeqCst);
    stats.total.fetch_add(1, Ordering::SeqCst);

    tokio::time::sleep(delay).await;
    stats.in_flight.fetch_sub(1, Ordering::SeqCst);

    stream
        .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
        .await?;
    stream.shutdown().await
}

/// Reads one request with a `content-length` body. `false` on early EOF.
async fn read_request(stream: &mut TcpStream) -> std::io::Result<bool> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(false);
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
    let body_len = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + body_len {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(false);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Ok(true)
}
