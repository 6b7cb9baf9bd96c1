//! Scripted HTTP server for fetcher tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use pomona_core::{HttpConfig, RetryPolicy};
use reqwest::Url;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// What the server sends back on one connection.
#[derive(Debug, Clone)]
pub enum Reply {
    Ok(Vec<u8>),
    Status(u16),
    /// Declares `declared` bytes, sends `body`, then closes the connection.
    Truncated { declared: usize, body: Vec<u8> },
    /// Sends headers and then nothing.
    Stall,
}

/// HTTP server answering connection `n` with reply `n`; the last reply repeats.
pub struct TestServer {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(replies: Vec<Reply>) -> Self {
        assert!(!replies.is_empty());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let counter = connections.clone();
        let request_log = requests.clone();
        let replies = Arc::new(replies);
        let handle = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let reply = replies[n.min(replies.len() - 1)].clone();
                let request_log = request_log.clone();
                tokio::spawn(async move {
                    serve(socket, reply, request_log).await;
                });
            }
        });

        Self {
            addr,
            connections,
            requests,
            handle,
        }
    }

    pub fn url(&self, path: &str) -> Url {
        format!("http://{}{}", self.addr, path).parse().unwrap()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Request lines (`GET /path?query HTTP/1.1`) in arrival order.
    pub fn request_lines(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(mut socket: TcpStream, reply: Reply, requests: Arc<Mutex<Vec<String>>>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    let head = String::from_utf8_lossy(&buf);
    if let Some(line) = head.lines().next() {
        requests.lock().unwrap().push(line.to_string());
    }

    let response = match &reply {
        Reply::Ok(body) => [header(200, body.len()), body.clone()].concat(),
        Reply::Status(status) => header(*status, 0),
        Reply::Truncated { declared, body } => [header(200, *declared), body.clone()].concat(),
        Reply::Stall => header(200, 100),
    };
    if socket.write_all(&response).await.is_err() {
        return;
    }
    let _ = socket.flush().await;

    if matches!(reply, Reply::Stall) {
        tokio::time::sleep(Duration::from_secs(30)).await;
    }
}

fn header(status: u16, content_length: usize) -> Vec<u8> {
    format!(
        "HTTP/1.1 {status} Test\r\nContent-Type: application/xml\r\nContent-Length: {content_length}\r\nConnection: close\r\n\r\n"
    )
    .into_bytes()
}

/// Config with millisecond backoff so retry tests stay fast.
pub fn fast_config(max_attempts: u32) -> HttpConfig {
    HttpConfig::default()
        .with_read_timeout(Duration::from_millis(500))
        .with_retry(
            RetryPolicy::default()
                .with_initial_delay(Duration::from_millis(10))
                .with_max_delay(Duration::from_millis(50))
                .with_max_attempts(max_attempts),
        )
}

pub fn catalog_body() -> Vec<u8> {
    br#"<?xml version="1.0" encoding="UTF-8"?>
<catalog>
  <language>PT</language>
  <indicator id="0008074">
    <title>Taxa de desemprego</title>
    <keywords>Emprego</keywords>
  </indicator>
</catalog>"#
        .to_vec()
}
