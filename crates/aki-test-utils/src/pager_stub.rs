//! Scriptable pager endpoint.
//!
//! A tiny HTTP/1.1 server that records POSTed page bodies. It can be told to
//! reject the first N requests with a 503, which is how tests exercise the
//! pending-page retry path.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub struct PagerStub {
    addr: SocketAddr,
    bodies: Arc<Mutex<Vec<String>>>,
    attempts: Arc<AtomicUsize>,
}

impl PagerStub {
    /// Start on an ephemeral port; the first `fail_first` requests get a 503.
    pub async fn start(fail_first: usize) -> std::io::Result<PagerStub> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let bodies = Arc::new(Mutex::new(Vec::new()));
        let attempts = Arc::new(AtomicUsize::new(0));
        let failures_left = Arc::new(AtomicUsize::new(fail_first));

        let recorded = bodies.clone();
        let counted = attempts.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let recorded = recorded.clone();
                let counted = counted.clone();
                let failures_left = failures_left.clone();
                tokio::spawn(async move {
                    handle_request(stream, &recorded, &counted, &failures_left).await;
                });
            }
        });

        Ok(PagerStub {
            addr,
            bodies,
            attempts,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Bodies of the accepted (200) requests, in arrival order.
    pub fn bodies(&self) -> Vec<String> {
        self.bodies
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Total requests seen, accepted or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Poll until at least `n` bodies have been accepted. Callers wrap this
    /// in a timeout.
    pub async fn wait_for_bodies(&self, n: usize) {
        loop {
            if self.bodies().len() >= n {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    }
}

async fn handle_request(
    mut stream: TcpStream,
    bodies: &Mutex<Vec<String>>,
    attempts: &AtomicUsize,
    failures_left: &AtomicUsize,
) {
    let Some(body) = read_request_body(&mut stream).await else {
        return;
    };
    attempts.fetch_add(1, Ordering::Relaxed);

    let should_fail = failures_left
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |left| {
            left.checked_sub(1)
        })
        .is_ok();

    let response = if should_fail {
        "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
            .to_owned()
    } else {
        bodies
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(body);
        "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok".to_owned()
    };
    let _ = stream.write_all(response.as_bytes()).await;
}

/// Read one request: headers through the blank line, then `Content-Length`
/// bytes of body.
async fn read_request_body(stream: &mut TcpStream) -> Option<String> {
    let mut raw = Vec::new();
    let mut buf = [0u8; 1024];

    let header_end = loop {
        if let Some(pos) = find_subslice(&raw, b"\r\n\r\n") {
            break pos + 4;
        }
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return None,
            Ok(n) => raw.extend_from_slice(&buf[..n]),
        }
    };

    let headers = String::from_utf8_lossy(&raw[..header_end]).to_string();
    let content_length = headers
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())?
        })
        .unwrap_or(0);

    while raw.len() < header_end + content_length {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return None,
            Ok(n) => raw.extend_from_slice(&buf[..n]),
        }
    }

    Some(String::from_utf8_lossy(&raw[header_end..header_end + content_length]).to_string())
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
