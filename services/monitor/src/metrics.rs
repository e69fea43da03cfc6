//! Counters and the `/metrics` endpoint.
//!
//! One `Metrics` value is constructed at startup and shared by `Arc` — no
//! process-wide statics. The HTTP side is a minimal hand-rolled server:
//! request-line parse, two routes, fixed responses.
//!
//! - `GET /metrics` — Prometheus text exposition of the counters
//! - `GET /healthz` — always 200 (process is running)

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// The monitor's counter set.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Complete MLLP frames consumed.
    pub messages_received: AtomicU64,
    /// ORU (lab result) messages parsed.
    pub blood_test_received: AtomicU64,
    /// MLLP connect attempts (successful or not).
    pub mllp_connections_made: AtomicU64,
    /// Failed pager POST attempts.
    pub failed_http: AtomicU64,
    /// Positive AKI verdicts.
    pub pos_predictions: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Metrics> {
        Arc::new(Metrics::default())
    }

    /// Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, value) in [
            ("messages_received", &self.messages_received),
            ("blood_test_received", &self.blood_test_received),
            ("mllp_connections_made", &self.mllp_connections_made),
            ("failed_http", &self.failed_http),
            ("pos_predictions", &self.pos_predictions),
        ] {
            out.push_str(&format!(
                "# TYPE {name} counter\n{name} {}\n",
                value.load(Ordering::Relaxed)
            ));
        }
        out
    }
}

/// Convenience: relaxed increment (counters never synchronize anything).
pub fn inc(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

// ---------------------------------------------------------------------------
// HTTP server
// ---------------------------------------------------------------------------

/// Bind the metrics listener. Failure here is a startup configuration error.
pub async fn bind(port: u16) -> std::io::Result<TcpListener> {
    TcpListener::bind(("0.0.0.0", port)).await
}

/// Serve `/metrics` and `/healthz` until the process exits.
pub async fn serve(listener: TcpListener, metrics: Arc<Metrics>) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let metrics = metrics.clone();
                tokio::spawn(async move {
                    handle_connection(stream, metrics).await;
                });
            }
            Err(_) => break,
        }
    }
}

async fn handle_connection(mut stream: TcpStream, metrics: Arc<Metrics>) {
    // 1 KiB covers any GET request line + headers we care about.
    let mut buf = vec![0u8; 1024];
    let n = match stream.read(&mut buf).await {
        Ok(n) if n > 0 => n,
        _ => return,
    };

    let request = String::from_utf8_lossy(&buf[..n]);
    let mut parts = request.lines().next().unwrap_or("").split_whitespace();
    let method = parts.next().unwrap_or("");
    let path = parts.next().unwrap_or("/");

    match (method, path) {
        ("GET", "/metrics") => {
            let body = metrics.render();
            send_response(&mut stream, 200, "text/plain; version=0.0.4", &body).await;
        }
        ("GET", "/healthz") => {
            send_response(&mut stream, 200, "text/plain", "ok").await;
        }
        _ => {
            send_response(&mut stream, 404, "text/plain", "Not Found").await;
        }
    }
}

async fn send_response(stream: &mut TcpStream, status: u16, content_type: &str, body: &str) {
    let status_text = match status {
        200 => "OK",
        404 => "Not Found",
        _ => "Unknown",
    };
    let response = format!(
        "HTTP/1.1 {status} {status_text}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {len}\r\n\
         Connection: close\r\n\
         \r\n\
         {body}",
        len = body.len(),
    );
    let _ = stream.write_all(response.as_bytes()).await;
}
