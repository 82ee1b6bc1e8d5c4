//! In-process HTTP server with canned replies for client tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub body: String,
}

impl Recorded {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
    /// Send `body`, then hold the connection open without closing it.
    pub stall: bool,
}

impl Reply {
    pub fn json(status: u16, body: serde_json::Value) -> Self {
        Self { status, content_type: "application/json", body: body.to_string(), stall: false }
    }

    pub fn sse(lines: &[&str]) -> Self {
        let body = lines.iter().map(|l| format!("{}\n\n", l)).collect();
        Self { status: 200, content_type: "text/event-stream", body, stall: false }
    }

    pub fn ndjson(events: &[serde_json::Value]) -> Self {
        let body = events.iter().map(|e| format!("{}\n", e)).collect();
        Self { status: 200, content_type: "application/x-ndjson", body, stall: false }
    }

    /// One NDJSON line with no length, then silence.
    pub fn stalled(first_line: &str) -> Self {
        Self { status: 200, content_type: "application/x-ndjson", body: format!("{}\n", first_line), stall: true }
    }

    pub fn text(status: u16, body: &str) -> Self {
        Self { status, content_type: "text/plain", body: body.to_string(), stall: false }
    }
}

pub struct TestServer {
    pub origin: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl TestServer {
    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

pub async fn serve<F>(handler: F) -> TestServer
where
    F: Fn(&Recorded) -> Reply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let origin = format!("http://{}", listener.local_addr().unwrap());
    let requests = Arc::new(Mutex::new(Vec::new()));
    let handler = Arc::new(handler);

    let recorded = Arc::clone(&requests);
    tokio::spawn(async move {
        while let Ok((sock, _)) = listener.accept().await {
            let handler = Arc::clone(&handler);
            let recorded = Arc::clone(&recorded);
            tokio::spawn(async move {
                let _ = handle(sock, handler.as_ref(), &recorded).await;
            });
        }
    });

    TestServer { origin, requests }
}

async fn handle<F>(mut sock: TcpStream, handler: &F, recorded: &Mutex<Vec<Recorded>>) -> std::io::Result<()>
where
    F: Fn(&Recorded) -> Reply,
{
    let Some(req) = read_request(&mut sock).await? else {
        return Ok(());
    };
    let reply = handler(&req);
    recorded.lock().unwrap().push(req);

    if reply.stall {
        let head = format!(
            "HTTP/1.1 {} Canned\r\nContent-Type: {}\r\nConnection: close\r\n\r\n",
            reply.status, reply.content_type
        );
        sock.write_all(head.as_bytes()).await?;
        sock.write_all(reply.body.as_bytes()).await?;
        sock.flush().await?;
        tokio::time::sleep(Duration::from_secs(30)).await;
        return Ok(());
    }

    let head = format!(
        "HTTP/1.1 {} Canned\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        reply.status,
        reply.content_type,
        reply.body.len()
    );
    sock.write_all(head.as_bytes()).await?;
    sock.write_all(reply.body.as_bytes()).await?;
    sock.shutdown().await
}

async fn read_request(sock: &mut TcpStream) -> std::io::Result<Option<Recorded>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = sock.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or_default().to_string();
    let content_length = lines
        .filter_map(|l| l.split_once(':'))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = sock.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buf[header_end..]).to_string();
    Ok(Some(Recorded { method, path, body }))
}
