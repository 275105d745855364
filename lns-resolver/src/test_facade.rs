//! Minimal HTTP/1.1 facade for tests: answers each route with a canned
//! status and body and records every request it sees.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

// ---

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Answer for every request whose path starts with `path`.
pub(crate) struct Canned {
    // ---
    pub path: &'static str,
    pub status: u16,
    pub body: &'static str,
}

#[derive(Debug, Clone)]
pub(crate) struct Recorded {
    // ---
    pub method: String,

    /// Path plus query, as sent.
    pub target: String,

    /// Header block, lower-cased.
    pub headers: String,

    pub body: Vec<u8>,
}

pub(crate) struct TestFacade {
    // ---
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

// ---

impl TestFacade {
    // ---
    /// Bind on an ephemeral loopback port and serve until the runtime ends.
    pub async fn serve(routes: Vec<Canned>) -> Self {
        // ---
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let routes = Arc::new(routes);

        let seen = requests.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(answer(stream, routes.clone(), seen.clone()));
            }
        });

        Self { addr, requests }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

// ---------------------------------------------------------------------------
// Connection handling
// ---------------------------------------------------------------------------

async fn answer(
    mut stream: TcpStream,
    routes: Arc<Vec<Canned>>,
    seen: Arc<Mutex<Vec<Recorded>>>,
) {
    // ---
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];

    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_owned();
    let target = request_line.next().unwrap_or_default().to_owned();
    let headers = lines.collect::<Vec<_>>().join("\n").to_ascii_lowercase();

    let content_length = headers
        .lines()
        .find_map(|l| l.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < head_end + content_length {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    let body = buf[head_end..head_end + content_length].to_vec();

    let path = target.split('?').next().unwrap_or_default().to_owned();
    let (status, reply) = routes
        .iter()
        .find(|r| path.starts_with(r.path))
        .map(|r| (r.status, r.body))
        .unwrap_or((500, "no canned route"));

    seen.lock().unwrap().push(Recorded {
        method,
        target,
        headers,
        body,
    });

    let response = format!(
        "HTTP/1.1 {status} Canned\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{reply}",
        reply.len()
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}
