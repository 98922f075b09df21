//! A local HTTP/1.1 server that answers every request with one canned
//! response and records the request heads it saw.

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

pub(crate) struct Response {
    status: u16,
    headers: Vec<(&'static str, String)>,
    body: String,
}

pub(crate) struct Listening {
    pub(crate) url: String,
    heads: Arc<Mutex<Vec<String>>>,
}

// === impl Response ===

impl Response {
    pub(crate) fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub(crate) fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    fn encode(&self) -> Vec<u8> {
        let reason = reqwest::StatusCode::from_u16(self.status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Unknown");
        let mut rsp = format!(
            "HTTP/1.1 {} {reason}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n",
            self.status,
            self.body.len(),
        );
        for (name, value) in &self.headers {
            rsp.push_str(&format!("{name}: {value}\r\n"));
        }
        rsp.push_str("\r\n");
        rsp.push_str(&self.body);
        rsp.into_bytes()
    }
}

// === impl Listening ===

impl Listening {
    /// Request heads received so far, lowercased.
    pub(crate) fn heads(&self) -> Vec<String> {
        self.heads.lock().expect("heads lock").clone()
    }
}

pub(crate) async fn serve(rsp: Response) -> Listening {
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    let rsp = Arc::new(rsp.encode());
    let heads = Arc::new(Mutex::new(Vec::new()));

    let seen = heads.clone();
    tokio::spawn(async move {
        while let Ok((mut sock, _)) = listener.accept().await {
            let rsp = rsp.clone();
            let seen = seen.clone();
            tokio::spawn(async move {
                if let Ok(head) = read_request(&mut sock).await {
                    seen.lock().expect("heads lock").push(head);
                    let _ = sock.write_all(&rsp).await;
                    let _ = sock.shutdown().await;
                }
            });
        }
    });

    Listening {
        url: format!("http://{addr}"),
        heads,
    }
}

/// An address nothing listens on.
pub(crate) async fn closed() -> String {
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    drop(listener);
    format!("http://{addr}")
}

/// Reads one request, including its body, and returns its head.
async fn read_request(sock: &mut TcpStream) -> std::io::Result<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let end = loop {
        let n = sock.read(&mut chunk).await?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break end;
        }
    };

    let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
    let len = head
        .lines()
        .find_map(|l| l.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < end + 4 + len {
        let n = sock.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Ok(head)
}
