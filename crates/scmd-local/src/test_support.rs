//! Scripted HTTP server and process fakes shared by unit tests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::server::{HealthProbe, LaunchSpec, ManagedProcess, ProcessLauncher};

/// Request as seen by the mock server.
#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Start offset of a `Range: bytes=<n>-` header.
    pub fn range_start(&self) -> Option<usize> {
        self.header("range")?
            .strip_prefix("bytes=")?
            .trim_end_matches('-')
            .parse()
            .ok()
    }
}

/// Canned response. `cut_after` closes the connection after that many body
/// bytes while still advertising the full length.
#[derive(Debug, Clone)]
pub(crate) struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub cut_after: Option<usize>,
    pub delay: Option<Duration>,
}

impl MockResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::status(200).with_body(body)
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
            cut_after: None,
            delay: None,
        }
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn cut_after(mut self, bytes: usize) -> Self {
        self.cut_after = Some(bytes);
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Serve `data` honoring a `Range: bytes=<n>-` header.
    pub fn ranged(request: &RecordedRequest, data: &[u8]) -> Self {
        match request.range_start() {
            Some(start) if start < data.len() => Self::status(206)
                .with_header(
                    "Content-Range",
                    &format!("bytes {}-{}/{}", start, data.len() - 1, data.len()),
                )
                .with_body(data[start..].to_vec()),
            Some(_) => Self::status(416),
            None => Self::ok(data.to_vec()),
        }
    }
}

type Handler = dyn Fn(&RecordedRequest, usize) -> MockResponse + Send + Sync;

/// Minimal HTTP/1.1 server answering every connection through a handler that
/// gets the request and its zero-based index.
pub(crate) struct MockServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    task: JoinHandle<()>,
}

impl MockServer {
    pub async fn start<H>(handler: H) -> Self
    where
        H: Fn(&RecordedRequest, usize) -> MockResponse + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<Handler> = Arc::new(handler);

        let recorded = requests.clone();
        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let handler = handler.clone();
                let recorded = recorded.clone();
                tokio::spawn(async move {
                    serve_connection(stream, handler, recorded).await;
                });
            }
        });

        Self {
            addr,
            requests,
            task,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    handler: Arc<Handler>,
    recorded: Arc<Mutex<Vec<RecordedRequest>>>,
) {
    let Some(request) = read_request(&mut stream).await else {
        return;
    };
    let index = {
        let mut all = recorded.lock().unwrap();
        all.push(request.clone());
        all.len() - 1
    };
    let response = handler(&request, index);

    if let Some(delay) = response.delay {
        tokio::time::sleep(delay).await;
    }

    let mut head = format!("HTTP/1.1 {} {}\r\n", response.status, reason(response.status));
    for (name, value) in &response.headers {
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    head.push_str(&format!("Content-Length: {}\r\n", response.body.len()));
    head.push_str("Connection: close\r\n\r\n");

    let body_len = response
        .cut_after
        .unwrap_or(response.body.len())
        .min(response.body.len());

    if stream.write_all(head.as_bytes()).await.is_err() {
        return;
    }
    let _ = stream.write_all(&response.body[..body_len]).await;
    let _ = stream.flush().await;
    let _ = stream.shutdown().await;
}

async fn read_request(stream: &mut TcpStream) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();

    let headers: HashMap<String, String> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = buf[header_end..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    Some(RecordedRequest {
        method,
        path,
        headers,
        body,
    })
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        206 => "Partial Content",
        404 => "Not Found",
        416 => "Range Not Satisfiable",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Deterministic payload of `len` bytes.
pub(crate) fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(data))
}

/// Shared liveness and call counters for the fake server process.
#[derive(Debug, Default)]
pub(crate) struct FakeProcessState {
    pub alive: AtomicBool,
    pub spawns: AtomicUsize,
    pub interrupts: AtomicUsize,
    pub kills: AtomicUsize,
    pub ignore_interrupt: AtomicBool,
    pub never_healthy: AtomicBool,
    /// Health checks block until the caller gives up.
    pub stall_health: AtomicBool,
    pub launches: Mutex<Vec<LaunchSpec>>,
}

impl FakeProcessState {
    pub fn spawns(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }

    pub fn interrupts(&self) -> usize {
        self.interrupts.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    pub fn last_launch(&self) -> Option<LaunchSpec> {
        self.launches.lock().unwrap().last().cloned()
    }
}

/// Launcher that records launches instead of running anything.
pub(crate) struct FakeLauncher {
    pub state: Arc<FakeProcessState>,
}

impl ProcessLauncher for FakeLauncher {
    fn launch(
        &self,
        spec: &LaunchSpec,
        _log: std::fs::File,
    ) -> std::io::Result<Box<dyn ManagedProcess>> {
        let pid = 4000 + self.state.spawns.fetch_add(1, Ordering::SeqCst) as u32;
        self.state.launches.lock().unwrap().push(spec.clone());
        self.state.alive.store(true, Ordering::SeqCst);
        Ok(Box::new(FakeProcess {
            pid,
            state: self.state.clone(),
        }))
    }
}

struct FakeProcess {
    pid: u32,
    state: Arc<FakeProcessState>,
}

impl ManagedProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn interrupt(&mut self) -> std::io::Result<bool> {
        self.state.interrupts.fetch_add(1, Ordering::SeqCst);
        if !self.state.ignore_interrupt.load(Ordering::SeqCst) {
            self.state.alive.store(false, Ordering::SeqCst);
        }
        Ok(true)
    }

    fn has_exited(&mut self) -> std::io::Result<bool> {
        Ok(!self.state.alive.load(Ordering::SeqCst))
    }

    fn kill(&mut self) -> std::io::Result<()> {
        self.state.kills.fetch_add(1, Ordering::SeqCst);
        self.state.alive.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn detach(self: Box<Self>) {}
}

/// Health probe that reports healthy while the fake process is alive.
pub(crate) struct FakeProbe {
    pub state: Arc<FakeProcessState>,
    pub external: AtomicBool,
}

#[async_trait]
impl HealthProbe for FakeProbe {
    async fn is_healthy(&self, _port: u16) -> bool {
        if self.state.stall_health.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.external.load(Ordering::SeqCst) {
            return true;
        }
        self.state.alive.load(Ordering::SeqCst) && !self.state.never_healthy.load(Ordering::SeqCst)
    }
}
