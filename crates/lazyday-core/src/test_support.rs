//! Test helpers: a scripted HTTP server and a ready-made context.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

use crate::api::ApiClient;
use crate::cache::{CacheConfig, QueryCache};
use crate::context::AppContext;
use crate::models::User;
use crate::notify::RecordingNotifier;
use crate::storage::MemoryUserStorage;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }
}

#[derive(Clone)]
struct Route {
    method: String,
    target: String,
    status: u16,
    body: String,
    gate: Option<Arc<Notify>>,
    /// Answers left before the route stops matching; `None` is unlimited
    times: Option<usize>,
}

#[derive(Default)]
struct Script {
    routes: Vec<Route>,
    requests: Vec<RecordedRequest>,
}

/// Answers requests from a list of canned routes and records what it saw.
///
/// A route's target matches either the full request target or its path
/// without the query string. Later routes override earlier ones; a limited
/// route falls through to the earlier ones once used up.
pub struct MockServer {
    base_url: String,
    script: Arc<Mutex<Script>>,
}

impl MockServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let script = Arc::new(Mutex::new(Script::default()));

        let shared = Arc::clone(&script);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let script = Arc::clone(&shared);
                tokio::spawn(async move {
                    let _ = handle(stream, script).await;
                });
            }
        });

        Self { base_url, script }
    }

    pub fn url(&self) -> &str {
        &self.base_url
    }

    pub fn route(&self, method: &str, target: &str, status: u16, body: Value) {
        self.push(method, target, status, body, None, None);
    }

    /// Like `route`, but the response is held back until `gate` is notified.
    pub fn route_gated(&self, method: &str, target: &str, status: u16, body: Value, gate: Arc<Notify>) {
        self.push(method, target, status, body, Some(gate), None);
    }

    /// Like `route`, but only for the next `times` matching requests.
    pub fn route_times(&self, method: &str, target: &str, status: u16, body: Value, times: usize) {
        self.push(method, target, status, body, None, Some(times));
    }

    fn push(
        &self,
        method: &str,
        target: &str,
        status: u16,
        body: Value,
        gate: Option<Arc<Notify>>,
        times: Option<usize>,
    ) {
        self.lock().routes.push(Route {
            method: method.to_string(),
            target: target.to_string(),
            status,
            body: body.to_string(),
            gate,
            times,
        });
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    pub fn count(&self, method: &str, target: &str) -> usize {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.method == method && matches_target(target, &r.target))
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn matches_target(route: &str, target: &str) -> bool {
    route == target || target.split('?').next() == Some(route)
}

async fn handle(mut stream: TcpStream, script: Arc<Mutex<Script>>) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let target = request_line.next().unwrap_or_default().to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();
    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buf[header_end..]).to_string();

    let route = {
        let mut script = script.lock().unwrap_or_else(PoisonError::into_inner);
        script.requests.push(RecordedRequest {
            method: method.clone(),
            target: target.clone(),
            headers,
            body,
        });
        script
            .routes
            .iter_mut()
            .rev()
            .find(|r| r.times != Some(0) && r.method == method && matches_target(&r.target, &target))
            .map(|r| {
                if let Some(left) = r.times.as_mut() {
                    *left -= 1;
                }
                r.clone()
            })
    };

    let (status, body) = match route {
        Some(route) => {
            if let Some(gate) = &route.gate {
                gate.notified().await;
            }
            (route.status, route.body)
        }
        None => (404, "{}".to_string()),
    };

    let response = format!(
        "HTTP/1.1 {} Scripted\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 2s");
}

pub fn user(id: i64, name: &str) -> User {
    User {
        id,
        email: format!("user{}@example.com", id),
        name: Some(name.to_string()),
        address: None,
        phone: None,
        token: Some(format!("token-{}", id)),
    }
}

pub struct Harness {
    pub server: MockServer,
    pub ctx: AppContext,
    pub storage: Arc<MemoryUserStorage>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(CacheConfig::default()).await
    }

    pub async fn with_config(config: CacheConfig) -> Self {
        let server = MockServer::start().await;
        let storage = Arc::new(MemoryUserStorage::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let ctx = AppContext::new(
            QueryCache::new(config),
            ApiClient::new(server.url()).unwrap(),
            storage.clone(),
            notifier.clone(),
        );
        Self {
            server,
            ctx,
            storage,
            notifier,
        }
    }
}
