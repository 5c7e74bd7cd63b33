//! server — thin HTTP/JSON plumbing over the Store (tiny_http).
//!
//! Routes:
//!   GET    /health | /            -> 200 "OK"
//!   GET    /ready                 -> 200 | 503 (draining)
//!   GET    /metrics               -> Prometheus text
//!   GET    /users                 -> 200 [user...]
//!   POST   /users                 -> 201 user
//!   GET    /users/{id}            -> 200 user | 404
//!   PUT    /users/{id}            -> 200 user | 404
//!   DELETE /users/{id}            -> 204 | 404
//!
//! Маршрутизация — чистая функция `route(&Store, ...)`, сокеты только в HttpServer.
//! Во время drain мутации получают 503, чтения продолжают работать.

use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::{json, Value};
use std::io::Read;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tiny_http::{Header, Request, Response, Server};

use crate::metrics;
use crate::store::{Store, StoreError};
use crate::user::{UserAttrs, UserId};

/// Request bodies above this are rejected with 413.
pub const MAX_BODY_BYTES: u64 = 1 << 20;

const RECV_TICK: Duration = Duration::from_millis(100);

/// Transport-independent response.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl Reply {
    fn json<T: Serialize>(status: u16, v: &T) -> Self {
        match serde_json::to_string(v) {
            Ok(body) => Self {
                status,
                content_type: "application/json",
                body,
            },
            Err(e) => Self::error(500, &format!("encode response: {}", e)),
        }
    }

    fn error(status: u16, msg: &str) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: json!({ "error": msg }).to_string(),
        }
    }

    fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: body.into(),
        }
    }

    fn no_content() -> Self {
        Self::text(204, "")
    }

    /// Decode the body as JSON (tests and clients).
    pub fn json_body(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }
}

fn store_error(e: StoreError) -> Reply {
    match e {
        StoreError::NotFound(_) => Reply::error(404, &e.to_string()),
        StoreError::ShuttingDown => Reply::error(503, &e.to_string()),
        StoreError::IdsExhausted => Reply::error(507, &e.to_string()),
    }
}

/// Decode a request body into attributes. A client-supplied "id" is ignored.
pub fn parse_attrs(body: &[u8]) -> std::result::Result<UserAttrs, String> {
    let v: Value = serde_json::from_slice(body).map_err(|e| format!("invalid JSON body: {}", e))?;
    let Value::Object(mut obj) = v else {
        return Err("request body must be a JSON object".to_string());
    };
    obj.remove("id");
    serde_json::from_value(Value::Object(obj)).map_err(|e| format!("invalid user: {}", e))
}

fn parse_id(s: &str) -> Option<UserId> {
    s.parse::<UserId>().ok().filter(|id| *id > 0)
}

/// Map one request onto the store.
pub fn route(store: &Store, method: &str, url: &str, body: &[u8]) -> Reply {
    let path = url.split('?').next().unwrap_or("");
    let segs: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match (method, segs.as_slice()) {
        ("GET", []) | ("GET", ["health"]) => Reply::text(200, "OK\n"),
        ("GET", ["ready"]) => {
            if store.is_accepting() {
                Reply::text(200, "OK\n")
            } else {
                Reply::text(503, "draining\n")
            }
        }
        ("GET", ["metrics"]) => {
            let mut r = Reply::text(200, metrics::snapshot().to_prometheus());
            r.content_type = "text/plain; version=0.0.4";
            r
        }

        ("GET", ["users"]) => Reply::json(200, &store.list()),
        ("POST", ["users"]) => match parse_attrs(body) {
            Ok(attrs) => match store.create(attrs) {
                Ok(u) => Reply::json(201, &u),
                Err(e) => store_error(e),
            },
            Err(msg) => Reply::error(400, &msg),
        },
        (_, ["users"]) => Reply::error(405, "method not allowed"),

        (m, ["users", raw]) => {
            let Some(id) = parse_id(raw) else {
                return Reply::error(400, &format!("invalid user id {:?}", raw));
            };
            match m {
                "GET" => match store.get(id) {
                    Ok(u) => Reply::json(200, &u),
                    Err(e) => store_error(e),
                },
                "PUT" => match parse_attrs(body) {
                    Ok(attrs) => match store.update(id, attrs) {
                        Ok(u) => Reply::json(200, &u),
                        Err(e) => store_error(e),
                    },
                    Err(msg) => Reply::error(400, &msg),
                },
                "DELETE" => match store.delete(id) {
                    Ok(()) => Reply::no_content(),
                    Err(e) => store_error(e),
                },
                _ => Reply::error(405, "method not allowed"),
            }
        }

        _ => Reply::error(404, "not found"),
    }
}

fn respond(store: &Store, mut rq: Request) {
    let method = rq.method().as_str().to_string();
    let url = rq.url().to_string();

    let mut body = Vec::new();
    let reply = match rq
        .as_reader()
        .take(MAX_BODY_BYTES + 1)
        .read_to_end(&mut body)
    {
        Ok(n) if n as u64 > MAX_BODY_BYTES => Reply::error(413, "request body too large"),
        Ok(_) => route(store, &method, &url, &body),
        Err(e) => Reply::error(400, &format!("read body: {}", e)),
    };
    debug!("http: {} {} -> {}", method, url, reply.status);

    let mut resp = Response::from_string(reply.body).with_status_code(reply.status);
    if let Ok(ct) = Header::from_bytes(&b"Content-Type"[..], reply.content_type.as_bytes()) {
        resp.add_header(ct);
    }
    if let Err(e) = rq.respond(resp) {
        warn!("http: respond to {} {} failed: {}", method, url, e);
    }
}

/// Worker pool over one tiny_http listener.
pub struct HttpServer {
    server: Arc<Server>,
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl HttpServer {
    pub fn start(store: Arc<Store>, addr: &str, workers: usize) -> Result<Self> {
        let server = Server::http(addr).map_err(|e| anyhow!("bind http at {}: {}", addr, e))?;
        let server = Arc::new(server);
        let stop = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::with_capacity(workers.max(1));
        for n in 0..workers.max(1) {
            let server = server.clone();
            let stop = stop.clone();
            let store = store.clone();
            let h = std::thread::Builder::new()
                .name(format!("http-{}", n))
                .spawn(move || {
                    while !stop.load(Ordering::SeqCst) {
                        match server.recv_timeout(RECV_TICK) {
                            Ok(Some(rq)) => respond(&store, rq),
                            Ok(None) => {}
                            Err(e) => warn!("http recv error: {}", e),
                        }
                    }
                })
                .map_err(|e| anyhow!("spawn http worker: {}", e))?;
            handles.push(h);
        }

        let srv = Self {
            server,
            stop,
            workers: handles,
        };
        info!(
            "http: listening on {} ({} worker(s))",
            srv.local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|| addr.to_string()),
            srv.workers.len()
        );
        Ok(srv)
    }

    /// Bound address (useful with port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.server_addr().to_ip()
    }

    /// Stop accepting connections and join workers, waiting at most `grace`.
    /// Returns the number of workers left running (stuck in a request).
    pub fn stop(self, grace: Duration) -> usize {
        self.stop.store(true, Ordering::SeqCst);
        for _ in 0..self.workers.len() {
            self.server.unblock();
        }

        let deadline = Instant::now() + grace;
        let mut pending = self.workers;
        while !pending.is_empty() && Instant::now() < deadline {
            let (done, rest): (Vec<_>, Vec<_>) = pending.into_iter().partition(|h| h.is_finished());
            for h in done {
                let _ = h.join();
            }
            pending = rest;
            if !pending.is_empty() {
                std::thread::sleep(Duration::from_millis(10));
            }
        }
        if !pending.is_empty() {
            warn!("http: {} worker(s) still busy after {:?}, detaching", pending.len(), grace);
        }
        pending.len()
    }
}
