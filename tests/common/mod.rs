//! Shared utilities for integration tests.
#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tower::ServiceExt;

use transit_gateway::clock::{Clock, ManualClock};
use transit_gateway::config::{GatewayConfig, RouteConfig, TokenConfig};
use transit_gateway::services::{handler_fn, HandlerError, ServiceHandler, ServiceResponse};
use transit_gateway::store::{KvStore, MemoryStore};
use transit_gateway::Gateway;

pub const DRIVER_TOKEN: &str = "t-driver";
pub const RIDER_TOKEN: &str = "t-rider";
pub const ADMIN_KEY: &str = "admin-test-key";

pub fn route(name: &str, pattern: &str, method: &str, service: &str) -> RouteConfig {
    RouteConfig {
        name: name.into(),
        path_pattern: pattern.into(),
        method: method.into(),
        service_name: service.into(),
        priority: 0,
        protected: false,
        permission: None,
        auditable: false,
        entity_type: None,
    }
}

pub fn protected(mut route: RouteConfig, permission: Option<&str>) -> RouteConfig {
    route.protected = true;
    route.permission = permission.map(str::to_string);
    route
}

/// Defaults plus two tokens, an admin key, and a breaker that opens after
/// 3 failures out of at least 3 calls.
pub fn test_config(routes: Vec<RouteConfig>) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.routes = routes;
    config.auth.tokens = vec![
        TokenConfig {
            token: DRIVER_TOKEN.into(),
            actor_id: "u1".into(),
            role: "driver".into(),
            permissions: vec!["users:write".into(), "rides:*".into()],
        },
        TokenConfig {
            token: RIDER_TOKEN.into(),
            actor_id: "rider-7".into(),
            role: "rider".into(),
            permissions: vec![],
        },
    ];
    config.admin.api_key = ADMIN_KEY.into();
    config.circuit_breaker.failure_threshold = 3;
    config.circuit_breaker.minimum_requests = 3;
    config.circuit_breaker.recovery_timeout_ms = 30_000;
    config.audit.checkpoint_enabled = false;
    config
}

pub struct TestGateway {
    pub gateway: Gateway,
    pub clock: Arc<ManualClock>,
}

impl TestGateway {
    pub fn router(&self) -> Router {
        self.gateway.router()
    }

    pub fn admin(&self) -> Router {
        self.gateway.admin_router()
    }
}

pub fn build_gateway(
    config: GatewayConfig,
    handlers: Vec<(&str, Arc<dyn ServiceHandler>)>,
) -> TestGateway {
    build_gateway_with_store(config, handlers, Arc::new(MemoryStore::new()))
}

pub fn build_gateway_with_store(
    config: GatewayConfig,
    handlers: Vec<(&str, Arc<dyn ServiceHandler>)>,
    store: Arc<dyn KvStore>,
) -> TestGateway {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
    ));
    let mut builder = Gateway::builder(config)
        .store(store)
        .clock(clock.clone() as Arc<dyn Clock>);
    for (service, handler) in handlers {
        builder = builder.handler(service, handler);
    }
    TestGateway {
        gateway: builder.build(),
        clock,
    }
}

pub fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    pub fn correlation_id(&self) -> &str {
        self.headers
            .get("x-correlation-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }

    pub fn error_code(&self) -> &str {
        self.body["error"]["code"].as_str().unwrap_or_default()
    }
}

pub async fn send(router: &Router, request: Request<Body>) -> TestResponse {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    TestResponse {
        status,
        headers,
        body,
    }
}

/// Echoes `{id, ...request body}` with 200.
pub fn echo_handler() -> Arc<dyn ServiceHandler> {
    handler_fn(|req, _corr| async move {
        let mut body = match req.body {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        if let Some(id) = req.params.get("id") {
            body.insert("id".into(), json!(id));
        }
        Ok(ServiceResponse::ok(Value::Object(body)))
    })
}

/// Counts invocations and always fails with a server error.
pub fn failing_handler(calls: Arc<AtomicU32>) -> Arc<dyn ServiceHandler> {
    handler_fn(move |_req, _corr| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(HandlerError::Server("database unavailable".into()))
        }
    })
}

/// Counts invocations and succeeds.
pub fn counting_handler(calls: Arc<AtomicU32>) -> Arc<dyn ServiceHandler> {
    handler_fn(move |_req, _corr| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(ServiceResponse::ok(json!({"ok": true})))
        }
    })
}

/// Sleeps before answering.
pub fn slow_handler(delay: Duration) -> Arc<dyn ServiceHandler> {
    handler_fn(move |_req, _corr| async move {
        tokio::time::sleep(delay).await;
        Ok(ServiceResponse::ok(json!({"late": true})))
    })
}

/// Read one request: the head plus `Content-Length` bytes of body.
async fn read_request(socket: &mut TcpStream) -> String {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = match socket.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        data.extend_from_slice(&buf[..n]);

        let text = String::from_utf8_lossy(&data);
        if let Some(end) = text.find("\r\n\r\n") {
            let content_length = text[..end]
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if data.len() >= end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&data).into_owned()
}

/// Start a programmable mock backend on an ephemeral port.
/// The closure receives the raw request and returns `(status, json body)`.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let raw = read_request(&mut socket).await;
                        let (status, body) = f(raw).await;
                        let status_text = match status {
                            200 => "200 OK",
                            201 => "201 Created",
                            404 => "404 Not Found",
                            500 => "500 Internal Server Error",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };
                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}
