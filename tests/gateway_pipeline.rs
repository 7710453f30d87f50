//! Request pipeline: routing, correlation, auth, body handling and auditing.

use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use transit_gateway::audit::{AuditEvent, VerifyRange};
use transit_gateway::security::{AuthError, AuthProvider, Principal};
use transit_gateway::services::{handler_fn, HandlerError, ServiceResponse};
use transit_gateway::store::{KvStore, MemoryStore, StoreError, Versioned};
use transit_gateway::Gateway;

mod common;
use common::*;

fn users_gateway() -> TestGateway {
    let config = test_config(vec![
        protected(route("update-user", "/users/{id}", "PUT", "users"), Some("users:write")),
        protected(route("create-user", "/users", "POST", "users"), Some("users:write")),
        protected(route("delete-user", "/users/{id}", "DELETE", "users"), Some("users:write")),
        protected(route("get-user", "/users/{id}", "GET", "users"), None),
        route("public-status", "/status", "GET", "users"),
    ]);
    build_gateway(config, vec![("users", echo_handler())])
}

async fn all_events(gw: &TestGateway) -> Vec<AuditEvent> {
    gw.gateway.audit().events(VerifyRange::all()).await.unwrap()
}

#[tokio::test]
async fn test_put_is_audited_with_request_and_response_diff() {
    let gw = users_gateway();

    let res = send(
        &gw.router(),
        request(Method::PUT, "/users/123", Some(DRIVER_TOKEN), Some(json!({"name": "A"}))),
    )
    .await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body, json!({"id": "123", "name": "A"}));

    let events = all_events(&gw).await;
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.actor.id, "u1");
    assert_eq!(event.actor.role, "driver");
    assert_eq!(event.action, "update-user");
    assert_eq!(event.entity_id.as_deref(), Some("123"));
    assert_eq!(event.correlation_id, res.correlation_id());
    let diff = event.diff.as_ref().unwrap();
    assert_eq!(diff.before, json!({"name": "A"}));
    assert_eq!(diff.after, json!({"id": "123", "name": "A"}));
    assert_eq!(event.previous_hash, AuditEvent::GENESIS_HASH);

    // The next event links to this one.
    send(
        &gw.router(),
        request(Method::PUT, "/users/124", Some(DRIVER_TOKEN), Some(json!({"name": "B"}))),
    )
    .await;
    let events = all_events(&gw).await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].previous_hash, events[0].hash);
}

#[tokio::test]
async fn test_post_and_delete_diff_shapes() {
    let gw = users_gateway();

    send(
        &gw.router(),
        request(Method::POST, "/users", Some(DRIVER_TOKEN), Some(json!({"name": "C"}))),
    )
    .await;
    send(&gw.router(), request(Method::DELETE, "/users/9", Some(DRIVER_TOKEN), None)).await;

    let events = all_events(&gw).await;
    assert_eq!(events.len(), 2);

    let created = events[0].diff.as_ref().unwrap();
    assert_eq!(created.before, Value::Null);
    assert_eq!(created.after, json!({"name": "C"}));

    let deleted = events[1].diff.as_ref().unwrap();
    assert_eq!(deleted.before, json!({"id": "9"}));
    assert_eq!(deleted.after, Value::Null);
    assert_eq!(events[1].entity_id.as_deref(), Some("9"));
}

#[tokio::test]
async fn test_unauthenticated_request_touches_neither_audit_nor_breaker() {
    let gw = users_gateway();

    let res = send(
        &gw.router(),
        request(Method::PUT, "/users/123", None, Some(json!({"name": "A"}))),
    )
    .await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.error_code(), "UNAUTHORIZED");
    assert_eq!(res.body["error"]["retryable"], false);

    let res = send(
        &gw.router(),
        request(Method::PUT, "/users/123", Some("bogus"), Some(json!({"name": "A"}))),
    )
    .await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);

    assert!(all_events(&gw).await.is_empty());
    assert!(gw.gateway.breaker().state("users").await.unwrap().is_none());
}

#[tokio::test]
async fn test_missing_permission_is_forbidden() {
    let gw = users_gateway();

    let res = send(
        &gw.router(),
        request(Method::PUT, "/users/123", Some(RIDER_TOKEN), Some(json!({"name": "A"}))),
    )
    .await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
    assert_eq!(res.error_code(), "FORBIDDEN");
    assert!(all_events(&gw).await.is_empty());
}

#[tokio::test]
async fn test_reads_are_not_audited_unless_route_is_auditable() {
    let mut audited_read = protected(route("view-ride", "/rides/{id}", "GET", "rides"), None);
    audited_read.auditable = true;
    let config = test_config(vec![
        protected(route("get-user", "/users/{id}", "GET", "users"), None),
        audited_read,
    ]);
    let gw = build_gateway(config, vec![("users", echo_handler()), ("rides", echo_handler())]);

    let res = send(&gw.router(), request(Method::GET, "/users/1", Some(DRIVER_TOKEN), None)).await;
    assert_eq!(res.status, StatusCode::OK);
    assert!(all_events(&gw).await.is_empty());

    send(&gw.router(), request(Method::GET, "/rides/7", Some(DRIVER_TOKEN), None)).await;
    let events = all_events(&gw).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, "view-ride");
    assert!(events[0].diff.is_none());
}

#[tokio::test]
async fn test_public_route_without_token_is_served_but_not_audited() {
    let config = test_config(vec![route("ping", "/ping", "POST", "users")]);
    let gw = build_gateway(config, vec![("users", echo_handler())]);

    let res = send(&gw.router(), request(Method::POST, "/ping", None, Some(json!({})))).await;
    assert_eq!(res.status, StatusCode::OK);
    assert!(all_events(&gw).await.is_empty());

    // An identified caller on a public route is attributed.
    send(&gw.router(), request(Method::POST, "/ping", Some(DRIVER_TOKEN), Some(json!({})))).await;
    let events = all_events(&gw).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].actor.id, "u1");
}

#[tokio::test]
async fn test_unmatched_route_returns_not_found_envelope() {
    let gw = users_gateway();

    let res = send(&gw.router(), request(Method::GET, "/nowhere", None, None)).await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    assert_eq!(res.error_code(), "NOT_FOUND");
    assert_eq!(res.body["error"]["correlationId"], res.correlation_id());
    // Stamped by the gateway clock, not wall time.
    assert_eq!(res.body["error"]["timestamp"], "2024-03-01T12:00:00Z");

    // Method must match exactly.
    let res = send(&gw.router(), request(Method::PATCH, "/users/1", Some(DRIVER_TOKEN), None)).await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_inbound_correlation_id_is_echoed() {
    let gw = users_gateway();

    let mut req = request(Method::GET, "/status", None, None);
    req.headers_mut()
        .insert("x-correlation-id", "abc-123".parse().unwrap());
    let res = send(&gw.router(), req).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.correlation_id(), "abc-123");

    let res = send(&gw.router(), request(Method::GET, "/status", None, None)).await;
    assert!(uuid::Uuid::parse_str(res.correlation_id()).is_ok());
}

#[tokio::test]
async fn test_handler_sees_the_request_correlation_id() {
    let config = test_config(vec![route("whoami", "/whoami", "GET", "meta")]);
    let handler = handler_fn(|_req, corr| async move {
        Ok(ServiceResponse::ok(json!({ "correlationId": corr })))
    });
    let gw = build_gateway(config, vec![("meta", handler)]);

    let mut req = request(Method::GET, "/whoami", None, None);
    req.headers_mut()
        .insert("x-correlation-id", "trace-77".parse().unwrap());
    let res = send(&gw.router(), req).await;
    assert_eq!(res.body["correlationId"], "trace-77");
}

#[tokio::test]
async fn test_invalid_json_body_is_a_validation_error() {
    let gw = users_gateway();

    let req = axum::http::Request::builder()
        .method(Method::PUT)
        .uri("/users/1")
        .header("authorization", format!("Bearer {DRIVER_TOKEN}"))
        .body(axum::body::Body::from("{not json"))
        .unwrap();
    let res = send(&gw.router(), req).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.error_code(), "VALIDATION_ERROR");
    assert!(all_events(&gw).await.is_empty());
}

#[tokio::test]
async fn test_client_errors_pass_through_and_count_as_success() {
    let config = test_config(vec![protected(route("cancel", "/rides/{id}/cancel", "POST", "rides"), Some("rides:cancel"))]);
    let handler = handler_fn(|_req, _corr| async move {
        Err(HandlerError::validation("ride already completed"))
    });
    let gw = build_gateway(config, vec![("rides", handler)]);

    for _ in 0..5 {
        let res = send(
            &gw.router(),
            request(Method::POST, "/rides/1/cancel", Some(DRIVER_TOKEN), None),
        )
        .await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert_eq!(res.body["error"]["message"], "ride already completed");
    }

    let circuit = gw.gateway.breaker().state("rides").await.unwrap().unwrap();
    assert_eq!(circuit.failure_count, 0);
    assert_eq!(circuit.success_count, 5);
    assert!(gw.gateway.is_service_healthy("rides"));
    assert!(all_events(&gw).await.is_empty());
}

/// Store whose audit keys are unreachable.
struct AuditOutageStore {
    inner: MemoryStore,
}

#[async_trait]
impl KvStore for AuditOutageStore {
    async fn get(&self, key: &str) -> Result<Option<Versioned>, StoreError> {
        if key.starts_with("audit:") {
            return Err(StoreError::Unavailable("audit partition down".into()));
        }
        self.inner.get(key).await
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<u64>,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<Option<u64>, StoreError> {
        if key.starts_with("audit:") {
            return Err(StoreError::Unavailable("audit partition down".into()));
        }
        self.inner.compare_and_set(key, expected, value, ttl).await
    }
}

#[tokio::test]
async fn test_automatic_audit_failure_does_not_fail_the_request() {
    let config = test_config(vec![protected(route("update-user", "/users/{id}", "PUT", "users"), None)]);
    let store = Arc::new(AuditOutageStore {
        inner: MemoryStore::new(),
    });
    let gw = build_gateway_with_store(config, vec![("users", echo_handler())], store);

    let res = send(
        &gw.router(),
        request(Method::PUT, "/users/5", Some(DRIVER_TOKEN), Some(json!({"name": "Z"}))),
    )
    .await;
    assert_eq!(res.status, StatusCode::OK);

    // The explicit API propagates the same failure.
    let draft = transit_gateway::audit::AuditDraft {
        correlation_id: "c".into(),
        actor: transit_gateway::audit::Actor {
            id: "u1".into(),
            role: "driver".into(),
            ip_address: None,
        },
        action: "manual".into(),
        entity_type: "user".into(),
        entity_id: None,
        diff: None,
        metadata: Value::Null,
    };
    assert!(gw.gateway.log_audit_event(draft).await.is_err());
}

#[tokio::test]
async fn test_most_specific_route_wins() {
    let config = test_config(vec![
        route("rides-any", "/rides/{*rest}", "GET", "fallback"),
        route("ride-by-id", "/rides/{id}", "GET", "rides"),
        route("ride-active", "/rides/active", "GET", "active"),
    ]);
    let calls = Arc::new(AtomicU32::new(0));
    let tag = |name: &'static str| {
        handler_fn(move |_req, _corr| async move { Ok(ServiceResponse::ok(json!({ "service": name }))) })
    };
    let gw = build_gateway(
        config,
        vec![
            ("fallback", tag("fallback")),
            ("rides", tag("rides")),
            ("active", tag("active")),
            ("unused", counting_handler(calls.clone())),
        ],
    );

    let service_for = |path: &'static str| {
        let router = gw.router();
        async move { send(&router, request(Method::GET, path, None, None)).await.body["service"].clone() }
    };
    assert_eq!(service_for("/rides/active").await, "active");
    assert_eq!(service_for("/rides/42").await, "rides");
    assert_eq!(service_for("/rides/42/receipt").await, "fallback");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

/// Identity service that never answers in time.
struct StalledIdentityService;

#[async_trait]
impl AuthProvider for StalledIdentityService {
    async fn validate_token(&self, _token: &str) -> Result<Principal, AuthError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Err(AuthError::InvalidToken)
    }
}

#[tokio::test(start_paused = true)]
async fn test_stalled_identity_service_is_unauthorized() {
    let mut config = test_config(vec![
        protected(route("update-user", "/users/{id}", "PUT", "users"), None),
        route("public-status", "/status", "GET", "users"),
    ]);
    config.security.auth_timeout_ms = 250;
    let calls = Arc::new(AtomicU32::new(0));
    let gateway = Gateway::builder(config)
        .auth(Arc::new(StalledIdentityService))
        .handler("users", counting_handler(calls.clone()))
        .build();

    let started = tokio::time::Instant::now();
    let res = send(
        &gateway.router(),
        request(Method::PUT, "/users/1", Some(DRIVER_TOKEN), Some(json!({}))),
    )
    .await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.error_code(), "UNAUTHORIZED");
    assert_eq!(
        res.body["error"]["message"],
        "Authentication failed: identity service did not answer within 250ms"
    );
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    // Public routes proceed anonymously.
    let res = send(
        &gateway.router(),
        request(Method::GET, "/status", Some(DRIVER_TOKEN), None),
    )
    .await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let failures = gateway
        .breaker()
        .state("users")
        .await
        .unwrap()
        .map_or(0, |c| c.failure_count);
    assert_eq!(failures, 0);
}
