//! Circuit breaker and timeout behaviour through the gateway.

use axum::http::{Method, StatusCode};
use chrono::Duration as ChronoDuration;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use transit_gateway::config::TimeoutPolicyConfig;
use transit_gateway::resilience::CircuitStatus;
use transit_gateway::services::{handler_fn, HandlerError, ServiceResponse};

mod common;
use common::*;

#[tokio::test]
async fn test_open_circuit_fails_fast_without_invoking_handler() {
    let config = test_config(vec![route("quote", "/rides/quote", "POST", "rides")]);
    let calls = Arc::new(AtomicU32::new(0));
    let gw = build_gateway(config, vec![("rides", failing_handler(calls.clone()))]);

    for _ in 0..3 {
        let res = send(&gw.router(), request(Method::POST, "/rides/quote", None, None)).await;
        assert_eq!(res.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.error_code(), "INTERNAL_ERROR");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let res = send(&gw.router(), request(Method::POST, "/rides/quote", None, None)).await;
    assert_eq!(res.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(res.error_code(), "SERVICE_CIRCUIT_OPEN");
    assert_eq!(
        res.body["error"]["message"],
        "Service rides is temporarily unavailable"
    );
    assert_eq!(res.body["error"]["retryable"], true);
    assert_eq!(res.body["error"]["correlationId"], res.correlation_id());
    assert_eq!(calls.load(Ordering::SeqCst), 3, "handler must not run while open");

    assert!(!gw.gateway.is_service_healthy("rides"));
    let health = gw.gateway.service_health();
    assert_eq!(health.len(), 1);
    assert_eq!(health[0].failure_count, 3);
}

#[tokio::test]
async fn test_circuit_recovers_through_half_open_probe() {
    let config = test_config(vec![route("quote", "/rides/quote", "POST", "rides")]);
    let healthy = Arc::new(AtomicBool::new(false));
    let flag = healthy.clone();
    let handler = handler_fn(move |_req, _corr| {
        let up = flag.load(Ordering::SeqCst);
        async move {
            if up {
                Ok(ServiceResponse::ok(json!({"fare": 12})))
            } else {
                Err(HandlerError::Upstream("connection refused".into()))
            }
        }
    });
    let gw = build_gateway(config, vec![("rides", handler)]);

    for _ in 0..3 {
        let res = send(&gw.router(), request(Method::POST, "/rides/quote", None, None)).await;
        assert_eq!(res.status, StatusCode::BAD_GATEWAY);
        assert_eq!(res.error_code(), "UPSTREAM_ERROR");
    }
    let circuit = gw.gateway.breaker().state("rides").await.unwrap().unwrap();
    assert_eq!(circuit.state, CircuitStatus::Open);

    // Still inside the recovery timeout.
    gw.clock.advance(ChronoDuration::seconds(29));
    let res = send(&gw.router(), request(Method::POST, "/rides/quote", None, None)).await;
    assert_eq!(res.status, StatusCode::SERVICE_UNAVAILABLE);

    // A failed probe reopens the circuit.
    gw.clock.advance(ChronoDuration::seconds(2));
    let res = send(&gw.router(), request(Method::POST, "/rides/quote", None, None)).await;
    assert_eq!(res.status, StatusCode::BAD_GATEWAY);
    let res = send(&gw.router(), request(Method::POST, "/rides/quote", None, None)).await;
    assert_eq!(res.status, StatusCode::SERVICE_UNAVAILABLE);

    // A successful probe closes it.
    healthy.store(true, Ordering::SeqCst);
    gw.clock.advance(ChronoDuration::seconds(31));
    let res = send(&gw.router(), request(Method::POST, "/rides/quote", None, None)).await;
    assert_eq!(res.status, StatusCode::OK);

    let circuit = gw.gateway.breaker().state("rides").await.unwrap().unwrap();
    assert_eq!(circuit.state, CircuitStatus::Closed);
    assert_eq!(circuit.failure_count, 0);
}

#[tokio::test]
async fn test_upstream_5xx_response_counts_as_failure() {
    let config = test_config(vec![route("fare", "/fares/{id}", "GET", "fares")]);
    let handler = handler_fn(|_req, _corr| async move {
        Ok(ServiceResponse::with_status(
            StatusCode::SERVICE_UNAVAILABLE,
            json!({"reason": "maintenance"}),
        ))
    });
    let gw = build_gateway(config, vec![("fares", handler)]);

    let res = send(&gw.router(), request(Method::GET, "/fares/1", None, None)).await;
    assert_eq!(res.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(res.body, json!({"reason": "maintenance"}));

    let circuit = gw.gateway.breaker().state("fares").await.unwrap().unwrap();
    assert_eq!(circuit.failure_count, 1);
    assert_eq!(circuit.last_error.as_deref(), Some("handler returned 503 Service Unavailable"));
}

#[tokio::test(start_paused = true)]
async fn test_slow_handler_times_out_with_envelope() {
    let mut config = test_config(vec![route("estimate", "/fares/estimate", "POST", "fares")]);
    config.timeouts.services = vec![TimeoutPolicyConfig {
        service_name: "fares".into(),
        max_duration_ms: 100,
    }];
    let gw = build_gateway(config, vec![("fares", slow_handler(Duration::from_millis(200)))]);

    let mut req = request(Method::POST, "/fares/estimate", None, None);
    req.headers_mut()
        .insert("x-correlation-id", "slow-1".parse().unwrap());
    let res = send(&gw.router(), req).await;

    assert_eq!(res.status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(res.error_code(), "REQUEST_TIMEOUT");
    assert_eq!(res.body["error"]["message"], "Request timed out after 100ms");
    assert_eq!(res.body["error"]["correlationId"], "slow-1");
    assert_eq!(res.body["error"]["retryable"], true);
    assert_eq!(res.correlation_id(), "slow-1");

    let circuit = gw.gateway.breaker().state("fares").await.unwrap().unwrap();
    assert_eq!(circuit.failure_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_handler_within_budget_completes() {
    let mut config = test_config(vec![route("estimate", "/fares/estimate", "POST", "fares")]);
    config.timeouts.services = vec![TimeoutPolicyConfig {
        service_name: "fares".into(),
        max_duration_ms: 100,
    }];
    let gw = build_gateway(config, vec![("fares", slow_handler(Duration::from_millis(99)))]);

    let res = send(&gw.router(), request(Method::POST, "/fares/estimate", None, None)).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body, json!({"late": true}));
}

#[tokio::test(start_paused = true)]
async fn test_unknown_service_uses_default_timeout() {
    let mut config = test_config(vec![route("geo", "/geo/lookup", "GET", "geo")]);
    config.timeouts.default_ms = 150;
    let gw = build_gateway(config, vec![("geo", slow_handler(Duration::from_secs(5)))]);

    let res = send(&gw.router(), request(Method::GET, "/geo/lookup", None, None)).await;
    assert_eq!(res.status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(res.body["error"]["message"], "Request timed out after 150ms");
}

#[tokio::test]
async fn test_unreachable_breaker_store_fails_open() {
    use async_trait::async_trait;
    use transit_gateway::store::{KvStore, StoreError, Versioned};

    struct DownStore;

    #[async_trait]
    impl KvStore for DownStore {
        async fn get(&self, _key: &str) -> Result<Option<Versioned>, StoreError> {
            Err(StoreError::Unavailable("connection reset".into()))
        }

        async fn compare_and_set(
            &self,
            _key: &str,
            _expected: Option<u64>,
            _value: Vec<u8>,
            _ttl: Option<Duration>,
        ) -> Result<Option<u64>, StoreError> {
            Err(StoreError::Unavailable("connection reset".into()))
        }
    }

    let config = test_config(vec![route("quote", "/rides/quote", "POST", "rides")]);
    let calls = Arc::new(AtomicU32::new(0));
    let gw = build_gateway_with_store(
        config,
        vec![("rides", counting_handler(calls.clone()))],
        Arc::new(DownStore),
    );

    for _ in 0..5 {
        let res = send(&gw.router(), request(Method::POST, "/rides/quote", None, None)).await;
        assert_eq!(res.status, StatusCode::OK);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 5);
}
