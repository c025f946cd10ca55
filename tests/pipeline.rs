//! End-to-end tests of the security pipeline through the full router.

use axum::http::{header, Request, StatusCode};
use axum::body::Body;
use erp_gateway::audit::{AuditQuery, EventKind, REDACTED};
use erp_gateway::config::{ApiKeyConfig, Environment};
use serde_json::json;
use tower::ServiceExt;

mod common;

#[tokio::test]
async fn register_with_short_password_is_a_validation_error() {
    let (router, _app) = common::build(common::test_config());

    let response = router
        .oneshot(common::json(
            "POST",
            "/api/v1/users/register",
            json!({"email": "a@b.co", "password": "x", "username": "u"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = common::body_json(response).await;
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert!(body["details"]["password"]
        .as_str()
        .unwrap()
        .contains("at least 8"));
}

#[tokio::test]
async fn register_with_strong_password_is_created() {
    let (router, _app) = common::build(common::test_config());

    let response = router
        .oneshot(common::json(
            "POST",
            "/api/v1/users/register",
            json!({"email": "a@b.co", "password": "Str0ng!Pass2024", "username": "u"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = common::body_json(response).await;
    assert_eq!(body["email"], "a@b.co");
    assert!(body["strength"]["score"].as_u64().unwrap() >= 3);
}

#[tokio::test]
async fn pagination_limit_above_maximum_is_rejected() {
    let (router, _app) = common::build(common::test_config());

    let response = router
        .oneshot(common::empty("POST", "/api/v1/orders?limit=2000"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(common::body_json(response).await["code"], "INVALID_QUERY_PARAMS");
}

#[tokio::test]
async fn state_change_without_csrf_token_is_forbidden() {
    let (router, _app) = common::build(common::test_config());

    let response = router
        .oneshot(common::json("PUT", "/api/v1/users/u1", json!({"name": "Ada"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        response.headers()["x-content-type-options"],
        "nosniff",
        "terminal responses still carry security headers"
    );
    assert_eq!(common::body_json(response).await["code"], "CSRF_VALIDATION_FAILED");
}

#[tokio::test]
async fn issued_csrf_token_round_trips() {
    let (router, _app) = common::build(common::test_config());

    let issued = router
        .clone()
        .oneshot(common::empty("GET", "/api/v1/csrf-token"))
        .await
        .unwrap();
    assert_eq!(issued.status(), StatusCode::OK);
    let cookie = common::set_cookie(&issued, "_csrf").unwrap();
    let body = common::body_json(issued).await;
    assert_eq!(body["csrf_token"], cookie.as_str());

    let response = router
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/api/v1/users/u1")
                .header(header::COOKIE, format!("_csrf={cookie}"))
                .header("x-csrf-token", &cookie)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({"name": "Ada"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = common::body_json(response).await;
    assert_eq!(body, json!({"method": "PUT", "path": "/api/v1/users/u1"}));
}

#[tokio::test]
async fn mismatched_csrf_token_is_forbidden() {
    let (router, _app) = common::build(common::test_config());

    let response = router
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/v1/users/u1")
                .header(header::COOKIE, "_csrf=aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa")
                .header("x-csrf-token", "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(common::body_json(response).await["code"], "CSRF_VALIDATION_FAILED");
}

#[tokio::test]
async fn api_key_skips_csrf_and_bad_key_is_rejected() {
    let mut config = common::test_config();
    config.security.api_keys = vec![ApiKeyConfig {
        id: "warehouse-sync".into(),
        key: "wh-7f3a9c2e51d84b60".into(),
        roles: vec!["integration".into()],
    }];
    let (router, _app) = common::build(config);

    let accepted = router
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/api/v1/inventory/42")
                .header("x-api-key", "wh-7f3a9c2e51d84b60")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(accepted.status(), StatusCode::OK);

    let rejected = router
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/api/v1/inventory/42")
                .header(header::AUTHORIZATION, "ApiKey not-a-real-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(common::body_json(rejected).await["code"], "INVALID_API_KEY");
}

#[tokio::test]
async fn injection_in_strict_mode_is_rejected_with_a_code() {
    let (router, _app) = common::build(common::test_config());

    for request in [
        common::json(
            "POST",
            "/api/v1/products",
            json!({"name": "<script>alert(1)</script>"}),
        ),
        common::empty("GET", "/api/v1/products?search=1%27%20OR%20%271%27%3D%271"),
        common::empty("GET", "/api/v1/files?path=..%2F..%2Fetc%2Fpasswd"),
    ] {
        let response = router.clone().oneshot(request).await.unwrap();
        assert!(
            [400, 413, 414, 415, 431].contains(&response.status().as_u16()),
            "unexpected status {}",
            response.status()
        );
        let body = common::body_json(response).await;
        assert!(body["code"].is_string());
    }
}

#[tokio::test]
async fn plain_text_payload_is_rejected_in_strict_mode() {
    let (router, _app) = common::build(common::test_config());

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/notes")
                .header(header::CONTENT_TYPE, "text/plain")
                .body(Body::from(
                    "<script>alert(1)</script>; DROP TABLE users; ../../etc/passwd",
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = common::body_json(response).await;
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert!(body["details"]["body"].is_string());
}

#[tokio::test]
async fn lenient_mode_lets_suspicious_content_through() {
    let mut config = common::test_config();
    config.validation.strict_mode = false;
    let (router, _app) = common::build(config);

    let response = router
        .oneshot(common::empty("GET", "/api/v1/products?search=%3Cscript%3E"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unsupported_media_type_is_415() {
    let (router, _app) = common::build(common::test_config());

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/orders")
                .header(header::CONTENT_TYPE, "application/xml")
                .body(Body::from("<order/>"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(common::body_json(response).await["code"], "UNSUPPORTED_MEDIA_TYPE");
}

#[tokio::test]
async fn production_headers_and_request_id() {
    let (router, _app) = common::build(common::test_config());

    let response = router
        .oneshot(common::empty("GET", "/health"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers["x-frame-options"], "DENY");
    assert_eq!(headers["x-xss-protection"], "1; mode=block");
    assert_eq!(headers["referrer-policy"], "strict-origin-when-cross-origin");
    assert!(headers["strict-transport-security"]
        .to_str()
        .unwrap()
        .contains("includeSubDomains"));
    assert!(headers.contains_key("content-security-policy"));
    assert!(headers.contains_key("x-request-id"));
}

#[tokio::test]
async fn development_omits_hsts() {
    let mut config = common::test_config();
    config.security.environment = Environment::Development;
    let (router, _app) = common::build(config);

    let response = router
        .oneshot(common::empty("GET", "/health"))
        .await
        .unwrap();
    assert!(!response.headers().contains_key("strict-transport-security"));
    assert!(!response.headers().contains_key("content-security-policy"));
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
}

#[tokio::test]
async fn cors_rejects_unknown_origin_and_answers_preflight() {
    let mut config = common::test_config();
    config.security.cors.enabled = true;
    config.security.cors.allowed_origins = vec!["https://*.erp.example".into()];
    let (router, _app) = common::build(config);

    let rejected = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/products")
                .header(header::ORIGIN, "https://evil.example")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::FORBIDDEN);
    assert_eq!(common::body_json(rejected).await["code"], "ORIGIN_NOT_ALLOWED");

    let preflight = router
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/api/v1/products")
                .header(header::ORIGIN, "https://app.erp.example")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(preflight.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        preflight.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "https://app.erp.example"
    );
}

#[tokio::test]
async fn failed_login_is_audited_with_redacted_password() {
    let (router, app) = common::build(common::test_config());

    let response = router
        .oneshot(common::json(
            "POST",
            "/api/v1/auth/login",
            json!({"email": "a@b.co", "password": "Wrong-pass1"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(common::body_json(response).await["code"], "UNAUTHORIZED");

    let events = app
        .coordinator()
        .audit()
        .query(&AuditQuery {
            kind: Some(EventKind::AuthLoginFailed),
            ..AuditQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.status, 401);
    assert_eq!(event.client_ip.as_deref(), Some("203.0.113.10"));
    assert_eq!(event.attributes["body"]["password"], REDACTED);
    assert!(!event.request_id.is_empty());
}

#[tokio::test]
async fn terminated_requests_skip_the_handler_audit() {
    let (router, app) = common::build(common::test_config());

    let response = router
        .oneshot(common::empty("DELETE", "/api/v1/users/u1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let events = app
        .coordinator()
        .audit()
        .query(&AuditQuery::default())
        .await
        .unwrap();
    assert!(events.is_empty());
}
