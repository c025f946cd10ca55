//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, Request, Response};
use axum::{Extension, Router};
use erp_gateway::config::{AuditConfig, GatewayConfig};
use erp_gateway::lifecycle::Application;
use serde_json::Value;

/// Peer address every in-process request appears to come from.
pub const PEER: &str = "203.0.113.10:40000";

pub const PEPPER: &str = "integration-pepper";

/// Production defaults with an in-memory audit buffer and a cheap bcrypt cost.
pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.audit = AuditConfig {
        file_enabled: false,
        ..AuditConfig::default()
    };
    config.password.cost = 4;
    config.password.pepper = PEPPER.to_string();
    config
}

/// Application plus its router, with a fixed peer address.
pub fn build(config: GatewayConfig) -> (Router, Application) {
    build_with_peer(config, PEER)
}

pub fn build_with_peer(config: GatewayConfig, peer: &str) -> (Router, Application) {
    let app = Application::build(config).unwrap();
    let peer: SocketAddr = peer.parse().unwrap();
    let router = app.router().layer(Extension(ConnectInfo(peer)));
    (router, app)
}

pub fn empty(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn json(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Value of cookie `name` from the response's `Set-Cookie` headers.
pub fn set_cookie(response: &Response<Body>, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| k.trim() == name)
        .map(|(_, v)| v.trim().to_string())
}
