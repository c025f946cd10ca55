//! Per-request security context.
//!
//! # Responsibilities
//! - Carry the authenticated principal between stages
//! - Resolve the client address, honouring forwarding headers only from
//!   trusted proxies
//!
//! # Design Decisions
//! - The context lives in request extensions for exactly one request
//! - Authentication stages write the principal; audit only reads it

use std::collections::{BTreeSet, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use axum::extract::ConnectInfo;
use axum::http::{Extensions, HeaderMap};
use serde::{Deserialize, Serialize};

/// How the caller proved its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    #[default]
    Anonymous,
    Session,
    Bearer,
    ApiKey,
}

/// Authenticated caller identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Principal {
    pub user_id: Option<String>,
    pub roles: BTreeSet<String>,
    pub credential_id: Option<String>,
    pub auth_method: AuthMethod,
}

impl Principal {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(user_id: impl Into<String>, method: AuthMethod) -> Self {
        Self {
            user_id: Some(user_id.into()),
            auth_method: method,
            ..Self::default()
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    pub fn is_admin(&self) -> bool {
        self.roles.contains("admin")
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth_method != AuthMethod::Anonymous
    }
}

/// State shared by the pipeline stages of one request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub client_ip: Option<IpAddr>,
    pub principal: Principal,
    /// Token issued by the CSRF stage on safe requests.
    pub csrf_token: Option<String>,
    pub api_key_authenticated: bool,
    pub started_at: Instant,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>, client_ip: Option<IpAddr>) -> Self {
        Self {
            request_id: request_id.into(),
            client_ip,
            principal: Principal::anonymous(),
            csrf_token: None,
            api_key_authenticated: false,
            started_at: Instant::now(),
        }
    }
}

/// Peers whose forwarding headers are believed.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxies {
    peers: HashSet<IpAddr>,
}

impl TrustedProxies {
    /// Entries that do not parse are skipped; config validation reports them.
    pub fn new(entries: &[String]) -> Self {
        Self {
            peers: entries.iter().filter_map(|e| e.parse().ok()).collect(),
        }
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.peers.contains(ip)
    }

    /// Client address for a request.
    ///
    /// The transport peer, unless the peer is trusted and supplied the
    /// left-most `X-Forwarded-For` entry or `X-Real-IP`.
    pub fn client_ip(&self, extensions: &Extensions, headers: &HeaderMap) -> Option<IpAddr> {
        let peer = extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        match peer {
            Some(peer) if self.contains(&peer) => forwarded_ip(headers).or(Some(peer)),
            Some(peer) => Some(peer),
            None => None,
        }
    }
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let from_xff = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok());

    from_xff.or_else(|| {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn extensions(peer: &str) -> Extensions {
        let mut ext = Extensions::new();
        ext.insert(ConnectInfo(peer.parse::<SocketAddr>().unwrap()));
        ext
    }

    #[test]
    fn untrusted_peer_ignores_forwarding_headers() {
        let proxies = TrustedProxies::new(&["10.0.0.1".into()]);
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4"));
        let ip = proxies.client_ip(&extensions("192.168.1.9:5000"), &headers);
        assert_eq!(ip, Some("192.168.1.9".parse().unwrap()));
    }

    #[test]
    fn trusted_peer_uses_leftmost_forwarded_entry() {
        let proxies = TrustedProxies::new(&["10.0.0.1".into()]);
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        let ip = proxies.client_ip(&extensions("10.0.0.1:443"), &headers);
        assert_eq!(ip, Some("203.0.113.7".parse().unwrap()));

        let mut real = HeaderMap::new();
        real.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        let ip = proxies.client_ip(&extensions("10.0.0.1:443"), &real);
        assert_eq!(ip, Some("198.51.100.2".parse().unwrap()));
    }

    #[test]
    fn missing_connect_info_yields_none() {
        let proxies = TrustedProxies::default();
        assert_eq!(proxies.client_ip(&Extensions::new(), &HeaderMap::new()), None);
    }

    #[test]
    fn admin_role() {
        assert!(Principal::user("u1", AuthMethod::Bearer)
            .with_role("admin")
            .is_admin());
        assert!(!Principal::anonymous().is_authenticated());
    }
}
