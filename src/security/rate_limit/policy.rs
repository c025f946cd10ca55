//! Rate policies, endpoint lookup and client identifiers.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use crate::config::{RateLimitConfig, RatePolicyConfig};
use crate::security::context::Principal;
use crate::security::route_matches;

use super::RateLimitConfigError;

/// Immutable per-window limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatePolicy {
    pub requests: u32,
    pub window: Duration,
    pub by_ip: bool,
    pub by_user: bool,
    pub by_api_key: bool,
    /// Counter namespace. `None` for the default policy.
    pub scope: Option<String>,
}

impl RatePolicy {
    pub fn from_config(
        config: &RatePolicyConfig,
        scope: Option<String>,
    ) -> Result<Self, RateLimitConfigError> {
        let name = scope.clone().unwrap_or_else(|| "default".to_string());
        if config.requests == 0 {
            return Err(RateLimitConfigError::InvalidPolicy {
                policy: name,
                reason: "requests must be at least 1".into(),
            });
        }
        if config.window_secs == 0 {
            return Err(RateLimitConfigError::InvalidPolicy {
                policy: name,
                reason: "window must be positive".into(),
            });
        }
        if !(config.by_ip || config.by_user || config.by_api_key) {
            return Err(RateLimitConfigError::InvalidPolicy {
                policy: name,
                reason: "at least one of by_ip, by_user, by_api_key must be set".into(),
            });
        }
        Ok(Self {
            requests: config.requests,
            window: Duration::from_secs(config.window_secs),
            by_ip: config.by_ip,
            by_user: config.by_user,
            by_api_key: config.by_api_key,
            scope,
        })
    }

    pub fn window_secs(&self) -> u64 {
        self.window.as_secs()
    }
}

/// (method, route pattern). Method `*` matches any method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointKey {
    pub method: String,
    pub route: String,
}

impl EndpointKey {
    pub fn new(method: &str, route: &str) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            route: route.to_string(),
        }
    }

    fn method_matches(&self, method: &str) -> bool {
        self.method == "*" || self.method.eq_ignore_ascii_case(method)
    }
}

impl std::fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.route)
    }
}

/// Endpoint overrides plus the default policy.
///
/// Lookup: exact (method, route), then the longest matching `/*` prefix,
/// then the default.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    exact: HashMap<EndpointKey, RatePolicy>,
    /// (key, `/*` route pattern), longest pattern first.
    wildcard: Vec<(EndpointKey, String, RatePolicy)>,
    default: RatePolicy,
}

impl PolicyTable {
    pub fn from_config(config: &RateLimitConfig) -> Result<Self, RateLimitConfigError> {
        let default = RatePolicy::from_config(&config.default_policy, None)?;
        let mut exact = HashMap::new();
        let mut wildcard = Vec::new();

        for endpoint in &config.endpoints {
            let key = EndpointKey::new(&endpoint.method, &endpoint.route);
            let policy = RatePolicy::from_config(&endpoint.policy, Some(key.to_string()))?;
            if endpoint.route.ends_with("/*") {
                wildcard.push((key, endpoint.route.clone(), policy));
            } else if endpoint.route.contains('*') {
                return Err(RateLimitConfigError::InvalidPolicy {
                    policy: key.to_string(),
                    reason: "wildcard routes must end in '/*'".to_string(),
                });
            } else {
                exact.insert(key, policy);
            }
        }
        wildcard.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

        Ok(Self {
            exact,
            wildcard,
            default,
        })
    }

    pub fn lookup(&self, method: &str, path: &str) -> &RatePolicy {
        let method = method.to_ascii_uppercase();
        if let Some(policy) = self
            .exact
            .get(&EndpointKey::new(&method, path))
            .or_else(|| self.exact.get(&EndpointKey::new("*", path)))
        {
            return policy;
        }
        self.wildcard
            .iter()
            .find(|(key, pattern, _)| key.method_matches(&method) && route_matches(pattern, path))
            .map(|(_, _, policy)| policy)
            .unwrap_or(&self.default)
    }

    pub fn default_policy(&self) -> &RatePolicy {
        &self.default
    }
}

/// Composite identifier of the caller, e.g. `ip:10.0.0.1|user:42`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentifier(String);

impl ClientIdentifier {
    /// Join the sources the policy enables. `None` when none is available.
    pub fn build(policy: &RatePolicy, ip: Option<IpAddr>, principal: &Principal) -> Option<Self> {
        let mut parts = Vec::with_capacity(3);
        if policy.by_ip {
            if let Some(ip) = ip {
                parts.push(format!("ip:{ip}"));
            }
        }
        if policy.by_user {
            if let Some(user) = &principal.user_id {
                parts.push(format!("user:{user}"));
            }
        }
        if policy.by_api_key {
            if let Some(credential) = &principal.credential_id {
                parts.push(format!("api:{credential}"));
            }
        }
        if parts.is_empty() {
            None
        } else {
            Some(Self(parts.join("|")))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Counter key for the window starting at `window_start` (epoch seconds).
    ///
    /// Endpoint overrides count in their own namespace so that traffic to
    /// other routes does not consume their budget.
    pub fn counter_key(&self, prefix: &str, policy: &RatePolicy, window_start: u64) -> String {
        let label = window_label(window_start, policy.window_secs());
        match &policy.scope {
            Some(scope) => format!("{prefix}{}|route:{scope}:{label}", self.0),
            None => format!("{prefix}{}:{label}", self.0),
        }
    }

    /// Penalty marker key. Penalties apply to the client on every route.
    pub fn penalty_key(&self, prefix: &str) -> String {
        format!("{prefix}penalty:{}", self.0)
    }
}

impl std::fmt::Display for ClientIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Start of the fixed window containing `now`.
pub fn window_start(now: u64, window_secs: u64) -> u64 {
    (now / window_secs) * window_secs
}

/// ISO minute of the window start, or ISO second for sub-minute windows.
pub fn window_label(window_start: u64, window_secs: u64) -> String {
    let format = if window_secs < 60 {
        "%Y-%m-%dT%H:%M:%SZ"
    } else {
        "%Y-%m-%dT%H:%MZ"
    };
    chrono::DateTime::<chrono::Utc>::from_timestamp(window_start as i64, 0)
        .map(|t| t.format(format).to_string())
        .unwrap_or_else(|| window_start.to_string())
}
