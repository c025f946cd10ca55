//! Fixed-window limiter over the shared store.

use std::collections::HashSet;
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::RateLimitConfig;
use crate::observability::metrics;
use crate::security::context::Principal;
use crate::store::{SharedStore, StoreError};

use super::policy::{window_start, ClientIdentifier, PolicyTable, RatePolicy};
use super::{RateDecision, RateLimitConfigError, RateStatus};

/// Inputs the limiter needs from one request.
#[derive(Debug, Clone, Copy)]
pub struct RateRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub client_ip: Option<IpAddr>,
    pub principal: &'a Principal,
}

/// Shared-store backed rate limiter.
pub struct RateLimiter {
    store: Arc<dyn SharedStore>,
    policies: PolicyTable,
    key_prefix: String,
    penalty: Option<Duration>,
    allowlist: HashSet<IpAddr>,
    denylist: HashSet<IpAddr>,
    exempt_admins: bool,
    store_timeout: Duration,
}

impl RateLimiter {
    pub fn new(
        config: &RateLimitConfig,
        store: Arc<dyn SharedStore>,
    ) -> Result<Self, RateLimitConfigError> {
        let policies = PolicyTable::from_config(config)?;
        let penalty = if config.penalty_enabled {
            let secs = config
                .penalty_base_secs
                .saturating_mul(u64::from(config.penalty_factor));
            if secs == 0 {
                return Err(RateLimitConfigError::InvalidPenalty);
            }
            Some(Duration::from_secs(secs))
        } else {
            None
        };

        Ok(Self {
            store,
            policies,
            key_prefix: config.key_prefix.clone(),
            penalty,
            allowlist: parse_ips(&config.ip_allowlist)?,
            denylist: parse_ips(&config.ip_denylist)?,
            exempt_admins: config.exempt_admins,
            store_timeout: Duration::from_millis(config.store_timeout_ms),
        })
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    pub async fn check(&self, req: &RateRequest<'_>) -> RateDecision {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.check_at(req, now).await
    }

    /// Decide admission as of `now` (epoch seconds).
    pub async fn check_at(&self, req: &RateRequest<'_>, now: u64) -> RateDecision {
        if let Some(ip) = req.client_ip {
            if self.denylist.contains(&ip) {
                tracing::warn!(client_ip = %ip, "Request from deny-listed address");
                return RateDecision::IpBlocked;
            }
        }
        if !self.allowlist.is_empty()
            && !req.client_ip.is_some_and(|ip| self.allowlist.contains(&ip))
        {
            return RateDecision::IpNotAllowed;
        }
        if self.exempt_admins && req.principal.is_admin() {
            return RateDecision::Exempt;
        }

        let policy = self.policies.lookup(req.method, req.path);
        let Some(client) = ClientIdentifier::build(policy, req.client_ip, req.principal) else {
            return RateDecision::NotApplicable;
        };

        match self.evaluate(&client, policy, now).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(client = %client, error = %e, "Rate limit store failure, allowing request");
                let start = window_start(now, policy.window_secs());
                RateDecision::Allowed(RateStatus {
                    limit: policy.requests,
                    remaining: policy.requests,
                    reset_epoch: start + policy.window_secs(),
                })
            }
        }
    }

    async fn evaluate(
        &self,
        client: &ClientIdentifier,
        policy: &RatePolicy,
        now: u64,
    ) -> Result<RateDecision, StoreError> {
        let penalty_key = client.penalty_key(&self.key_prefix);
        if self.penalty.is_some() {
            if let Some(ttl) = self.bounded(self.store.ttl(&penalty_key)).await? {
                let retry_after = ceil_secs(ttl);
                return Ok(RateDecision::Penalized {
                    status: RateStatus {
                        limit: policy.requests,
                        remaining: 0,
                        reset_epoch: now + retry_after,
                    },
                    retry_after,
                });
            }
        }

        let window_secs = policy.window_secs();
        let start = window_start(now, window_secs);
        let reset_epoch = start + window_secs;
        let key = client.counter_key(&self.key_prefix, policy, start);
        let count = self
            .bounded(self.store.incr_with_ttl(&key, policy.window))
            .await?;
        let limit = u64::from(policy.requests);

        if count <= limit {
            return Ok(RateDecision::Allowed(RateStatus {
                limit: policy.requests,
                remaining: (limit - count) as u32,
                reset_epoch,
            }));
        }

        let mut retry_after = reset_epoch.saturating_sub(now).max(1);
        if let Some(penalty) = self.penalty {
            let created = self
                .bounded(self.store.set_if_absent(&penalty_key, "1", penalty))
                .await?;
            if created {
                tracing::warn!(
                    client = %client,
                    penalty_secs = penalty.as_secs(),
                    "Rate limit exceeded, penalty applied"
                );
            }
            retry_after = retry_after.max(penalty.as_secs());
        }

        Ok(RateDecision::Exceeded {
            status: RateStatus {
                limit: policy.requests,
                remaining: 0,
                reset_epoch,
            },
            retry_after,
        })
    }

    async fn bounded<T>(
        &self,
        op: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.store_timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout),
        }
    }
}

impl RateDecision {
    pub(crate) fn record_metrics(&self) {
        if let Some(code) = self.denial_code() {
            metrics::record_rate_limited(code);
        }
    }
}

fn parse_ips(entries: &[String]) -> Result<HashSet<IpAddr>, RateLimitConfigError> {
    entries
        .iter()
        .map(|e| {
            e.parse()
                .map_err(|_| RateLimitConfigError::InvalidAddress(e.clone()))
        })
        .collect()
}

fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    secs.max(1)
}
