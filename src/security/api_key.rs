//! API credential authentication.
//!
//! Credentials arrive in `X-API-Key` or as `Authorization: ApiKey <key>`.
//! Every configured key is compared in constant time, without stopping at the
//! first match, so timing does not reveal which key (if any) was close.

use axum::http::{header, HeaderMap};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::config::ApiKeyConfig;
use crate::security::context::{AuthMethod, Principal};

pub const API_KEY_HEADER: &str = "x-api-key";

struct Credential {
    id: String,
    secret: Zeroizing<Vec<u8>>,
    roles: Vec<String>,
}

/// Result of looking for an API credential on a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiKeyOutcome {
    Absent,
    Authenticated(Principal),
    Invalid,
}

pub struct ApiKeyAuthenticator {
    credentials: Vec<Credential>,
}

impl std::fmt::Debug for ApiKeyAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyAuthenticator")
            .field("ids", &self.credentials.iter().map(|c| &c.id).collect::<Vec<_>>())
            .finish()
    }
}

impl ApiKeyAuthenticator {
    pub fn new(keys: &[ApiKeyConfig]) -> Self {
        Self {
            credentials: keys
                .iter()
                .map(|k| Credential {
                    id: k.id.clone(),
                    secret: Zeroizing::new(k.key.as_bytes().to_vec()),
                    roles: k.roles.clone(),
                })
                .collect(),
        }
    }

    pub fn authenticate(&self, headers: &HeaderMap) -> ApiKeyOutcome {
        let Some(presented) = presented_key(headers) else {
            return ApiKeyOutcome::Absent;
        };

        let mut matched = None;
        for (index, credential) in self.credentials.iter().enumerate() {
            let equal: bool = credential.secret.as_slice().ct_eq(presented.as_bytes()).into();
            if equal && matched.is_none() {
                matched = Some(index);
            }
        }

        match matched.map(|i| &self.credentials[i]) {
            Some(credential) => {
                let mut principal = Principal::anonymous();
                principal.credential_id = Some(credential.id.clone());
                principal.auth_method = AuthMethod::ApiKey;
                principal.roles.extend(credential.roles.iter().cloned());
                ApiKeyOutcome::Authenticated(principal)
            }
            None => ApiKeyOutcome::Invalid,
        }
    }
}

/// Presented key, if any. Non-ApiKey `Authorization` schemes are ignored.
pub fn presented_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(key) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(key.trim());
    }
    let authorization = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, key) = authorization.split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("apikey")
        .then(|| key.trim())
}
