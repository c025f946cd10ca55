//! Password hashing, verification, policy and generation.
//!
//! # Responsibilities
//! - Peppered bcrypt hashing with a clamped work factor
//! - Policy validation reporting every violation at once
//! - Strength scoring, CSPRNG password and reset-token generation
//!
//! # Design Decisions
//! - The pepper is appended to the plaintext before hashing and verifying and
//!   never appears in the record. It lives in a `Zeroizing` buffer, as does
//!   every peppered input
//! - bcrypt reads at most 72 input bytes, so construction refuses a policy
//!   whose `max_length + pepper` could exceed that
//! - bcrypt is CPU-bound; async callers go through `spawn_blocking`

pub mod policy;

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::config::PasswordConfig;

pub use policy::{PasswordPolicy, PolicyViolation, Strength, StrengthLabel};

/// Largest input bcrypt consumes.
pub const MAX_HASH_INPUT_BYTES: usize = 72;

pub const MIN_COST: u32 = 4;
pub const MAX_COST: u32 = 31;

const RESET_TOKEN_BYTES: usize = 32;
const MAX_GENERATION_ATTEMPTS: usize = 64;

/// Error returned by the password service.
#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("password does not meet policy: {}", join(.0))]
    Policy(Vec<PolicyViolation>),

    #[error("invalid password configuration: {0}")]
    Config(String),

    #[error("generated length {requested} outside {min}..={max}")]
    InvalidLength {
        requested: usize,
        min: usize,
        max: usize,
    },

    #[error("could not generate a password satisfying policy")]
    Generation,

    #[error("malformed password record")]
    InvalidRecord,

    #[error("hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("hashing task failed: {0}")]
    Task(String),
}

fn join(violations: &[PolicyViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Peppered bcrypt password service. Cheap to clone.
#[derive(Clone)]
pub struct PasswordService {
    cost: u32,
    pepper: Arc<Zeroizing<Vec<u8>>>,
    policy: Arc<PasswordPolicy>,
}

impl std::fmt::Debug for PasswordService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordService")
            .field("cost", &self.cost)
            .field("pepper", &"[REDACTED]")
            .field("policy", &self.policy)
            .finish()
    }
}

impl PasswordService {
    pub fn new(config: &PasswordConfig, pepper: &[u8]) -> Result<Self, PasswordError> {
        if config.max_length + pepper.len() > MAX_HASH_INPUT_BYTES {
            return Err(PasswordError::Config(format!(
                "max_length {} plus pepper {} exceeds {} bytes",
                config.max_length,
                pepper.len(),
                MAX_HASH_INPUT_BYTES
            )));
        }
        if config.min_length > config.max_length {
            return Err(PasswordError::Config(format!(
                "min_length {} exceeds max_length {}",
                config.min_length, config.max_length
            )));
        }

        let cost = config.cost.clamp(MIN_COST, MAX_COST);
        if cost != config.cost {
            tracing::warn!(configured = config.cost, effective = cost, "bcrypt cost clamped");
        }
        if pepper.is_empty() {
            tracing::warn!("password pepper is empty");
        }

        Ok(Self {
            cost,
            pepper: Arc::new(Zeroizing::new(pepper.to_vec())),
            policy: Arc::new(PasswordPolicy::from_config(config)),
        })
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    pub fn policy(&self) -> &PasswordPolicy {
        &self.policy
    }

    fn peppered(&self, plaintext: &str) -> Zeroizing<Vec<u8>> {
        let mut input = Zeroizing::new(Vec::with_capacity(plaintext.len() + self.pepper.len()));
        input.extend_from_slice(plaintext.as_bytes());
        input.extend_from_slice(&self.pepper);
        input
    }

    /// Validate against policy, then hash `plaintext || pepper`.
    pub fn hash(&self, plaintext: &str) -> Result<String, PasswordError> {
        self.validate(plaintext)?;
        let input = self.peppered(plaintext);
        Ok(bcrypt::hash(input.as_slice(), self.cost)?)
    }

    /// Compare `plaintext || pepper` against a stored record.
    ///
    /// Plaintexts longer than the hashing bound are rejected without hashing;
    /// no record can have been produced from them.
    pub fn verify(&self, plaintext: &str, record: &str) -> Result<bool, PasswordError> {
        let input = self.peppered(plaintext);
        if input.len() > MAX_HASH_INPUT_BYTES {
            return Ok(false);
        }
        bcrypt::verify(input.as_slice(), record).map_err(|_| PasswordError::InvalidRecord)
    }

    /// All policy violations, or `Ok(())`.
    pub fn validate(&self, plaintext: &str) -> Result<(), PasswordError> {
        let violations = self.policy.violations(plaintext);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(PasswordError::Policy(violations))
        }
    }

    pub fn strength(&self, plaintext: &str) -> Strength {
        self.policy.strength(plaintext)
    }

    /// True when the record was hashed with a lower cost than configured, or
    /// cannot be parsed.
    pub fn needs_rehash(&self, record: &str) -> bool {
        match record_cost(record) {
            Some(cost) => cost < self.cost,
            None => true,
        }
    }

    /// Random password of `length` characters that satisfies policy.
    pub fn generate(&self, length: usize) -> Result<Zeroizing<String>, PasswordError> {
        let min = self.policy.min_length.max(4);
        let max = self.policy.max_length;
        if length < min || length > max {
            return Err(PasswordError::InvalidLength {
                requested: length,
                min,
                max,
            });
        }

        let alphabet = PasswordPolicy::generation_alphabet();
        // Largest multiple of the alphabet size that fits in a byte.
        let zone = (256 / alphabet.len()) * alphabet.len();

        for _ in 0..MAX_GENERATION_ATTEMPTS {
            let mut out = Zeroizing::new(String::with_capacity(length));
            let mut buf = Zeroizing::new([0u8; 64]);
            while out.len() < length {
                OsRng.fill_bytes(&mut buf[..]);
                for &b in buf.iter() {
                    if (b as usize) < zone && out.len() < length {
                        out.push(alphabet[b as usize % alphabet.len()] as char);
                    }
                }
            }
            if self.policy.violations(&out).is_empty() {
                return Ok(out);
            }
        }
        Err(PasswordError::Generation)
    }

    /// Opaque reset token: 32 random bytes, base64url without padding.
    pub fn generate_reset_token(&self) -> String {
        generate_reset_token()
    }

    pub async fn hash_async(&self, plaintext: String) -> Result<String, PasswordError> {
        let service = self.clone();
        let plaintext = Zeroizing::new(plaintext);
        tokio::task::spawn_blocking(move || service.hash(&plaintext))
            .await
            .map_err(|e| PasswordError::Task(e.to_string()))?
    }

    pub async fn verify_async(
        &self,
        plaintext: String,
        record: String,
    ) -> Result<bool, PasswordError> {
        let service = self.clone();
        let plaintext = Zeroizing::new(plaintext);
        tokio::task::spawn_blocking(move || service.verify(&plaintext, &record))
            .await
            .map_err(|e| PasswordError::Task(e.to_string()))?
    }
}

pub fn generate_reset_token() -> String {
    let mut bytes = Zeroizing::new([0u8; RESET_TOKEN_BYTES]);
    OsRng.fill_bytes(&mut bytes[..]);
    URL_SAFE_NO_PAD.encode(&bytes[..])
}

/// Cost field of a `$2x$NN$...` record.
fn record_cost(record: &str) -> Option<u32> {
    let mut parts = record.split('$');
    if !parts.next()?.is_empty() {
        return None;
    }
    let _variant = parts.next()?;
    parts.next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(pepper: &[u8]) -> PasswordService {
        let config = PasswordConfig {
            cost: 4,
            ..PasswordConfig::default()
        };
        PasswordService::new(&config, pepper).unwrap()
    }

    #[test]
    fn round_trip_with_pepper() {
        let svc = service(b"P1");
        let record = svc.hash("Str0ng!Pass2024").unwrap();
        assert!(record.starts_with("$2"));
        assert!(!record.contains("P1"));
        assert!(svc.verify("Str0ng!Pass2024", &record).unwrap());
        assert!(!svc.verify("Str0ng!Pass2025", &record).unwrap());
    }

    #[test]
    fn different_pepper_fails_verification() {
        let record = service(b"P1").hash("Str0ng!Pass2024").unwrap();
        assert!(!service(b"P2").verify("Str0ng!Pass2024", &record).unwrap());
    }

    #[test]
    fn policy_failure_returns_error_not_hash() {
        let err = service(b"P1").hash("x").unwrap_err();
        match err {
            PasswordError::Policy(violations) => {
                assert!(violations.contains(&PolicyViolation::TooShort { min: 8 }))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cost_is_clamped() {
        let config = PasswordConfig {
            cost: 1,
            ..PasswordConfig::default()
        };
        assert_eq!(PasswordService::new(&config, b"").unwrap().cost(), MIN_COST);
    }

    #[test]
    fn pepper_bound_is_enforced() {
        let config = PasswordConfig::default();
        let pepper = vec![b'p'; MAX_HASH_INPUT_BYTES - config.max_length + 1];
        assert!(matches!(
            PasswordService::new(&config, &pepper),
            Err(PasswordError::Config(_))
        ));
    }

    #[test]
    fn malformed_record_is_an_error() {
        assert!(matches!(
            service(b"P1").verify("Str0ng!Pass2024", "not-a-hash"),
            Err(PasswordError::InvalidRecord)
        ));
    }

    #[test]
    fn needs_rehash_compares_cost() {
        let svc = service(b"P1");
        let record = svc.hash("Str0ng!Pass2024").unwrap();
        assert!(!svc.needs_rehash(&record));

        let stronger = PasswordService::new(
            &PasswordConfig {
                cost: 5,
                ..PasswordConfig::default()
            },
            b"P1",
        )
        .unwrap();
        assert!(stronger.needs_rehash(&record));
        assert!(svc.needs_rehash("garbage"));
    }

    #[test]
    fn generated_passwords_satisfy_policy() {
        let svc = service(b"P1");
        for _ in 0..20 {
            let generated = svc.generate(16).unwrap();
            assert_eq!(generated.chars().count(), 16);
            assert!(svc.validate(&generated).is_ok());
        }
        assert!(matches!(
            svc.generate(3),
            Err(PasswordError::InvalidLength { .. })
        ));
    }

    #[test]
    fn reset_tokens_are_unique_base64url() {
        let a = generate_reset_token();
        let b = generate_reset_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[tokio::test]
    async fn async_wrappers_round_trip() {
        let svc = service(b"P1");
        let record = svc.hash_async("Str0ng!Pass2024".into()).await.unwrap();
        assert!(svc
            .verify_async("Str0ng!Pass2024".into(), record)
            .await
            .unwrap());
    }
}
