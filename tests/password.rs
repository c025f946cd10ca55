//! Password hashing through the public service.

use erp_gateway::config::PasswordConfig;
use erp_gateway::password::{PasswordError, PasswordService, PolicyViolation};

fn config() -> PasswordConfig {
    PasswordConfig {
        cost: 4,
        ..PasswordConfig::default()
    }
}

fn service(pepper: &str) -> PasswordService {
    PasswordService::new(&config(), pepper.as_bytes()).unwrap()
}

#[test]
fn record_only_verifies_under_the_same_pepper() {
    let p1 = service("pepper-one");
    let p2 = service("pepper-two");

    let record = p1.hash("Str0ng!Pass2024").unwrap();
    assert!(record.starts_with("$2"));
    assert!(p1.verify("Str0ng!Pass2024", &record).unwrap());
    assert!(!p2.verify("Str0ng!Pass2024", &record).unwrap());
}

#[test]
fn accepted_passwords_round_trip_and_others_do_not() {
    let service = service("round-trip");
    let passwords = ["Str0ng!Pass2024", "Ledger#Close9q", "W4rehouse.Bin-17", "Inv0ice&Run77z"];

    for p in passwords {
        let record = service.hash(p).unwrap();
        assert!(service.verify(p, &record).unwrap(), "{p}");
        for q in passwords.iter().filter(|q| **q != p) {
            assert!(!service.verify(q, &record).unwrap(), "{q} against {p}");
        }
        // Near misses.
        assert!(!service.verify(&p.to_lowercase(), &record).unwrap());
        assert!(!service.verify(&format!("{p} "), &record).unwrap());
    }
}

#[test]
fn hashes_are_salted() {
    let service = service("salt");
    let a = service.hash("Str0ng!Pass2024").unwrap();
    let b = service.hash("Str0ng!Pass2024").unwrap();
    assert_ne!(a, b);
    assert!(service.verify("Str0ng!Pass2024", &a).unwrap());
    assert!(service.verify("Str0ng!Pass2024", &b).unwrap());
}

#[test]
fn policy_failures_list_every_violation() {
    let service = service("policy");
    match service.hash("abc") {
        Err(PasswordError::Policy(violations)) => {
            assert!(violations.contains(&PolicyViolation::TooShort { min: 8 }));
            assert!(violations.contains(&PolicyViolation::MissingUppercase));
            assert!(violations.contains(&PolicyViolation::MissingDigit));
            assert!(violations.contains(&PolicyViolation::MissingSymbol));
        }
        other => panic!("expected policy error, got {other:?}"),
    }
}

#[test]
fn common_passwords_score_zero() {
    let service = service("common");
    assert_eq!(service.strength("Password1!").score, 0);
    assert!(service.strength("Str0ng!Pass2024").score >= 3);
}

#[test]
fn generated_passwords_hash_and_verify() {
    let service = service("generated");
    let generated = service.generate(20).unwrap();
    assert_eq!(generated.len(), 20);
    let record = service.hash(&generated).unwrap();
    assert!(service.verify(&generated, &record).unwrap());
    assert!(!service.needs_rehash(&record));
}

#[test]
fn malformed_record_is_an_error() {
    let service = service("malformed");
    assert!(matches!(
        service.verify("Str0ng!Pass2024", "not-a-hash"),
        Err(PasswordError::InvalidRecord)
    ));
}

#[tokio::test]
async fn async_variants_run_off_the_runtime() {
    let service = service("async");
    let record = service.hash_async("Str0ng!Pass2024".to_string()).await.unwrap();
    assert!(service
        .verify_async("Str0ng!Pass2024".to_string(), record.clone())
        .await
        .unwrap());
    assert!(!service
        .verify_async("Str0ng!Pass2025".to_string(), record)
        .await
        .unwrap());
}
