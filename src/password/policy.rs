//! Password policy: length, character classes, common-password deny list and
//! strength scoring.

use std::collections::HashSet;

use serde::Serialize;

use crate::config::PasswordConfig;

/// Most frequently leaked passwords, lower-case.
const COMMON_PASSWORDS: &[&str] = &[
    "123456", "123456789", "12345678", "12345", "1234567", "1234567890", "111111", "000000",
    "123123", "654321", "666666", "121212", "password", "password1", "password123",
    "passw0rd", "p@ssw0rd", "qwerty", "qwerty123", "qwertyuiop", "asdfghjkl", "zxcvbnm",
    "1q2w3e4r", "1qaz2wsx", "abc123", "abcd1234", "letmein", "welcome", "welcome1", "admin",
    "administrator", "root", "toor", "login", "master", "hello", "iloveyou", "monkey",
    "dragon", "football", "baseball", "soccer", "superman", "batman", "trustno1", "sunshine",
    "princess", "shadow", "michael", "jennifer", "starwars", "whatever", "freedom", "secret",
    "changeme", "default", "guest", "test", "test123", "access", "flower", "mustang",
];

/// Fragments that make a password near-common wherever they appear.
const COMMON_FRAGMENTS: &[&str] = &[
    "password", "passw0rd", "qwerty", "letmein", "iloveyou", "123456", "abc123", "trustno1",
    "welcome",
];

const SYMBOLS: &str = "!@#$%^&*()-_=+[]{};:,.?/|~";

/// One reason a password fails policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyViolation {
    TooShort { min: usize },
    TooLong { max: usize },
    MissingUppercase,
    MissingLowercase,
    MissingDigit,
    MissingSymbol,
    Common,
}

impl std::fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyViolation::TooShort { min } => {
                write!(f, "must be at least {min} characters")
            }
            PolicyViolation::TooLong { max } => write!(f, "must be at most {max} bytes"),
            PolicyViolation::MissingUppercase => f.write_str("must contain an uppercase letter"),
            PolicyViolation::MissingLowercase => f.write_str("must contain a lowercase letter"),
            PolicyViolation::MissingDigit => f.write_str("must contain a digit"),
            PolicyViolation::MissingSymbol => f.write_str("must contain a symbol"),
            PolicyViolation::Common => f.write_str("is too common"),
        }
    }
}

/// Qualitative strength bucket for a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrengthLabel {
    VeryWeak,
    Weak,
    Fair,
    Strong,
    VeryStrong,
}

impl From<u8> for StrengthLabel {
    fn from(score: u8) -> Self {
        match score {
            0 => StrengthLabel::VeryWeak,
            1 => StrengthLabel::Weak,
            2 => StrengthLabel::Fair,
            3 => StrengthLabel::Strong,
            _ => StrengthLabel::VeryStrong,
        }
    }
}

/// Strength estimate in `0..=4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Strength {
    pub score: u8,
    pub label: StrengthLabel,
}

#[derive(Debug, Clone, Copy, Default)]
struct Classes {
    upper: bool,
    lower: bool,
    digit: bool,
    symbol: bool,
}

impl Classes {
    fn of(password: &str) -> Self {
        let mut classes = Classes::default();
        for c in password.chars() {
            if c.is_uppercase() {
                classes.upper = true;
            } else if c.is_lowercase() {
                classes.lower = true;
            } else if c.is_ascii_digit() {
                classes.digit = true;
            } else if !c.is_alphanumeric() && !c.is_whitespace() {
                classes.symbol = true;
            }
        }
        classes
    }

    fn count(self) -> u8 {
        self.upper as u8 + self.lower as u8 + self.digit as u8 + self.symbol as u8
    }
}

/// Compiled password policy.
#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub max_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_digit: bool,
    pub require_symbol: bool,
    pub reject_common: bool,
    denylist: HashSet<String>,
}

impl PasswordPolicy {
    pub fn from_config(config: &PasswordConfig) -> Self {
        let denylist = COMMON_PASSWORDS
            .iter()
            .map(|s| s.to_string())
            .chain(config.extra_denylist.iter().map(|s| s.to_lowercase()))
            .collect();
        Self {
            min_length: config.min_length,
            max_length: config.max_length,
            require_uppercase: config.require_uppercase,
            require_lowercase: config.require_lowercase,
            require_digit: config.require_digit,
            require_symbol: config.require_symbol,
            reject_common: config.reject_common,
            denylist,
        }
    }

    /// Every violation, in a stable order. Empty means the password passes.
    pub fn violations(&self, password: &str) -> Vec<PolicyViolation> {
        let mut violations = Vec::new();
        if password.chars().count() < self.min_length {
            violations.push(PolicyViolation::TooShort {
                min: self.min_length,
            });
        }
        if password.len() > self.max_length {
            violations.push(PolicyViolation::TooLong {
                max: self.max_length,
            });
        }
        let classes = Classes::of(password);
        if self.require_uppercase && !classes.upper {
            violations.push(PolicyViolation::MissingUppercase);
        }
        if self.require_lowercase && !classes.lower {
            violations.push(PolicyViolation::MissingLowercase);
        }
        if self.require_digit && !classes.digit {
            violations.push(PolicyViolation::MissingDigit);
        }
        if self.require_symbol && !classes.symbol {
            violations.push(PolicyViolation::MissingSymbol);
        }
        if self.reject_common && self.is_common(password) {
            violations.push(PolicyViolation::Common);
        }
        violations
    }

    /// Exact, leet-normalised, affix-stripped or fragment match against the deny list.
    pub fn is_common(&self, password: &str) -> bool {
        let lower = password.to_lowercase();
        if self.denylist.contains(&lower) {
            return true;
        }

        if self.denylist.contains(strip_affixes(&lower)) {
            return true;
        }

        let normalized = unleet(&lower);
        let stripped = strip_affixes(&normalized);
        if self.denylist.contains(&normalized) || self.denylist.contains(stripped) {
            return true;
        }
        if stripped.is_empty() {
            // Only digits and symbols.
            return lower.chars().all(|c| c.is_ascii_digit()) && lower.len() < 12;
        }

        COMMON_FRAGMENTS
            .iter()
            .any(|fragment| lower.contains(fragment) || normalized.contains(fragment))
    }

    /// Score in `0..=4` from length tiers and character-class count.
    ///
    /// Common and near-common passwords always score 0, whatever their length.
    pub fn strength(&self, password: &str) -> Strength {
        let length = password.chars().count();
        let score = if length < 8 || self.is_common(password) {
            0
        } else {
            let length_points: u8 = match length {
                8..=11 => 1,
                12..=15 => 2,
                _ => 3,
            };
            let class_points = Classes::of(password).count().saturating_sub(2);
            (length_points + class_points).min(4)
        };
        Strength {
            score,
            label: StrengthLabel::from(score),
        }
    }

    /// Characters used by password generation.
    pub fn generation_alphabet() -> Vec<u8> {
        let mut alphabet: Vec<u8> = (b'A'..=b'Z').chain(b'a'..=b'z').chain(b'0'..=b'9').collect();
        alphabet.extend(SYMBOLS.bytes());
        alphabet
    }
}

fn unleet(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '0' => 'o',
            '1' | '!' => 'i',
            '3' => 'e',
            '4' | '@' => 'a',
            '5' | '$' => 's',
            '7' => 't',
            other => other,
        })
        .collect()
}

/// Strip leading/trailing digits and symbols, e.g. `password2024!` → `password`.
fn strip_affixes(s: &str) -> &str {
    s.trim_matches(|c: char| c.is_ascii_digit() || (!c.is_alphanumeric() && !c.is_whitespace()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> PasswordPolicy {
        PasswordPolicy::from_config(&PasswordConfig::default())
    }

    #[test]
    fn strong_password_passes() {
        assert!(policy().violations("Str0ng!Pass2024").is_empty());
    }

    #[test]
    fn reports_all_violations() {
        let violations = policy().violations("x");
        assert_eq!(
            violations,
            vec![
                PolicyViolation::TooShort { min: 8 },
                PolicyViolation::MissingUppercase,
                PolicyViolation::MissingDigit,
                PolicyViolation::MissingSymbol,
            ]
        );
    }

    #[test]
    fn too_long_is_measured_in_bytes() {
        let long = format!("Aa1!{}", "é".repeat(30));
        assert!(policy()
            .violations(&long)
            .contains(&PolicyViolation::TooLong { max: 48 }));
    }

    #[test]
    fn near_common_variants_are_rejected() {
        let p = policy();
        for candidate in [
            "password",
            "Password123!",
            "P@ssw0rd!",
            "2024password",
            "MyPassword#77",
            "Qwerty!2024",
            "Welcome1",
            "1234567",
        ] {
            assert!(p.is_common(candidate), "{candidate} should be common");
        }
        assert!(!p.is_common("Str0ng!Pass2024"));
        assert!(!p.is_common("correct-Horse-battery-7"));
    }

    #[test]
    fn extra_denylist_is_case_insensitive() {
        let mut config = PasswordConfig::default();
        config.extra_denylist.push("AcmeCorp".into());
        let p = PasswordPolicy::from_config(&config);
        assert!(p.is_common("acmecorp"));
        assert!(p.is_common("AcmeCorp2024!"));
    }

    #[test]
    fn strength_tiers() {
        let p = policy();
        assert_eq!(p.strength("abc").score, 0);
        assert_eq!(p.strength("abcdefgh").score, 1);
        assert_eq!(p.strength("Abcdefgh1").score, 2);
        assert_eq!(p.strength("Str0ng!Pass2024").score, 4);
        assert_eq!(p.strength("Str0ng!Pass2024").label, StrengthLabel::VeryStrong);
    }

    #[test]
    fn common_scores_zero_even_when_long() {
        let p = policy();
        let long_common = "Password!Password!Password!2024";
        assert_eq!(p.strength(long_common).score, 0);
    }

    #[test]
    fn alphabet_covers_all_classes() {
        let alphabet = String::from_utf8(PasswordPolicy::generation_alphabet()).unwrap();
        let classes = Classes::of(&alphabet);
        assert_eq!(classes.count(), 4);
    }
}
