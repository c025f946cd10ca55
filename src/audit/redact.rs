//! Redaction of sensitive attributes and headers.
//!
//! A name is sensitive when it contains any configured substring,
//! case-insensitively. Sensitive values become [`REDACTED`] at any depth.

use std::collections::HashSet;

use axum::http::HeaderMap;
use serde_json::{Map, Value};

use crate::config::AuditConfig;

pub const REDACTED: &str = "[REDACTED]";

#[derive(Debug, Clone)]
pub struct Redactor {
    substrings: Vec<String>,
    headers: HashSet<String>,
}

impl Redactor {
    pub fn new(sensitive_fields: &[String], sensitive_headers: &[String]) -> Self {
        Self {
            substrings: sensitive_fields
                .iter()
                .map(|f| f.to_lowercase())
                .filter(|f| !f.is_empty())
                .collect(),
            headers: sensitive_headers.iter().map(|h| h.to_ascii_lowercase()).collect(),
        }
    }

    pub fn from_config(config: &AuditConfig) -> Self {
        Self::new(&config.sensitive_fields, &config.sensitive_headers)
    }

    pub fn is_sensitive(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.substrings.iter().any(|s| name.contains(s.as_str()))
    }

    /// Copy of `value` with every sensitive key's value replaced.
    pub fn redact(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(self.redact_map(map)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.redact(v)).collect()),
            other => other.clone(),
        }
    }

    pub fn redact_map(&self, map: &Map<String, Value>) -> Map<String, Value> {
        map.iter()
            .map(|(key, value)| {
                let value = if self.is_sensitive(key) {
                    Value::String(REDACTED.to_string())
                } else {
                    self.redact(value)
                };
                (key.clone(), value)
            })
            .collect()
    }

    /// Selected headers as a JSON object, sensitive ones redacted.
    pub fn capture_headers(&self, headers: &HeaderMap, names: &[String]) -> Map<String, Value> {
        let mut captured = Map::new();
        for name in names {
            let lower = name.to_ascii_lowercase();
            let Some(value) = headers.get(lower.as_str()) else {
                continue;
            };
            let rendered = if self.headers.contains(&lower) || self.is_sensitive(&lower) {
                REDACTED.to_string()
            } else {
                String::from_utf8_lossy(value.as_bytes()).into_owned()
            };
            captured.insert(lower, Value::String(rendered));
        }
        captured
    }

    /// Query parameters as a JSON object, sensitive ones redacted.
    pub fn capture_query(&self, query: &str) -> Map<String, Value> {
        let mut captured = Map::new();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let value = if self.is_sensitive(&key) {
                REDACTED.to_string()
            } else {
                value.into_owned()
            };
            captured.insert(key.into_owned(), Value::String(value));
        }
        captured
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    fn redactor() -> Redactor {
        Redactor::from_config(&AuditConfig::default())
    }

    #[test]
    fn nested_values_are_redacted() {
        let input = json!({
            "email": "a@b.co",
            "Password": "hunter2",
            "profile": {"apiKey": "abc", "city": "Oslo"},
            "cards": [{"card_number": "4111"}, {"label": "main"}]
        });
        let output = redactor().redact(&input);
        assert_eq!(output["email"], "a@b.co");
        assert_eq!(output["Password"], REDACTED);
        assert_eq!(output["profile"]["apiKey"], REDACTED);
        assert_eq!(output["profile"]["city"], "Oslo");
        assert_eq!(output["cards"][0]["card_number"], REDACTED);
        assert_eq!(output["cards"][1]["label"], "main");
    }

    #[test]
    fn headers_and_query() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer abc"));
        headers.insert("referer", HeaderValue::from_static("https://erp.example.com/"));
        let captured = redactor().capture_headers(
            &headers,
            &["Authorization".into(), "Referer".into(), "Origin".into()],
        );
        assert_eq!(captured["authorization"], REDACTED);
        assert_eq!(captured["referer"], "https://erp.example.com/");
        assert!(!captured.contains_key("origin"));

        let query = redactor().capture_query("page=2&reset_token=xyz");
        assert_eq!(query["page"], "2");
        assert_eq!(query["reset_token"], REDACTED);
    }
}
