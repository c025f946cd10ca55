//! Input validation.
//!
//! # Responsibilities
//! - Enforce size bounds (body, URL, headers, query, form, uploads)
//! - Check media types and upload extensions against allow-lists
//! - Scan strings for injection, scripting, traversal and command patterns
//! - Enforce required fields and per-field length and format rules
//!
//! # Design Decisions
//! - Size, media-type, URL, header-size, pagination and malformed-body checks
//!   are always enforced
//! - Content findings (patterns, string bounds, required fields, field rules)
//!   reject only in strict mode and are logged otherwise
//! - The verdict is a pure function of policy and input; nothing is cached
//!   across requests
//!
//! # Data Flow
//! ```text
//! content-type → content-length → URL length → headers
//!     → query (count, pagination, values)
//!     → body by media type: form | JSON | multipart
//! ```

pub mod patterns;
pub mod sanitize;

use std::collections::{BTreeMap, HashMap, HashSet};

use axum::body::{Body, Bytes};
use axum::extract::{FromRequest, Multipart};
use axum::http::{header, request::Parts, HeaderMap, Method, Request, StatusCode, Uri};
use regex::Regex;
use serde_json::Value;

use crate::config::ValidationConfig;
use crate::http::response::ApiError;
use crate::observability::metrics;
use crate::security::route_matches;

pub use patterns::{DenyPatterns, PatternCategory, PatternError};
pub use sanitize::Sanitizer;

/// Error building the validator from configuration.
#[derive(Debug, thiserror::Error)]
pub enum ValidatorBuildError {
    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error("invalid pattern for field '{field}': {source}")]
    FieldPattern {
        field: String,
        #[source]
        source: regex::Error,
    },
}

/// Why a string failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StringViolation {
    TooShort(usize),
    TooLong(usize),
    ReplacementCharacter,
    ControlCharacter,
    Pattern(PatternCategory),
}

impl std::fmt::Display for StringViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StringViolation::TooShort(min) => write!(f, "must be at least {min} characters"),
            StringViolation::TooLong(max) => write!(f, "must be at most {max} characters"),
            StringViolation::ReplacementCharacter => f.write_str("contains invalid UTF-8"),
            StringViolation::ControlCharacter => f.write_str("contains control characters"),
            StringViolation::Pattern(category) => {
                write!(f, "contains a forbidden pattern ({category})")
            }
        }
    }
}

#[derive(Debug, Clone)]
struct RequiredFields {
    method: String,
    route: String,
    fields: Vec<String>,
}

/// Compiled validation policy.
#[derive(Debug, Clone)]
pub struct InputValidator {
    config: ValidationConfig,
    patterns: DenyPatterns,
    field_patterns: HashMap<String, Regex>,
    required: Vec<RequiredFields>,
    content_types: HashSet<String>,
    upload_extensions: HashSet<String>,
    unchecked_headers: HashSet<String>,
}

/// Field-level findings collected before deciding to reject or log.
type Findings = Vec<(String, String)>;

impl InputValidator {
    pub fn new(config: &ValidationConfig) -> Result<Self, ValidatorBuildError> {
        let mut field_patterns = HashMap::new();
        for (field, pattern) in &config.field_patterns {
            let anchored = Regex::new(&format!("^(?:{pattern})$")).map_err(|source| {
                ValidatorBuildError::FieldPattern {
                    field: field.clone(),
                    source,
                }
            })?;
            field_patterns.insert(field.clone(), anchored);
        }

        let lower = |items: &[String]| -> HashSet<String> {
            items.iter().map(|s| s.to_ascii_lowercase()).collect()
        };

        Ok(Self {
            patterns: DenyPatterns::new()?,
            field_patterns,
            required: config
                .required_fields
                .iter()
                .map(|r| RequiredFields {
                    method: r.method.to_ascii_uppercase(),
                    route: r.route.clone(),
                    fields: r.fields.clone(),
                })
                .collect(),
            content_types: lower(&config.allowed_content_types),
            upload_extensions: lower(&config.allowed_upload_extensions),
            unchecked_headers: lower(&config.unchecked_headers),
            config: config.clone(),
        })
    }

    pub fn is_strict(&self) -> bool {
        self.config.strict_mode
    }

    pub fn max_body_bytes(&self) -> usize {
        self.config.max_body_bytes
    }

    /// Validate one request. `body` is the fully buffered body.
    pub async fn validate_request(&self, parts: &Parts, body: &Bytes) -> Result<(), ApiError> {
        let result = self.validate_inner(parts, body).await;
        if let Err(err) = &result {
            metrics::record_validation_rejected(err.code());
            tracing::info!(
                method = %parts.method,
                path = %parts.uri.path(),
                code = err.code(),
                error = %err,
                "Request rejected by input validation"
            );
        }
        result
    }

    async fn validate_inner(&self, parts: &Parts, body: &Bytes) -> Result<(), ApiError> {
        let media_type = media_type(&parts.headers);
        self.check_content_type(media_type.as_deref(), body)?;
        self.check_content_length(&parts.headers, body)?;
        self.check_url(&parts.uri)?;
        self.validate_headers(&parts.headers)?;
        if let Some(query) = parts.uri.query() {
            self.validate_query(query)?;
        }

        let required = self.required_fields(&parts.method, parts.uri.path());
        match media_type.as_deref() {
            _ if body.is_empty() => self.validate_json_value(&Value::Null, required),
            Some("application/x-www-form-urlencoded") => self.validate_form(body, required),
            Some("multipart/form-data") => self.validate_multipart(parts, body).await,
            Some(mt) if is_json(mt) => self.validate_json(body, required),
            _ => self.validate_text(body),
        }
    }

    /// Any other accepted body is scanned as one UTF-8 string. Length is
    /// already bounded by the body limit.
    pub fn validate_text(&self, body: &[u8]) -> Result<(), ApiError> {
        let mut findings = Findings::new();
        match std::str::from_utf8(body) {
            Ok(text) => {
                if let Err(violation) = self.scan(text) {
                    findings.push(("body".to_string(), violation.to_string()));
                }
            }
            Err(_) => findings.push(("body".to_string(), "is not valid UTF-8".to_string())),
        }
        self.settle(findings, "body")
    }

    /// A string is valid iff within length bounds, free of replacement and
    /// control characters (tab, CR, LF allowed) and of every deny pattern.
    pub fn validate_string(&self, value: &str) -> Result<(), StringViolation> {
        let length = value.chars().count();
        if length < self.config.min_string_length {
            return Err(StringViolation::TooShort(self.config.min_string_length));
        }
        if length > self.config.max_string_length {
            return Err(StringViolation::TooLong(self.config.max_string_length));
        }
        self.scan(value)
    }

    /// Character and pattern checks without length bounds.
    fn scan(&self, value: &str) -> Result<(), StringViolation> {
        for c in value.chars() {
            if c == char::REPLACEMENT_CHARACTER {
                return Err(StringViolation::ReplacementCharacter);
            }
            if c.is_control() && !matches!(c, '\t' | '\n' | '\r') {
                return Err(StringViolation::ControlCharacter);
            }
        }
        match self.patterns.find(value) {
            Some(category) => Err(StringViolation::Pattern(category)),
            None => Ok(()),
        }
    }

    fn check_content_type(&self, media_type: Option<&str>, body: &Bytes) -> Result<(), ApiError> {
        if body.is_empty() {
            return Ok(());
        }
        match media_type {
            None => Err(ApiError::UnsupportedMediaType(
                "request body without Content-Type".into(),
            )),
            Some(mt) if !self.content_types.contains(mt) => Err(ApiError::UnsupportedMediaType(
                format!("content type '{mt}' is not supported"),
            )),
            Some(_) => Ok(()),
        }
    }

    fn check_content_length(&self, headers: &HeaderMap, body: &Bytes) -> Result<(), ApiError> {
        let declared = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let max = self.config.max_body_bytes;
        if declared.is_some_and(|n| n > max as u64) || body.len() > max {
            return Err(ApiError::PayloadTooLarge(format!(
                "request body exceeds {max} bytes"
            )));
        }
        Ok(())
    }

    fn check_url(&self, uri: &Uri) -> Result<(), ApiError> {
        let length = uri.to_string().len();
        if length > self.config.max_url_length {
            return Err(ApiError::UriTooLong(format!(
                "URL exceeds {} characters",
                self.config.max_url_length
            )));
        }
        Ok(())
    }

    /// Header count and per-header size, then patterns on checked headers.
    pub fn validate_headers(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        if headers.len() > self.config.max_header_count {
            return Err(ApiError::HeadersTooLarge(format!(
                "more than {} headers",
                self.config.max_header_count
            )));
        }
        for (name, value) in headers {
            if name.as_str().len() + value.len() > self.config.max_header_bytes {
                return Err(ApiError::HeadersTooLarge(format!(
                    "header '{name}' exceeds {} bytes",
                    self.config.max_header_bytes
                )));
            }
        }

        let mut findings = Findings::new();
        for (name, value) in headers {
            if self.unchecked_headers.contains(name.as_str()) {
                continue;
            }
            let text = String::from_utf8_lossy(value.as_bytes());
            if let Err(violation) = self.scan(&text) {
                findings.push((format!("header:{name}"), violation.to_string()));
            }
        }
        self.settle(findings, "headers")
    }

    /// Parameter count, pagination bounds, then string checks on keys and values.
    pub fn validate_query(&self, query: &str) -> Result<(), ApiError> {
        let pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();
        if pairs.len() > self.config.max_query_params {
            return Err(ApiError::InvalidQuery(format!(
                "more than {} query parameters",
                self.config.max_query_params
            )));
        }
        for (key, value) in &pairs {
            self.check_pagination(key, value)?;
        }

        let mut findings = Findings::new();
        for (key, value) in &pairs {
            if let Err(violation) = self.scan(key) {
                findings.push((key.clone(), format!("parameter name {violation}")));
            } else if let Err(violation) = self.validate_string(value) {
                findings.push((key.clone(), violation.to_string()));
            }
        }
        match self.settle(findings, "query") {
            Err(ApiError::Validation { message, .. }) => Err(ApiError::InvalidQuery(message)),
            other => other,
        }
    }

    fn check_pagination(&self, key: &str, value: &str) -> Result<(), ApiError> {
        let invalid = |message: String| Err(ApiError::InvalidQuery(message));
        match key {
            "limit" | "page_size" | "per_page" => match value.parse::<u64>() {
                Ok(n) if (1..=self.config.max_page_limit).contains(&n) => Ok(()),
                Ok(_) => invalid(format!(
                    "{key} must be between 1 and {}",
                    self.config.max_page_limit
                )),
                Err(_) => invalid(format!("{key} must be a positive integer")),
            },
            "page" => match value.parse::<u64>() {
                Ok(n) if n >= 1 => Ok(()),
                _ => invalid("page must be an integer of at least 1".to_string()),
            },
            "offset" => match value.parse::<u64>() {
                Ok(_) => Ok(()),
                Err(_) => invalid("offset must be a non-negative integer".to_string()),
            },
            _ => Ok(()),
        }
    }

    /// URL-encoded body: field count, then the same rules as JSON fields.
    pub fn validate_form(&self, body: &[u8], required: &[String]) -> Result<(), ApiError> {
        let pairs: Vec<(String, String)> =
            url::form_urlencoded::parse(body).into_owned().collect();
        if pairs.len() > self.config.max_form_fields {
            return Err(ApiError::field(
                "form",
                format!("more than {} fields", self.config.max_form_fields),
            ));
        }

        let mut findings = Findings::new();
        for field in required {
            if !pairs.iter().any(|(k, v)| k == field && !v.trim().is_empty()) {
                findings.push((field.clone(), "is required".to_string()));
            }
        }
        for (key, value) in &pairs {
            if let Err(violation) = self.scan(key) {
                findings.push((key.clone(), format!("field name {violation}")));
                continue;
            }
            self.check_field(key, key, value, &mut findings);
        }
        self.settle(findings, "form")
    }

    /// JSON body: parse, bound nesting, then walk every string.
    pub fn validate_json(&self, body: &[u8], required: &[String]) -> Result<(), ApiError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| ApiError::field("body", format!("malformed JSON: {e}")))?;
        self.validate_json_value(&value, required)
    }

    pub fn validate_json_value(&self, value: &Value, required: &[String]) -> Result<(), ApiError> {
        if depth(value) > self.config.max_json_depth {
            return Err(ApiError::field(
                "body",
                format!("nesting deeper than {}", self.config.max_json_depth),
            ));
        }

        let mut findings = Findings::new();
        for field in required {
            let present = match value.get(field) {
                None | Some(Value::Null) => false,
                Some(Value::String(s)) => !s.trim().is_empty(),
                Some(Value::Array(items)) => !items.is_empty(),
                Some(Value::Object(map)) => !map.is_empty(),
                Some(_) => true,
            };
            if !present {
                findings.push((field.clone(), "is required".to_string()));
            }
        }
        self.walk(value, None, "", &mut findings);
        self.settle(findings, "body")
    }

    fn walk(&self, value: &Value, field: Option<&str>, path: &str, findings: &mut Findings) {
        match value {
            Value::String(s) => {
                let name = field.unwrap_or("body");
                let location = if path.is_empty() { name } else { path };
                self.check_field(name, location, s, findings);
            }
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    self.walk(item, field, &format!("{path}[{i}]"), findings);
                }
            }
            Value::Object(map) => {
                for (key, item) in map {
                    let child = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{path}.{key}")
                    };
                    if let Err(violation) = self.scan(key) {
                        findings.push((child, format!("field name {violation}")));
                        continue;
                    }
                    self.walk(item, Some(key), &child, findings);
                }
            }
            _ => {}
        }
    }

    /// Per-field length and format, then general string validity.
    fn check_field(&self, name: &str, location: &str, value: &str, findings: &mut Findings) {
        if let Some(&max) = self.config.field_max_lengths.get(name) {
            if value.chars().count() > max {
                findings.push((location.to_string(), format!("must be at most {max} characters")));
                return;
            }
        }
        if let Some(pattern) = self.field_patterns.get(name) {
            if !pattern.is_match(value) {
                findings.push((location.to_string(), "has an invalid format".to_string()));
                return;
            }
        }
        if let Err(violation) = self.validate_string(value) {
            findings.push((location.to_string(), violation.to_string()));
        }
    }

    /// Multipart: field count, upload extension and size, text field content.
    pub async fn validate_multipart(&self, parts: &Parts, body: &Bytes) -> Result<(), ApiError> {
        let mut request = Request::new(Body::from(body.clone()));
        *request.headers_mut() = parts.headers.clone();
        *request.extensions_mut() = parts.extensions.clone();

        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| ApiError::field("body", format!("malformed multipart body: {e}")))?;

        let mut findings = Findings::new();
        let mut count = 0usize;
        while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
            count += 1;
            if count > self.config.max_form_fields {
                return Err(ApiError::field(
                    "form",
                    format!("more than {} fields", self.config.max_form_fields),
                ));
            }
            let name = field.name().unwrap_or("file").to_string();

            match field.file_name().map(str::to_string) {
                Some(file_name) => {
                    if !self.extension_allowed(&file_name) {
                        return Err(ApiError::field(name, "file type is not allowed"));
                    }
                    if let Err(violation) = self.scan(&file_name) {
                        findings.push((name.clone(), format!("file name {violation}")));
                    }
                    let mut size = 0usize;
                    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
                        size += chunk.len();
                        if size > self.config.max_upload_bytes {
                            return Err(ApiError::PayloadTooLarge(format!(
                                "upload '{name}' exceeds {} bytes",
                                self.config.max_upload_bytes
                            )));
                        }
                    }
                }
                None => {
                    let text = field.text().await.map_err(multipart_error)?;
                    self.check_field(&name, &name, &text, &mut findings);
                }
            }
        }
        self.settle(findings, "multipart")
    }

    fn extension_allowed(&self, file_name: &str) -> bool {
        std::path::Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_ascii_lowercase()))
            .is_some_and(|e| self.upload_extensions.contains(&e))
    }

    fn required_fields(&self, method: &Method, path: &str) -> &[String] {
        self.required
            .iter()
            .find(|r| r.method == method.as_str() && route_matches(&r.route, path))
            .map(|r| r.fields.as_slice())
            .unwrap_or(&[])
    }

    /// Reject in strict mode, otherwise log and accept.
    fn settle(&self, findings: Findings, source: &'static str) -> Result<(), ApiError> {
        let Some((field, message)) = findings.first() else {
            return Ok(());
        };
        if !self.config.strict_mode {
            for (field, message) in &findings {
                tracing::warn!(source, field = %field, reason = %message, "Suspicious input accepted (strict mode off)");
            }
            return Ok(());
        }
        let message = format!("{field} {message}");
        let details: BTreeMap<String, String> = findings.into_iter().collect();
        Err(ApiError::Validation { message, details })
    }
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(e.body_text())
    } else {
        ApiError::field("body", format!("malformed multipart body: {}", e.body_text()))
    }
}

/// Lower-case media type without parameters.
pub fn media_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
}

fn is_json(media_type: &str) -> bool {
    media_type == "application/json" || media_type.ends_with("+json")
}

fn depth(value: &Value) -> usize {
    match value {
        Value::Array(items) => 1 + items.iter().map(depth).max().unwrap_or(0),
        Value::Object(map) => 1 + map.values().map(depth).max().unwrap_or(0),
        _ => 0,
    }
}
