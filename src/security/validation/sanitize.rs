//! HTML sanitization for the optional response path.
//!
//! Sanitization never replaces validation: the validator rejects, this only
//! neutralises output.

use regex::Regex;

use super::patterns::PatternError;

const STRIPPED_TAGS: &[&str] = &[
    "script", "iframe", "object", "embed", "style", "link", "meta", "base", "form", "svg",
];

/// Encodes, strips dangerous elements and strips dangerous attributes.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    /// Paired elements including their content.
    paired: Regex,
    /// Any remaining opening/closing/self-closing tag of the stripped set.
    single: Regex,
    handlers: Regex,
    pseudo_urls: Regex,
}

impl Sanitizer {
    pub fn new() -> Result<Self, PatternError> {
        let tags = STRIPPED_TAGS.join("|");
        Ok(Self {
            paired: build(
                "paired_tags",
                &format!(r"(?is)<\s*({tags})\b[^>]*>.*?<\s*/\s*({tags})\s*>"),
            )?,
            single: build("single_tags", &format!(r"(?is)<\s*/?\s*({tags})\b[^>]*/?>"))?,
            handlers: build(
                "event_handlers",
                r#"(?i)\s+on[a-z]+\s*=\s*("[^"]*"|'[^']*'|[^\s>]*)"#,
            )?,
            pseudo_urls: build(
                "pseudo_urls",
                r#"(?i)\s+(href|src|action|formaction|xlink:href)\s*=\s*("\s*(javascript|vbscript|data):[^"]*"|'\s*(javascript|vbscript|data):[^']*'|(javascript|vbscript|data):[^\s>]*)"#,
            )?,
        })
    }

    /// Escape `& < > " ' /`.
    pub fn encode_html(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        for c in input.chars() {
            match c {
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '"' => out.push_str("&quot;"),
                '\'' => out.push_str("&#x27;"),
                '/' => out.push_str("&#x2F;"),
                other => out.push(other),
            }
        }
        out
    }

    /// Remove script-capable elements, with their content when paired.
    pub fn strip_tags(&self, input: &str) -> String {
        let without_pairs = self.paired.replace_all(input, "");
        self.single.replace_all(&without_pairs, "").into_owned()
    }

    /// Remove `on*=` handlers and `javascript:`/`vbscript:`/`data:` URLs.
    pub fn strip_attributes(&self, input: &str) -> String {
        let without_handlers = self.handlers.replace_all(input, "");
        self.pseudo_urls
            .replace_all(&without_handlers, "")
            .into_owned()
    }

    /// Strip, then encode.
    pub fn sanitize(&self, input: &str) -> String {
        self.encode_html(&self.strip_attributes(&self.strip_tags(input)))
    }

    /// Sanitize every string inside a JSON value, keys included.
    pub fn sanitize_json(&self, value: &mut serde_json::Value) {
        match value {
            serde_json::Value::String(s) => *s = self.sanitize(s),
            serde_json::Value::Array(items) => {
                for item in items {
                    self.sanitize_json(item);
                }
            }
            serde_json::Value::Object(map) => {
                let entries = std::mem::take(map);
                for (key, mut item) in entries {
                    self.sanitize_json(&mut item);
                    map.insert(self.sanitize(&key), item);
                }
            }
            _ => {}
        }
    }
}

fn build(name: &str, pattern: &str) -> Result<Regex, PatternError> {
    Regex::new(pattern).map_err(|source| PatternError {
        name: name.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_significant_characters() {
        let s = Sanitizer::new().unwrap();
        assert_eq!(
            s.encode_html(r#"<a href="x">'&'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&#x27;&amp;&#x27;&lt;&#x2F;a&gt;"
        );
    }

    #[test]
    fn strips_script_elements_with_content() {
        let s = Sanitizer::new().unwrap();
        assert_eq!(s.strip_tags("hi<script>alert(1)</script> there"), "hi there");
        assert_eq!(s.strip_tags("a<iframe src=x/>b"), "ab");
        assert_eq!(s.strip_tags("<b>bold</b>"), "<b>bold</b>");
    }

    #[test]
    fn strips_handlers_and_pseudo_urls() {
        let s = Sanitizer::new().unwrap();
        assert_eq!(
            s.strip_attributes(r#"<img src="a.png" onerror="alert(1)">"#),
            r#"<img src="a.png">"#
        );
        assert_eq!(
            s.strip_attributes(r#"<a href="javascript:alert(1)">x</a>"#),
            "<a>x</a>"
        );
    }

    #[test]
    fn sanitizes_nested_json() {
        let s = Sanitizer::new().unwrap();
        let mut value = serde_json::json!({"name": "<script>x</script>Bob", "tags": ["<b>"], "n": 1});
        s.sanitize_json(&mut value);
        assert_eq!(value["name"], "Bob");
        assert_eq!(value["tags"][0], "&lt;b&gt;");
        assert_eq!(value["n"], 1);
    }
}
