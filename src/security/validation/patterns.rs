//! Compiled deny patterns for the four attack categories.

use regex::RegexSet;

/// Category of a deny-pattern match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternCategory {
    SqlInjection,
    CrossSiteScripting,
    PathTraversal,
    CommandInjection,
}

impl PatternCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            PatternCategory::SqlInjection => "sql_injection",
            PatternCategory::CrossSiteScripting => "xss",
            PatternCategory::PathTraversal => "path_traversal",
            PatternCategory::CommandInjection => "command_injection",
        }
    }
}

impl std::fmt::Display for PatternCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const SQL_INJECTION: &[&str] = &[
    r"(?i)\bunion\b[\s(]+(all\s+)?select\b",
    r#"(?i)['"]\s*(or|and)\s+['"]?\w+['"]?\s*(=|like)\s*['"]?\w+"#,
    r"(?i)\b(or|and)\s+\d+\s*=\s*\d+",
    r"(?i);\s*(drop|delete|insert|update|alter|create|truncate|exec|execute)\b",
    r"(?i)\b(drop|truncate|alter)\s+(table|database|schema)\b",
    r"(?i)\binsert\s+into\b[\s\S]*\bvalues\b",
    r"(?i)\bdelete\s+from\b",
    r"(?i)\bselect\b[\s\S]+\bfrom\b[\s\S]+\bwhere\b",
    r#"(?i)['"]\s*(--|#|/\*)"#,
    r"/\*[\s\S]*?\*/",
    r"(?i)\bexec(\s|\+)+(s|x)p_\w+",
    r"(?i)\b(sleep|benchmark|pg_sleep)\s*\(",
    r"(?i)\bwaitfor\s+delay\b",
    r"(?i)\binformation_schema\b",
];

const CROSS_SITE_SCRIPTING: &[&str] = &[
    r"(?i)<\s*/?\s*script\b",
    r"(?i)\b(javascript|vbscript|livescript)\s*:",
    r"(?i)\bon(load|unload|error|click|dblclick|mouseover|mouseout|mousedown|mouseup|focus|blur|submit|change|input|keydown|keyup|keypress|abort|toggle|animationstart)\s*=",
    r"(?i)<\s*(iframe|frame|object|embed|applet|svg|meta|base|link|style|form)\b",
    r"(?i)data\s*:\s*text/html",
    r"(?i)\bexpression\s*\(",
    r"(?i)\bdocument\s*\.\s*(cookie|write|location|domain)",
    r"(?i)\beval\s*\(",
    r"(?i)<\s*img\b[^>]*\bsrc\s*=",
];

const PATH_TRAVERSAL: &[&str] = &[
    r"\.\./",
    r"\.\.\\",
    r"(?i)%2e%2e",
    r"(?i)%252e%252e",
    r"(?i)\.\.%2f",
    r"(?i)\.\.%5c",
    r"(?i)%c0%ae",
    r"(?i)/etc/(passwd|shadow|hosts|group)\b",
    r"(?i)\b(c:|%systemroot%)\\windows\b",
    r"(?i)/proc/self/",
];

const COMMAND_INJECTION: &[&str] = &[
    r"(?i)[;&|]\s*(rm|cat|ls|id|wget|curl|nc|ncat|netcat|bash|sh|zsh|chmod|chown|python|perl|ruby|php|ping|whoami|uname|kill|nohup|telnet)(\s|$)",
    r"`[^`]*`",
    r"\$\([^)]*\)",
    r"\$\{[^}]*\}",
    r"(?i)/bin/(ba|z|da)?sh\b",
    r"(?i)\b(cmd|powershell)(\.exe)?\s+/?[ck]\b",
    r"(?i)>\s*/dev/(null|tcp|udp)",
];

/// Error compiling a deny or field pattern.
#[derive(Debug, thiserror::Error)]
#[error("invalid pattern for {name}: {source}")]
pub struct PatternError {
    pub name: String,
    #[source]
    pub source: regex::Error,
}

/// The four deny-pattern sets, compiled once.
#[derive(Debug, Clone)]
pub struct DenyPatterns {
    injection: RegexSet,
    xss: RegexSet,
    traversal: RegexSet,
    command: RegexSet,
}

impl DenyPatterns {
    pub fn new() -> Result<Self, PatternError> {
        Ok(Self {
            injection: compile("sql_injection", SQL_INJECTION)?,
            xss: compile("xss", CROSS_SITE_SCRIPTING)?,
            traversal: compile("path_traversal", PATH_TRAVERSAL)?,
            command: compile("command_injection", COMMAND_INJECTION)?,
        })
    }

    /// First category with a match, checked in a fixed order.
    pub fn find(&self, input: &str) -> Option<PatternCategory> {
        if self.injection.is_match(input) {
            Some(PatternCategory::SqlInjection)
        } else if self.xss.is_match(input) {
            Some(PatternCategory::CrossSiteScripting)
        } else if self.traversal.is_match(input) {
            Some(PatternCategory::PathTraversal)
        } else if self.command.is_match(input) {
            Some(PatternCategory::CommandInjection)
        } else {
            None
        }
    }
}

fn compile(name: &str, patterns: &[&str]) -> Result<RegexSet, PatternError> {
    RegexSet::new(patterns).map_err(|source| PatternError {
        name: name.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns() -> DenyPatterns {
        DenyPatterns::new().unwrap()
    }

    #[test]
    fn detects_each_category() {
        let p = patterns();
        assert_eq!(p.find("1' OR '1'='1"), Some(PatternCategory::SqlInjection));
        assert_eq!(p.find("x; DROP TABLE users"), Some(PatternCategory::SqlInjection));
        assert_eq!(p.find("1 UNION SELECT password"), Some(PatternCategory::SqlInjection));
        assert_eq!(
            p.find("<script>alert(1)</script>"),
            Some(PatternCategory::CrossSiteScripting)
        );
        assert_eq!(
            p.find("<img src=x onerror=alert(1)>"),
            Some(PatternCategory::CrossSiteScripting)
        );
        assert_eq!(p.find("javascript:alert(1)"), Some(PatternCategory::CrossSiteScripting));
        assert_eq!(p.find("../../etc/passwd"), Some(PatternCategory::PathTraversal));
        assert_eq!(p.find("%2e%2e%2fsecret"), Some(PatternCategory::PathTraversal));
        assert_eq!(p.find("a; rm -rf /"), Some(PatternCategory::CommandInjection));
        assert_eq!(p.find("$(whoami)"), Some(PatternCategory::CommandInjection));
        assert_eq!(p.find("`id`"), Some(PatternCategory::CommandInjection));
    }

    #[test]
    fn ordinary_input_passes() {
        let p = patterns();
        for benign in [
            "Quarterly report for O'Brien & Sons",
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko)",
            "https://erp.example.com/orders?page=2&id=5",
            "Select the best supplier",
            "a@b.co",
            "Str0ng!Pass2024",
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        ] {
            assert_eq!(p.find(benign), None, "{benign}");
        }
    }
}
