//! Redaction
//!
//! Replaces personal data and credentials with fixed placeholders before any
//! conversation content leaves the process. Placeholders never match another
//! pattern, so redacting already-redacted text is a no-op.

use regex::Regex;
use std::sync::OnceLock;

struct RedactionRule {
    name: &'static str,
    regex: Regex,
    replacement: &'static str,
}

/// Raw (name, pattern, replacement) triples, applied in this order.
///
/// Private-key blocks go first since their base64 bodies can resemble tokens.
const RULES: &[(&str, &str, &str)] = &[
    (
        "private_key",
        r"-----BEGIN [A-Z ]*PRIVATE KEY-----(?:[\s\S]*?-----END [A-Z ]*PRIVATE KEY-----)?",
        "[PRIVATE_KEY]",
    ),
    (
        "github_token",
        r"\b(?:(?:ghp|gho|ghu|ghs|ghr)_[A-Za-z0-9]{36,}|github_pat_[A-Za-z0-9_]{22,})",
        "[GITHUB_TOKEN]",
    ),
    ("slack_token", r"\bxox[baprs]-[A-Za-z0-9-]{10,}", "[SLACK_TOKEN]"),
    ("openai_anthropic_key", r"\bsk-[A-Za-z0-9_-]{20,}", "[API_KEY]"),
    ("aws_access_key", r"\bAKIA[0-9A-Z]{16}\b", "[API_KEY]"),
    ("google_api_key", r"\bAIza[0-9A-Za-z_-]{35}", "[API_KEY]"),
    (
        "password_assignment",
        r#"(?i)\b((?:password|passwd|pwd|secret|api_key|apikey|token)\s*[=:]\s*["']?)([^\s"'\[][^\s"']*)"#,
        "${1}[REDACTED]",
    ),
    ("email", r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b", "[EMAIL]"),
    (
        "phone",
        r"(?:\+\d{1,3}[\s.-]?)?(?:\(\d{3}\)|\b\d{3})[\s.-]\d{3}[\s.-]\d{4}\b",
        "[PHONE]",
    ),
];

fn rules() -> &'static Vec<RedactionRule> {
    static RULES_COMPILED: OnceLock<Vec<RedactionRule>> = OnceLock::new();
    RULES_COMPILED.get_or_init(|| {
        RULES
            .iter()
            .filter_map(|(name, pattern, replacement)| {
                Regex::new(pattern).ok().map(|regex| RedactionRule {
                    name,
                    regex,
                    replacement,
                })
            })
            .collect()
    })
}

/// Redact all sensitive data in `content`.
pub fn redact(content: &str) -> String {
    redact_with_report(content).0
}

/// Redact and report which rule names fired.
pub fn redact_with_report(content: &str) -> (String, Vec<&'static str>) {
    let mut redacted = content.to_string();
    let mut fired = Vec::new();

    for rule in rules() {
        if rule.regex.is_match(&redacted) {
            fired.push(rule.name);
            redacted = rule
                .regex
                .replace_all(&redacted, rule.replacement)
                .into_owned();
        }
    }

    (redacted, fired)
}
