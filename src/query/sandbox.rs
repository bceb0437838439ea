//! SQL sandbox
//!
//! Fail-closed validation applied to every LLM-generated statement before
//! it reaches the database. The checks are deliberately layered and
//! redundant (prefix allow-list, keyword ban, statement-separator ban,
//! structural UPDATE/INSERT patterns): any single check is insufficient
//! against obfuscated input, so a statement must clear all of them.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::SandboxViolation;

static DENY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // DDL/DML verb followed by whitespace, anywhere in the statement
        r"(?i)\b(drop|delete|insert|alter|create|truncate)\s",
        // the same verbs smuggled in after a statement separator
        r"(?i);\s*(drop|delete|insert|alter|create|truncate)",
        // UPDATE ... SET
        r"(?i)\bupdate\s+\w+\s+set\b",
        // INSERT INTO t (...)
        r"(?i)\binto\s+\w+\s*\(",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("deny pattern compiles"))
    .collect()
});

/// Validate a statement against the allow/deny rules. Returns the reason
/// on rejection; execution must not be attempted in that case.
pub fn validate(sql: &str) -> Result<(), SandboxViolation> {
    let normalized = sql.trim().to_lowercase();
    if !(normalized.starts_with("select") || normalized.starts_with("with")) {
        return Err(SandboxViolation::NotReadOnly);
    }
    if DENY_PATTERNS.iter().any(|p| p.is_match(sql)) {
        return Err(SandboxViolation::ProhibitedStatement);
    }
    Ok(())
}
