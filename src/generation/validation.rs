//! Output safety validation
//!
//! Every assistant-facing text is checked against a denylist of
//! prescriptive phrasings before it leaves the crate.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const MAX_OUTPUT_CHARS: usize = 10_000;

/// Neutral text substituted when a message fails validation.
pub const SAFE_FALLBACK_MESSAGE: &str = "Based on the analysis, consider reflecting on your financial patterns. What would you like to explore further?";

const PROHIBITED_PATTERNS: &[(&str, &str)] = &[
    (r"(?i)\byou\s+should\b", "you should"),
    (r"(?i)\byou\s+must\b", "you must"),
    (r"(?i)\byou\s+need\s+to\b", "you need to"),
    (r"(?i)\byou\s+ought\s+to\b", "you ought to"),
    (r"(?i)\bbuy\b", "buy"),
    (r"(?i)\bsell\b", "sell"),
    (r"(?i)\binvest\s+in\b", "invest in"),
    (r"(?i)\bpurchase\b", "purchase"),
    (r"(?i)\brecommend\s+(?:that\s+)?you\b", "recommend you"),
    (r"(?i)\bi\s+recommend\b", "I recommend"),
];

lazy_static! {
    static ref DENYLIST: Vec<(Regex, &'static str)> = PROHIBITED_PATTERNS
        .iter()
        .map(|(pattern, label)| (Regex::new(pattern).expect("valid denylist regex"), *label))
        .collect();
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationReport {
    pub valid: bool,
    pub issues: Vec<String>,
}

impl ValidationReport {
    pub fn ok() -> Self {
        Self {
            valid: true,
            issues: Vec::new(),
        }
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::ok()
    }
}

pub fn validate_output(content: &str) -> ValidationReport {
    let mut issues = Vec::new();

    if content.trim().is_empty() {
        issues.push("Output is empty".to_string());
    }
    if content.chars().count() > MAX_OUTPUT_CHARS {
        issues.push(format!("Output exceeds {} characters", MAX_OUTPUT_CHARS));
    }
    for (regex, label) in DENYLIST.iter() {
        if regex.is_match(content) {
            issues.push(format!("Prohibited language detected: {}", label));
        }
    }

    ValidationReport {
        valid: issues.is_empty(),
        issues,
    }
}

/// The text itself when it validates, the neutral fallback otherwise.
pub fn safe_text(content: &str) -> String {
    if validate_output(content).valid {
        content.to_string()
    } else {
        SAFE_FALLBACK_MESSAGE.to_string()
    }
}
