//! Pattern classification and message normalization.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

use regex::Regex;

/// Ordered case-insensitive substring patterns. The first pattern contained
/// in a line wins, regardless of where in the line it appears.
#[derive(Debug, Clone)]
pub struct PatternSet {
    patterns: Vec<String>,
}

impl PatternSet {
    pub fn new(patterns: &[String]) -> Self {
        Self {
            patterns: patterns.iter().map(|p| p.to_lowercase()).collect(),
        }
    }

    /// First matching pattern, compared case-insensitively. `None` means the
    /// line is not retained.
    pub fn classify(&self, line: &str) -> Option<&str> {
        let lower = line.to_lowercase();
        self.patterns
            .iter()
            .find(|pattern| lower.contains(pattern.as_str()))
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Stable 64-bit hash over the normalized message, used to coalesce repeats.
pub fn dedup_hash(message: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    normalize_message(message).hash(&mut hasher);
    hasher.finish()
}

/// Lowercase, strip a leading syslog/ISO timestamp, collapse digit runs.
///
/// "Jan 12 03:04:05 disk sda1 92% full" and
/// "Jan 12 03:09:41 disk sda1 93% full" normalize identically, so a
/// recurring condition becomes one event with a repeat count instead of a
/// window full of near-duplicates.
pub fn normalize_message(message: &str) -> String {
    let lower = message.trim().to_lowercase();
    let stripped = timestamp_prefix().replace(&lower, "");
    digit_runs().replace_all(&stripped, "#").into_owned()
}

fn timestamp_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // ISO 8601 ("2024-01-12T03:04:05.123Z") or classic syslog
        // ("Jan 12 03:04:05"), already lowercased by the caller.
        Regex::new(
            r"^(?:\d{4}-\d{2}-\d{2}[t ]\d{2}:\d{2}:\d{2}(?:[.,]\d+)?(?:z|[+-]\d{2}:?\d{2})?|[a-z]{3} +\d{1,2} \d{2}:\d{2}:\d{2})\s*",
        )
        .expect("timestamp prefix regex compiles")
    })
}

fn digit_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").expect("digit run regex compiles"))
}
