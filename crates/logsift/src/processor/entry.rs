use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// Pre-compiled regexes for the line format `[timestamp] LEVEL message {json}`
static RE_TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\[(.+?)\]").unwrap());
static RE_LEVEL_AFTER_TIMESTAMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\] ([A-Za-z0-9_]+) ").unwrap());
static RE_LEADING_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z0-9_]+)").unwrap());
static RE_TRAILING_JSON: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{.*\}$").unwrap());

pub const LEVEL_UNKNOWN: &str = "UNKNOWN";

/// Leading tokens accepted as a level on lines without a timestamp.
pub const KNOWN_LEVELS: [&str; 4] = ["INFO", "ERROR", "WARN", "DEBUG"];

/// One parsed log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: Option<String>,
    pub level: String,
    /// The raw line.
    pub message: String,
    pub payload: Option<Value>,
}

impl LogEntry {
    pub fn is_error(&self) -> bool {
        self.level == "ERROR"
    }

    pub fn is_warning(&self) -> bool {
        self.level == "WARN"
    }

    /// The payload's `ip` field, when it is a non-empty string.
    pub fn ip(&self) -> Option<&str> {
        self.payload
            .as_ref()
            .and_then(|p| p.get("ip"))
            .and_then(Value::as_str)
            .filter(|ip| !ip.is_empty())
    }
}

/// Parses a single log line. Never fails: fields that cannot be extracted
/// are left empty and a malformed JSON tail is dropped with a warning.
pub fn parse_log_entry(line: &str) -> LogEntry {
    let timestamp = RE_TIMESTAMP
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());

    let level = if timestamp.is_some() {
        RE_LEVEL_AFTER_TIMESTAMP
            .captures(line)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
    } else {
        RE_LEADING_TOKEN
            .captures(line)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .filter(|token| KNOWN_LEVELS.contains(token))
    };

    let payload = RE_TRAILING_JSON.find(line).and_then(|m| {
        match serde_json::from_str::<Value>(m.as_str()) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("Ignoring malformed JSON payload ({}): {}", e, m.as_str());
                None
            }
        }
    });

    LogEntry {
        timestamp,
        level: level.unwrap_or(LEVEL_UNKNOWN).to_string(),
        message: line.to_string(),
        payload,
    }
}
