use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::entry::LogEntry;

/// Aggregate produced by processing one log file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogStats {
    pub total_entries: u64,
    pub error_count: u64,
    pub warning_count: u64,
    /// In encounter order, duplicates kept.
    pub ip_addresses: Vec<String>,
    /// Only keywords seen at least once are present.
    pub keyword_matches: BTreeMap<String, u64>,
}

impl LogStats {
    /// Folds one parsed line into the aggregate.
    pub fn record(&mut self, entry: &LogEntry, keywords: &[String]) {
        self.total_entries += 1;

        if entry.is_error() {
            self.error_count += 1;
        }
        if entry.is_warning() {
            self.warning_count += 1;
        }

        if let Some(ip) = entry.ip() {
            self.ip_addresses.push(ip.to_string());
        }

        for keyword in keywords {
            if entry.message.contains(keyword.as_str()) {
                *self.keyword_matches.entry(keyword.clone()).or_insert(0) += 1;
            }
        }
    }

    /// Count for `keyword`, zero when it never matched.
    pub fn keyword_count(&self, keyword: &str) -> u64 {
        self.keyword_matches.get(keyword).copied().unwrap_or(0)
    }
}
