//! Builder patterns for creating test data programmatically.

#![allow(dead_code)]

use std::path::PathBuf;

use logsift::Config;

/// Builder for creating `Config` instances tuned for fast tests.
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Short backoff and poll intervals so retries finish quickly.
    pub fn new() -> Self {
        Self {
            config: Config {
                worker_concurrency: 2,
                base_backoff_ms: 10,
                poll_interval_ms: 20,
                ..Config::default()
            },
        }
    }

    pub fn worker_concurrency(mut self, count: usize) -> Self {
        self.config.worker_concurrency = count;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn base_backoff_ms(mut self, ms: u64) -> Self {
        self.config.base_backoff_ms = ms;
        self
    }

    pub fn keywords(mut self, keywords: &[&str]) -> Self {
        self.config.monitor_keywords = keywords.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn chunk_size(mut self, bytes: usize) -> Self {
        self.config.chunk_size_bytes = bytes;
        self
    }

    pub fn visibility_timeout_ms(mut self, ms: u64) -> Self {
        self.config.visibility_timeout_ms = ms;
        self
    }

    pub fn delete_files(mut self, enabled: bool) -> Self {
        self.config.delete_files_after_processing = enabled;
        self
    }

    pub fn database_path(mut self, path: PathBuf) -> Self {
        self.config.database_path = Some(path);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for log file contents in the `[timestamp] LEVEL message {json}`
/// format.
pub struct LogFileBuilder {
    lines: Vec<String>,
    line_ending: &'static str,
}

impl LogFileBuilder {
    pub fn new() -> Self {
        Self {
            lines: Vec::new(),
            line_ending: "\n",
        }
    }

    /// Use `\r\n` line endings.
    pub fn crlf(mut self) -> Self {
        self.line_ending = "\r\n";
        self
    }

    /// A timestamped line.
    pub fn entry(mut self, timestamp: &str, level: &str, message: &str) -> Self {
        self.lines.push(format!("[{}] {} {}", timestamp, level, message));
        self
    }

    /// A timestamped line with a JSON payload carrying `ip`.
    pub fn entry_with_ip(mut self, timestamp: &str, level: &str, message: &str, ip: &str) -> Self {
        self.lines.push(format!(
            "[{}] {} {} {{\"ip\": \"{}\", \"service\": \"api\"}}",
            timestamp, level, message, ip
        ));
        self
    }

    /// A line added verbatim.
    pub fn raw(mut self, line: &str) -> Self {
        self.lines.push(line.to_string());
        self
    }

    pub fn blank(mut self) -> Self {
        self.lines.push(String::new());
        self
    }

    /// Joins the lines; the last one gets no terminator.
    pub fn build(self) -> String {
        self.lines.join(self.line_ending)
    }
}

impl Default for LogFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}
