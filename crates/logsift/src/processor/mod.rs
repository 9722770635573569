//! Streaming log parser and aggregator.
//!
//! The processor knows nothing about jobs or persistence: it turns a byte
//! stream into a [`LogStats`] while holding at most one chunk plus one
//! partial line in memory.

pub mod entry;
pub mod lines;
pub mod source;
pub mod stats;

use std::io::{ErrorKind, Read};

pub use entry::{parse_log_entry, LogEntry, KNOWN_LEVELS, LEVEL_UNKNOWN};
pub use lines::LineSplitter;
pub use source::LogSource;
pub use stats::LogStats;

use crate::error::ProcessError;

pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Events emitted while a source is being read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    /// A chunk was consumed. Counters are cumulative.
    Chunk { bytes_read: u64, entries: u64 },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for callers that do not track progress.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

#[derive(Debug, Clone)]
pub struct LogProcessor {
    keywords: Vec<String>,
    chunk_size: usize,
}

impl LogProcessor {
    /// Creates a processor counting `keywords`. Empty and repeated keywords
    /// are dropped.
    pub fn new(keywords: &[String], chunk_size: usize) -> Self {
        let mut unique: Vec<String> = Vec::with_capacity(keywords.len());
        for keyword in keywords {
            if !keyword.is_empty() && !unique.contains(keyword) {
                unique.push(keyword.clone());
            }
        }
        Self {
            keywords: unique,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Opens `file_ref` and aggregates every line in it.
    pub fn process(
        &self,
        file_ref: &str,
        progress: &dyn ProgressReporter,
    ) -> Result<LogStats, ProcessError> {
        let source = LogSource::parse(file_ref)?;
        let reader = source.open()?;
        self.process_reader(reader, file_ref, progress)
    }

    /// Aggregates every line read from `reader`. `label` names the source in
    /// errors.
    pub fn process_reader<R: Read>(
        &self,
        mut reader: R,
        label: &str,
        progress: &dyn ProgressReporter,
    ) -> Result<LogStats, ProcessError> {
        let mut stats = LogStats::default();
        let mut splitter = LineSplitter::new();
        let mut buf = vec![0u8; self.chunk_size];
        let mut bytes_read: u64 = 0;

        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(ProcessError::ReadSource {
                        file_ref: label.to_string(),
                        source: e,
                    })
                }
            };

            splitter.push(&buf[..n], |line| self.process_line(line, &mut stats));
            bytes_read += n as u64;
            progress.report(ProgressEvent::Chunk {
                bytes_read,
                entries: stats.total_entries,
            });
        }
        splitter.finish(|line| self.process_line(line, &mut stats));

        log::debug!(
            "Processed {} ({} bytes): {} entries, {} errors, {} warnings",
            label,
            bytes_read,
            stats.total_entries,
            stats.error_count,
            stats.warning_count
        );
        Ok(stats)
    }

    fn process_line(&self, line: &str, stats: &mut LogStats) {
        if line.trim().is_empty() {
            return;
        }
        let entry = parse_log_entry(line);
        stats.record(&entry, &self.keywords);
    }
}

impl Default for LogProcessor {
    fn default() -> Self {
        Self::new(&[], DEFAULT_CHUNK_SIZE)
    }
}
