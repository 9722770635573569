use std::io::ErrorKind;

use crate::processor::LogSource;
use crate::queue::Job;

/// Runs after a job reaches a terminal state. Failures are logged by the
/// caller and never change the job's outcome.
pub trait CleanupHook: Send + Sync {
    fn cleanup(&self, job: &Job) -> std::io::Result<()>;
}

/// Deletes the job's source file once it is no longer needed.
///
/// Remote sources are left alone. A file that is already gone counts as
/// cleaned up.
pub struct DeleteSourceFile;

impl CleanupHook for DeleteSourceFile {
    fn cleanup(&self, job: &Job) -> std::io::Result<()> {
        let source = LogSource::parse(&job.file_ref)
            .map_err(|e| std::io::Error::new(ErrorKind::InvalidInput, e.to_string()))?;

        let Some(path) = source.local_path() else {
            log::debug!("Skipping cleanup of remote source {}", source);
            return Ok(());
        };

        match std::fs::remove_file(path) {
            Ok(()) => {
                log::info!("Deleted processed file {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::JobState;
    use chrono::Utc;

    fn job_for(file_ref: &str) -> Job {
        Job {
            id: "job-1".to_string(),
            file_ref: file_ref.to_string(),
            user_id: "u".to_string(),
            file_name: "app.log".to_string(),
            size_bytes: 1,
            priority: 0,
            state: JobState::Completed,
            attempts: 1,
            max_attempts: 3,
            error: None,
            enqueued_at: Utc::now(),
            run_at: None,
            lease_expires_at: None,
            finished_at: None,
        }
    }

    #[test]
    fn test_deletes_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "INFO x\n").unwrap();

        DeleteSourceFile
            .cleanup(&job_for(&path.to_string_lossy()))
            .unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_missing_file_is_fine() {
        DeleteSourceFile
            .cleanup(&job_for("/nonexistent/logsift/app.log"))
            .unwrap();
    }

    #[test]
    fn test_remote_source_is_skipped() {
        DeleteSourceFile
            .cleanup(&job_for("https://example.com/app.log"))
            .unwrap();
    }
}
