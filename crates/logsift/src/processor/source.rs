use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;

use crate::error::ProcessError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HEAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Where a job's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSource {
    /// A local file, given as a plain path or a `file://` URL.
    File(PathBuf),
    /// An `http://` or `https://` URL streamed with a blocking client.
    Http(Url),
}

impl LogSource {
    /// Interprets a job's `file_ref`.
    pub fn parse(file_ref: &str) -> Result<Self, ProcessError> {
        if !file_ref.contains("://") {
            if file_ref.trim().is_empty() {
                return Err(ProcessError::UnsupportedSource("empty file reference".into()));
            }
            return Ok(LogSource::File(PathBuf::from(file_ref)));
        }

        let url = Url::parse(file_ref)
            .map_err(|e| ProcessError::UnsupportedSource(format!("{}: {}", file_ref, e)))?;

        match url.scheme() {
            "file" => url
                .to_file_path()
                .map(LogSource::File)
                .map_err(|_| ProcessError::UnsupportedSource(file_ref.to_string())),
            "http" | "https" => Ok(LogSource::Http(url)),
            other => Err(ProcessError::UnsupportedSource(format!(
                "scheme '{}' in {}",
                other, file_ref
            ))),
        }
    }

    /// Local path of the source, if it lives on this machine.
    pub fn local_path(&self) -> Option<&Path> {
        match self {
            LogSource::File(path) => Some(path),
            LogSource::Http(_) => None,
        }
    }

    /// Size of the source in bytes, when it can be known up front.
    ///
    /// Local files are measured on disk. Remote files are asked with a
    /// `HEAD` request and yield `None` when the server sends no
    /// `Content-Length`.
    pub fn size_hint(&self) -> Result<Option<u64>, ProcessError> {
        match self {
            LogSource::File(path) => {
                let metadata = std::fs::metadata(path).map_err(|e| ProcessError::OpenSource {
                    file_ref: path.display().to_string(),
                    source: e,
                })?;
                Ok(Some(metadata.len()))
            }
            LogSource::Http(url) => {
                let remote = |reason: String| ProcessError::Remote {
                    url: url.to_string(),
                    reason,
                };

                let client = reqwest::blocking::Client::builder()
                    .connect_timeout(CONNECT_TIMEOUT)
                    .timeout(HEAD_TIMEOUT)
                    .build()
                    .map_err(|e| remote(e.to_string()))?;

                let response = client
                    .head(url.clone())
                    .send()
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| remote(e.to_string()))?;

                // `Response::content_length` reports the (empty) body of a
                // HEAD response, so read the header itself.
                Ok(response
                    .headers()
                    .get(reqwest::header::CONTENT_LENGTH)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.trim().parse::<u64>().ok()))
            }
        }
    }

    /// Opens the source as a byte stream.
    pub fn open(&self) -> Result<Box<dyn Read + Send>, ProcessError> {
        match self {
            LogSource::File(path) => {
                let file = File::open(path).map_err(|e| ProcessError::OpenSource {
                    file_ref: path.display().to_string(),
                    source: e,
                })?;
                Ok(Box::new(file))
            }
            LogSource::Http(url) => {
                let remote = |reason: String| ProcessError::Remote {
                    url: url.to_string(),
                    reason,
                };

                let client = reqwest::blocking::Client::builder()
                    .connect_timeout(CONNECT_TIMEOUT)
                    .timeout(None::<Duration>)
                    .build()
                    .map_err(|e| remote(e.to_string()))?;

                let response = client
                    .get(url.clone())
                    .send()
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| remote(e.to_string()))?;

                Ok(Box::new(response))
            }
        }
    }
}

impl std::fmt::Display for LogSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogSource::File(path) => write!(f, "{}", path.display()),
            LogSource::Http(url) => write!(f, "{}", url),
        }
    }
}
