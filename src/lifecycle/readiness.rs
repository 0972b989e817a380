//! Artifact readiness polling
//!
//! A reporter component signals completion by writing its result file. The
//! file counts as ready once two consecutive reads return the same
//! non-empty content, so a half-written file is never reported.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::debug;

#[derive(Error, Debug)]
pub enum ReadinessError {
    #[error("{path} not stable after {waited:?}")]
    Timeout { path: String, waited: Duration },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A pending readiness check on one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactProbe {
    pub path: PathBuf,
    pub interval: Duration,
    pub timeout: Duration,
}

impl ArtifactProbe {
    pub fn new(path: PathBuf, interval: Duration, timeout: Duration) -> Self {
        Self {
            path,
            interval,
            timeout,
        }
    }

    /// Poll until the content is stable, returning it
    pub async fn wait_stable(&self) -> Result<String, ReadinessError> {
        let started = Instant::now();
        let mut previous: Option<String> = None;

        loop {
            match tokio::fs::read_to_string(&self.path).await {
                Ok(content) if !content.trim().is_empty() => {
                    if previous.as_deref() == Some(content.as_str()) {
                        return Ok(content);
                    }
                    previous = Some(content);
                }
                Ok(_) => previous = None,
                Err(e) if e.kind() == ErrorKind::NotFound => previous = None,
                Err(e) => return Err(e.into()),
            }

            if started.elapsed() + self.interval > self.timeout {
                return Err(ReadinessError::Timeout {
                    path: self.path.display().to_string(),
                    waited: started.elapsed(),
                });
            }
            debug!("Waiting for {}", self.path.display());
            sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn probe(path: PathBuf, timeout_ms: u64) -> ArtifactProbe {
        ArtifactProbe::new(
            path,
            Duration::from_millis(20),
            Duration::from_millis(timeout_ms),
        )
    }

    #[tokio::test]
    async fn test_stable_file_is_ready() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("random-1.txt");
        std::fs::write(&path, "sum=42\n").unwrap();

        let content = assert_ok!(probe(path, 1000).wait_stable().await);
        assert_eq!(content, "sum=42\n");
    }

    #[tokio::test]
    async fn test_missing_file_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let result = probe(dir.path().join("none.txt"), 100).wait_stable().await;
        assert!(matches!(result, Err(ReadinessError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_empty_file_is_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("colab-1.txt");
        std::fs::write(&path, "  \n").unwrap();
        let err = assert_err!(probe(path, 100).wait_stable().await);
        assert!(matches!(err, ReadinessError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_file_written_late() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("datetime-1.txt");
        let writer_path = path.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(60)).await;
            tokio::fs::write(writer_path, "2026-01-01 12:00").await.unwrap();
        });

        let content = probe(path, 2000).wait_stable().await.unwrap();
        assert_eq!(content, "2026-01-01 12:00");
    }
}
