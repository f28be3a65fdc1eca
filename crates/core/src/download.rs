use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::api::ApiError;

const FALLBACK_FILE_NAME: &str = "result.csv";

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("result download failed: {0}")]
    Api(#[from] ApiError),
    #[error("failed to create download file at {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write download file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DownloadError {
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Api(error) => error.user_message(),
            Self::Create { .. } | Self::Write { .. } => self.to_string(),
        }
    }
}

/// Fetches a finished job's result file, addressed relative to the deployment path.
#[async_trait]
pub trait ResultDownloadApi: Send + Sync {
    /// Returns the number of bytes written to `destination`.
    async fn download_result(&self, url: &str, destination: &Path) -> Result<u64, DownloadError>;
}

/// Local file name for a result url: its last path segment, minus any query string.
#[must_use]
pub fn download_file_name(url: &str) -> String {
    url.split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').find(|segment| !segment.is_empty()))
        .map_or_else(|| FALLBACK_FILE_NAME.to_string(), str::to_string)
}
