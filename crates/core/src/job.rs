use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::api::ApiError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Submitted,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    /// Maps a wire status. Anything the console does not know is still in progress.
    #[must_use]
    pub fn from_wire(raw: &str) -> Self {
        match raw.trim() {
            "submitted" => Self::Submitted,
            "succeeded" => Self::Succeeded,
            "failed" => Self::Failed,
            "running" => Self::Running,
            other => {
                tracing::debug!(status = other, "unknown job status treated as running");
                Self::Running
            }
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("job {job_id} already finished as {status:?}")]
    AlreadyTerminal { job_id: JobId, status: JobStatus },
    #[error("job {job_id} cannot move from {from:?} back to {to:?}")]
    Regression {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
}

/// Body of `POST /{base}/queries/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRequest {
    pub app: String,
    pub version: String,
    pub db: String,
    pub query: String,
}

/// Outcome of a submission, one variant per status the service answers with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Created { id: JobId },
    Conflict { error: String },
    Unauthorized,
    ServerError { message: String },
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ResultPayload {
    #[serde(default)]
    pub titles: Vec<String>,
    #[serde(default)]
    pub values: Vec<Vec<Value>>,
}

/// Body of `GET /{base}/queries/{id}/`.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct JobSnapshot {
    pub status: String,
    #[serde(default)]
    pub progress: Option<Value>,
    #[serde(default)]
    pub log: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub result: Option<ResultPayload>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub count: Option<u64>,
}

impl JobSnapshot {
    #[must_use]
    pub fn status(&self) -> JobStatus {
        JobStatus::from_wire(&self.status)
    }

    /// Server-reported progress, accepted as a number or a numeric string.
    #[must_use]
    pub fn server_progress(&self) -> Option<f64> {
        match self.progress.as_ref()? {
            Value::Number(number) => number.as_f64(),
            Value::String(raw) => raw.trim().trim_end_matches('%').parse().ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn log_text(&self) -> &str {
        self.log.as_deref().unwrap_or_default()
    }
}

#[async_trait]
pub trait JobApi: Send + Sync {
    async fn submit_job(&self, request: &JobRequest) -> SubmitOutcome;
    async fn fetch_job(&self, job_id: &JobId) -> Result<JobSnapshot, ApiError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryJob {
    pub id: JobId,
    pub app: String,
    pub version: String,
    pub db: String,
    pub query_text: String,
    status: JobStatus,
    pub server_progress: Option<f64>,
    pub error: Option<String>,
    pub result_url: Option<String>,
    pub result_titles: Vec<String>,
    pub result_rows: Vec<Vec<Value>>,
    pub row_count: Option<u64>,
}

impl QueryJob {
    #[must_use]
    pub fn submitted(id: JobId, request: &JobRequest) -> Self {
        Self {
            id,
            app: request.app.clone(),
            version: request.version.clone(),
            db: request.db.clone(),
            query_text: request.query.clone(),
            status: JobStatus::Submitted,
            server_progress: None,
            error: None,
            result_url: None,
            result_titles: Vec::new(),
            result_rows: Vec::new(),
            row_count: None,
        }
    }

    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn transition(&mut self, next: JobStatus) -> Result<(), JobError> {
        if self.status.is_terminal() {
            return Err(JobError::AlreadyTerminal {
                job_id: self.id.clone(),
                status: self.status,
            });
        }
        if next == JobStatus::Submitted && self.status != JobStatus::Submitted {
            return Err(JobError::Regression {
                job_id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Folds a poll snapshot into the job and returns the status it moved to.
    pub fn apply_snapshot(&mut self, snapshot: &JobSnapshot) -> Result<JobStatus, JobError> {
        let next = snapshot.status();
        self.transition(next)?;
        self.server_progress = snapshot.server_progress().or(self.server_progress);
        match next {
            JobStatus::Failed => {
                self.error.clone_from(&snapshot.error);
            }
            JobStatus::Succeeded => {
                let result = snapshot.result.clone().unwrap_or_default();
                self.result_titles = result.titles;
                self.result_rows = result.values;
                self.result_url.clone_from(&snapshot.url);
                self.row_count = snapshot.count;
            }
            JobStatus::Submitted | JobStatus::Running => {}
        }
        Ok(next)
    }
}
