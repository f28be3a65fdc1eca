use std::ffi::OsString;
use std::fmt::Display;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::header::COOKIE;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use whaleminer_core::api::{cache_buster, ApiError};
use whaleminer_core::collectors::{Collector, CollectorApi, CollectorForm};
use whaleminer_core::config::ConsoleConfig;
use whaleminer_core::download::{DownloadError, ResultDownloadApi};
use whaleminer_core::history::{HistoryApi, HistoryEntry};
use whaleminer_core::job::{JobApi, JobId, JobRequest, JobSnapshot, SubmitOutcome};
use whaleminer_core::metadata::{MetadataApi, MetadataTree};
use whaleminer_core::saved_queries::{NewSavedQuery, SavedQuery, SavedQueryApi};

#[derive(Debug, Error)]
pub enum HttpClientError {
    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),
}

/// REST client for the console service. Requests are form-encoded, responses JSON.
#[derive(Debug, Clone)]
pub struct HttpConsoleClient {
    client: reqwest::Client,
    base_url: String,
    base_path: String,
    user_id: Option<String>,
}

impl HttpConsoleClient {
    pub fn from_config(config: &ConsoleConfig) -> Result<Self, HttpClientError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(HttpClientError::Build)?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            base_path: config.base_path.trim_matches('/').to_string(),
            user_id: config.effective_user_id(),
        })
    }

    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        if self.base_path.is_empty() {
            format!("{}/{path}", self.base_url)
        } else {
            format!("{}/{}/{path}", self.base_url, self.base_path)
        }
    }

    fn with_identity(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.user_id {
            Some(user_id) => request.header(COOKIE, format!("user_id={user_id}")),
            None => request,
        }
    }

    fn get(&self, path: &str) -> RequestBuilder {
        let request = self
            .client
            .get(self.endpoint(path))
            .query(&[("timestamp", cache_buster().to_string())]);
        self.with_identity(request)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.with_identity(self.client.post(self.endpoint(path)))
    }

    fn put(&self, path: &str) -> RequestBuilder {
        self.with_identity(self.client.put(self.endpoint(path)))
    }

    fn delete(&self, path: &str) -> RequestBuilder {
        let request = self
            .client
            .delete(self.endpoint(path))
            .query(&[("timestamp", cache_buster().to_string())]);
        self.with_identity(request)
    }

    async fn fetch_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = send(self.get(path)).await?;
        let response = ensure_success(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|error| ApiError::decode(error.to_string()))
    }

    async fn execute(&self, request: RequestBuilder) -> Result<(), ApiError> {
        let response = send(request).await?;
        ensure_success(response).await.map(drop)
    }
}

async fn send(request: RequestBuilder) -> Result<Response, ApiError> {
    request.send().await.map_err(|error| {
        tracing::warn!(%error, "request did not reach the console service");
        ApiError::transport(error.to_string())
    })
}

async fn ensure_success(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    tracing::debug!(url = %response.url(), status = status.as_u16(), "console service responded");
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, &body))
}

/// Maps a non-success status to the error taxonomy.
#[must_use]
pub fn classify_status(status: StatusCode, body: &str) -> ApiError {
    match status {
        StatusCode::UNAUTHORIZED => ApiError::Unauthorized,
        StatusCode::FORBIDDEN => ApiError::Forbidden,
        StatusCode::NOT_FOUND => ApiError::NotFound,
        StatusCode::CONFLICT => ApiError::Conflict {
            message: error_message(body),
        },
        other => ApiError::Server {
            status: other.as_u16(),
        },
    }
}

/// Maps the answer to `POST /{base}/queries/`.
#[must_use]
pub fn submit_outcome(status: StatusCode, body: &str) -> SubmitOutcome {
    match status {
        StatusCode::CREATED | StatusCode::OK => match created_id(body) {
            Some(id) => SubmitOutcome::Created { id },
            None => SubmitOutcome::ServerError {
                message: format!("submission response carried no job id: {body}"),
            },
        },
        StatusCode::CONFLICT => SubmitOutcome::Conflict {
            error: error_message(body),
        },
        StatusCode::UNAUTHORIZED => SubmitOutcome::Unauthorized,
        other => SubmitOutcome::ServerError {
            message: format!("unexpected status {}", other.as_u16()),
        },
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// The `error` field of a JSON body, or the trimmed body itself.
#[must_use]
pub fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .map(|parsed| parsed.error)
        .unwrap_or_else(|_| body.trim().to_string())
}

fn created_id(body: &str) -> Option<JobId> {
    let parsed = serde_json::from_str::<Value>(body).ok()?;
    match parsed.get("id")? {
        Value::String(id) if !id.is_empty() => Some(JobId::new(id.clone())),
        Value::Number(id) => Some(JobId::new(id.to_string())),
        _ => None,
    }
}

#[async_trait]
impl JobApi for HttpConsoleClient {
    async fn submit_job(&self, request: &JobRequest) -> SubmitOutcome {
        let response = match send(self.post("queries/").form(request)).await {
            Ok(response) => response,
            Err(error) => {
                return SubmitOutcome::ServerError {
                    message: error.to_string(),
                }
            }
        };
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let outcome = submit_outcome(status, &body);
        tracing::debug!(status = status.as_u16(), ?outcome, "query submission answered");
        outcome
    }

    async fn fetch_job(&self, job_id: &JobId) -> Result<JobSnapshot, ApiError> {
        self.fetch_json(&format!("queries/{job_id}/")).await
    }
}

#[async_trait]
impl MetadataApi for HttpConsoleClient {
    async fn fetch_tree(&self) -> Result<MetadataTree, ApiError> {
        self.fetch_json("meta").await
    }
}

#[async_trait]
impl SavedQueryApi for HttpConsoleClient {
    async fn create_saved(&self, query: &NewSavedQuery) -> Result<(), ApiError> {
        self.execute(self.post("saved/").form(query)).await
    }

    async fn list_saved(&self) -> Result<Vec<SavedQuery>, ApiError> {
        self.fetch_json("saved/").await
    }

    async fn delete_saved(&self, id: &str) -> Result<(), ApiError> {
        self.execute(self.delete(&format!("saved/{id}/"))).await
    }
}

#[async_trait]
impl HistoryApi for HttpConsoleClient {
    async fn list_jobs(&self) -> Result<Vec<HistoryEntry>, ApiError> {
        self.fetch_json("queries/").await
    }
}

#[async_trait]
impl CollectorApi for HttpConsoleClient {
    async fn list_collectors(&self) -> Result<Vec<Collector>, ApiError> {
        self.fetch_json("collectors/").await
    }

    async fn create_collector(&self, form: &CollectorForm) -> Result<(), ApiError> {
        self.execute(self.post("collectors/").form(form)).await
    }

    async fn update_collector(&self, id: &str, form: &CollectorForm) -> Result<(), ApiError> {
        self.execute(self.put(&format!("collectors/{id}")).form(form))
            .await
    }

    async fn delete_collector(&self, id: &str) -> Result<(), ApiError> {
        self.execute(self.delete(&format!("collectors/{id}"))).await
    }
}

#[async_trait]
impl ResultDownloadApi for HttpConsoleClient {
    /// Streams a result file from `{base_url}/{base_path}/{url}` into `destination`.
    async fn download_result(&self, url: &str, destination: &Path) -> Result<u64, DownloadError> {
        let response = send(self.with_identity(self.client.get(self.endpoint(url)))).await?;
        let response = ensure_success(response).await?;
        let written = write_stream(response.bytes_stream(), destination).await?;
        tracing::info!(url, bytes = written, path = %destination.display(), "downloaded result");
        Ok(written)
    }
}

fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}

/// Writes `body` beside `destination` and moves it into place once complete.
/// A failed transfer leaves neither file behind.
async fn write_stream<S, B, E>(body: S, destination: &Path) -> Result<u64, DownloadError>
where
    S: Stream<Item = Result<B, E>> + Send,
    B: AsRef<[u8]>,
    E: Display,
{
    let partial = partial_path(destination);
    let result = copy_into(body, &partial).await;
    let finished = match result {
        Ok(written) => fs::rename(&partial, destination)
            .await
            .map(|()| written)
            .map_err(|source| DownloadError::Write {
                path: destination.to_path_buf(),
                source,
            }),
        Err(error) => Err(error),
    };
    if finished.is_err() {
        if let Err(error) = fs::remove_file(&partial).await {
            tracing::debug!(%error, path = %partial.display(), "no partial download to remove");
        }
    }
    finished
}

async fn copy_into<S, B, E>(body: S, path: &Path) -> Result<u64, DownloadError>
where
    S: Stream<Item = Result<B, E>> + Send,
    B: AsRef<[u8]>,
    E: Display,
{
    let write_error = |source| DownloadError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::create(path)
        .await
        .map_err(|source| DownloadError::Create {
            path: path.to_path_buf(),
            source,
        })?;
    let mut written = 0_u64;
    let mut body = std::pin::pin!(body);
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|error| ApiError::transport(error.to_string()))?;
        let bytes = chunk.as_ref();
        file.write_all(bytes).await.map_err(write_error)?;
        written += bytes.len() as u64;
    }
    file.flush().await.map_err(write_error)?;
    Ok(written)
}
