use async_trait::async_trait;
use chrono::{Local, TimeZone};
use serde::Deserialize;

use crate::api::{deserialize_optional_id, ApiError};
use crate::job::JobStatus;
use crate::labels;

pub const HISTORY_COLUMNS: [&str; 4] = ["查询内容", "查询状态", "查询提交时间", "耗时"];

/// One row of `GET /{base}/queries/`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HistoryEntry {
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    pub id: Option<String>,
    pub query: String,
    pub status: String,
    /// Epoch milliseconds.
    pub submit_time: i64,
    /// Milliseconds.
    #[serde(default)]
    pub duration: u64,
    #[serde(default)]
    pub url: Option<String>,
}

impl HistoryEntry {
    #[must_use]
    pub fn status(&self) -> JobStatus {
        JobStatus::from_wire(&self.status)
    }

    #[must_use]
    pub fn status_label(&self) -> &'static str {
        match self.status() {
            JobStatus::Succeeded => labels::STATUS_SUCCEEDED,
            JobStatus::Failed => labels::STATUS_FAILED,
            JobStatus::Submitted | JobStatus::Running => labels::STATUS_RUNNING,
        }
    }

    #[must_use]
    pub fn duration_label(&self) -> String {
        format_duration_secs(self.duration)
    }

    #[must_use]
    pub fn submitted_label(&self) -> String {
        format_submit_time(self.submit_time, &Local)
    }

    /// Download path, when the job produced one.
    #[must_use]
    pub fn download_url(&self) -> Option<&str> {
        self.url
            .as_deref()
            .filter(|url| !url.is_empty() && *url != "null")
    }

    /// Display cells in [`HISTORY_COLUMNS`] order.
    #[must_use]
    pub fn cells(&self) -> [String; 4] {
        [
            self.query.clone(),
            self.status_label().to_string(),
            self.submitted_label(),
            self.duration_label(),
        ]
    }
}

#[async_trait]
pub trait HistoryApi: Send + Sync {
    async fn list_jobs(&self) -> Result<Vec<HistoryEntry>, ApiError>;
}

#[must_use]
pub fn format_submit_time<Tz: TimeZone>(epoch_millis: i64, zone: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    zone.timestamp_millis_opt(epoch_millis)
        .single()
        .map(|moment| moment.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

/// Whole seconds, rounded half up, with the " 秒" suffix.
#[must_use]
pub fn format_duration_secs(millis: u64) -> String {
    format!("{}{}", millis.saturating_add(500) / 1000, labels::SECONDS_SUFFIX)
}
