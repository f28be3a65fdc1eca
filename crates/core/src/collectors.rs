use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::api::{deserialize_id, ApiError};
use crate::labels;

pub const COLLECTOR_COLUMNS: [&str; 5] = ["名称", "地址", "状态", "最近同步", "已同步数据"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorStatus {
    NoSync,
    Running,
    Stopped,
    Abandoned,
}

impl CollectorStatus {
    #[must_use]
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw {
            "no-sync" => Some(Self::NoSync),
            "running" => Some(Self::Running),
            "stopped" => Some(Self::Stopped),
            "abandoned" => Some(Self::Abandoned),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_wire(self) -> &'static str {
        match self {
            Self::NoSync => "no-sync",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Abandoned => "abandoned",
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::NoSync => "未同步",
            Self::Running => "运行中",
            Self::Stopped => "已停止",
            Self::Abandoned => "已废弃",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Collector {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub name: String,
    pub url: String,
    pub status: String,
    #[serde(default, rename = "recent-sync")]
    pub recent_sync: Option<Value>,
    #[serde(default, rename = "synced-data")]
    pub synced_data: Option<Value>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl Collector {
    #[must_use]
    pub fn status(&self) -> Option<CollectorStatus> {
        CollectorStatus::from_wire(&self.status)
    }

    /// Only collectors that never synced may change name or url.
    #[must_use]
    pub fn is_editable(&self) -> bool {
        self.status() == Some(CollectorStatus::NoSync)
    }

    #[must_use]
    pub fn status_label(&self) -> &str {
        match self.status() {
            Some(status) => status.label(),
            None => &self.status,
        }
    }

    /// Display cells in [`COLLECTOR_COLUMNS`] order.
    #[must_use]
    pub fn cells(&self) -> [String; 5] {
        let (recent, synced) = if self.is_editable() {
            (
                labels::NOT_SYNCED_CELL.to_string(),
                labels::NOT_SYNCED_CELL.to_string(),
            )
        } else {
            (
                sync_cell(self.recent_sync.as_ref()),
                sync_cell(self.synced_data.as_ref()),
            )
        };
        [
            self.name.clone(),
            self.url.clone(),
            self.status_label().to_string(),
            recent,
            synced,
        ]
    }
}

fn sync_cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

/// Body of collector create and update calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectorForm {
    pub name: String,
    pub url: String,
}

impl CollectorForm {
    pub fn prepare(name: &str, url: &str) -> Result<Self, CollectorError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CollectorError::NameRequired);
        }
        let url = url.trim();
        if url.is_empty() {
            return Err(CollectorError::UrlRequired);
        }
        Ok(Self {
            name: name.to_string(),
            url: url.to_string(),
        })
    }
}

#[async_trait]
pub trait CollectorApi: Send + Sync {
    async fn list_collectors(&self) -> Result<Vec<Collector>, ApiError>;
    async fn create_collector(&self, form: &CollectorForm) -> Result<(), ApiError>;
    async fn update_collector(&self, id: &str, form: &CollectorForm) -> Result<(), ApiError>;
    async fn delete_collector(&self, id: &str) -> Result<(), ApiError>;
}

#[async_trait]
impl<T: CollectorApi + ?Sized> CollectorApi for Arc<T> {
    async fn list_collectors(&self) -> Result<Vec<Collector>, ApiError> {
        (**self).list_collectors().await
    }

    async fn create_collector(&self, form: &CollectorForm) -> Result<(), ApiError> {
        (**self).create_collector(form).await
    }

    async fn update_collector(&self, id: &str, form: &CollectorForm) -> Result<(), ApiError> {
        (**self).update_collector(id, form).await
    }

    async fn delete_collector(&self, id: &str) -> Result<(), ApiError> {
        (**self).delete_collector(id).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollectorError {
    #[error("collector name is empty")]
    NameRequired,
    #[error("collector url is empty")]
    UrlRequired,
    #[error("collector `{name}` has synced and can no longer be edited")]
    NotEditable { name: String },
    #[error("failed to list collectors: {0}")]
    List(#[source] ApiError),
    #[error("failed to create collector: {0}")]
    Create(#[source] ApiError),
    #[error("failed to update collector: {0}")]
    Update(#[source] ApiError),
    #[error("failed to delete collector: {0}")]
    Delete(#[source] ApiError),
}

impl CollectorError {
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::NameRequired => labels::COLLECTOR_NAME_REQUIRED.to_string(),
            Self::UrlRequired => labels::COLLECTOR_URL_REQUIRED.to_string(),
            Self::NotEditable { .. } => labels::COLLECTOR_NOT_EDITABLE.to_string(),
            Self::Create(ApiError::Conflict { .. }) | Self::Update(ApiError::Conflict { .. }) => {
                labels::COLLECTOR_DUPLICATE.to_string()
            }
            Self::Update(ApiError::NotFound) | Self::Delete(ApiError::NotFound) => {
                labels::COLLECTOR_MISSING.to_string()
            }
            Self::List(error) | Self::Create(error) | Self::Update(error) | Self::Delete(error) => {
                error.user_message()
            }
        }
    }
}

#[derive(Debug)]
pub struct CollectorBoard<B: CollectorApi> {
    backend: B,
}

impl<B: CollectorApi> CollectorBoard<B> {
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Collectors ordered by wire status name, descending.
    pub async fn list(&self) -> Result<Vec<Collector>, CollectorError> {
        let mut collectors = self
            .backend
            .list_collectors()
            .await
            .map_err(CollectorError::List)?;
        sort_by_status(&mut collectors);
        Ok(collectors)
    }

    pub async fn create(&self, name: &str, url: &str) -> Result<&'static str, CollectorError> {
        let form = CollectorForm::prepare(name, url)?;
        self.backend
            .create_collector(&form)
            .await
            .map_err(CollectorError::Create)?;
        tracing::info!(name = %form.name, "collector created");
        Ok(labels::COLLECTOR_ADDED)
    }

    pub async fn update(
        &self,
        collector: &Collector,
        name: &str,
        url: &str,
    ) -> Result<(), CollectorError> {
        if !collector.is_editable() {
            return Err(CollectorError::NotEditable {
                name: collector.name.clone(),
            });
        }
        let form = CollectorForm::prepare(name, url)?;
        self.backend
            .update_collector(&collector.id, &form)
            .await
            .map_err(CollectorError::Update)?;
        tracing::info!(id = %collector.id, "collector updated");
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<(), CollectorError> {
        self.backend
            .delete_collector(id)
            .await
            .map_err(CollectorError::Delete)?;
        tracing::info!(id, "collector deleted");
        Ok(())
    }
}

pub fn sort_by_status(collectors: &mut [Collector]) {
    collectors.sort_by(|left, right| right.status.cmp(&left.status));
}
