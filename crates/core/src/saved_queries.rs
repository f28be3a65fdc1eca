use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::{deserialize_id, ApiError};
use crate::labels;
use crate::validation::{validate_query_target, ValidationError};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SavedQuery {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub app: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub db: String,
    pub query: String,
}

/// Body of `POST /{base}/saved/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewSavedQuery {
    pub name: String,
    pub app: String,
    pub version: String,
    pub db: String,
    pub query: String,
}

impl NewSavedQuery {
    /// Checks the query target first, then the name.
    pub fn prepare(
        name: &str,
        app: Option<&str>,
        version: Option<&str>,
        sql: &str,
    ) -> Result<Self, ValidationError> {
        let target = validate_query_target(app, version, sql)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyName);
        }

        Ok(Self {
            name: name.to_string(),
            app: target.app,
            version: target.version,
            db: String::new(),
            query: target.sql,
        })
    }
}

#[async_trait]
pub trait SavedQueryApi: Send + Sync {
    async fn create_saved(&self, query: &NewSavedQuery) -> Result<(), ApiError>;
    async fn list_saved(&self) -> Result<Vec<SavedQuery>, ApiError>;
    async fn delete_saved(&self, id: &str) -> Result<(), ApiError>;
}

#[async_trait]
impl<T: SavedQueryApi + ?Sized> SavedQueryApi for Arc<T> {
    async fn create_saved(&self, query: &NewSavedQuery) -> Result<(), ApiError> {
        (**self).create_saved(query).await
    }

    async fn list_saved(&self) -> Result<Vec<SavedQuery>, ApiError> {
        (**self).list_saved().await
    }

    async fn delete_saved(&self, id: &str) -> Result<(), ApiError> {
        (**self).delete_saved(id).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SavedQueryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("failed to save query: {0}")]
    Save(#[source] ApiError),
    #[error("failed to list saved queries: {0}")]
    List(#[source] ApiError),
    #[error("failed to delete saved query: {0}")]
    Delete(#[source] ApiError),
}

impl SavedQueryError {
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(error) => error.user_message().to_string(),
            Self::Save(ApiError::Conflict { .. }) => labels::SAVED_DUPLICATE.to_string(),
            Self::Save(ApiError::Unauthorized) => labels::SAVED_UNAUTHORIZED.to_string(),
            Self::Delete(ApiError::Unauthorized) => labels::DELETE_UNKNOWN_USER.to_string(),
            Self::Delete(ApiError::NotFound) => labels::NOT_FOUND.to_string(),
            Self::Save(error) | Self::List(error) | Self::Delete(error) => error.user_message(),
        }
    }
}

/// The "常用查询" list on top of a [`SavedQueryApi`].
#[derive(Debug)]
pub struct SavedQueryBook<B: SavedQueryApi> {
    backend: B,
}

impl<B: SavedQueryApi> SavedQueryBook<B> {
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Returns the confirmation text on success.
    pub async fn save(
        &self,
        name: &str,
        app: Option<&str>,
        version: Option<&str>,
        sql: &str,
    ) -> Result<&'static str, SavedQueryError> {
        let query = NewSavedQuery::prepare(name, app, version, sql)?;
        self.backend
            .create_saved(&query)
            .await
            .map_err(SavedQueryError::Save)?;
        tracing::info!(name = %query.name, "saved query");
        Ok(labels::SAVED_OK)
    }

    pub async fn list(&self) -> Result<Vec<SavedQuery>, SavedQueryError> {
        self.backend.list_saved().await.map_err(SavedQueryError::List)
    }

    pub async fn delete(&self, id: &str) -> Result<&'static str, SavedQueryError> {
        self.backend
            .delete_saved(id)
            .await
            .map_err(SavedQueryError::Delete)?;
        tracing::info!(id, "deleted saved query");
        Ok(labels::DELETED_OK)
    }
}
