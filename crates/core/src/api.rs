use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::labels;

/// Failure of a single REST call, classified by the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("request was not authorized")]
    Unauthorized,
    #[error("request was forbidden")]
    Forbidden,
    #[error("resource was not found")]
    NotFound,
    #[error("request conflicts with server state: {message}")]
    Conflict { message: String },
    #[error("server responded with status {status}")]
    Server { status: u16 },
    #[error("server is unreachable: {message}")]
    Transport { message: String },
    #[error("failed to decode server response: {message}")]
    Decode { message: String },
}

impl ApiError {
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Generic text shown when a call fails without a more specific handler.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Unauthorized => labels::UNAUTHORIZED.to_string(),
            Self::Forbidden => labels::FORBIDDEN.to_string(),
            Self::NotFound => labels::NOT_FOUND.to_string(),
            Self::Conflict { message } => message.clone(),
            Self::Server { .. } => labels::SERVER_ERROR.to_string(),
            Self::Transport { .. } | Self::Decode { .. } => labels::SERVER_UNREACHABLE.to_string(),
        }
    }
}

/// Millisecond timestamp sent with every GET so intermediaries never serve a stale poll.
#[must_use]
pub fn cache_buster() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(serde_json::Number),
}

/// Accepts record ids sent either as JSON strings or numbers.
pub fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(text) => text,
        RawId::Number(number) => number.to_string(),
    })
}

pub fn deserialize_optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<RawId>::deserialize(deserializer)? {
        Some(RawId::Text(text)) => Some(text),
        Some(RawId::Number(number)) => Some(number.to_string()),
        None => None,
    })
}
