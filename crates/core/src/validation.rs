use thiserror::Error;

use crate::labels;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no application selected")]
    MissingApp,
    #[error("no version selected")]
    MissingVersion,
    #[error("query text is empty")]
    EmptyQuery,
    #[error("name is empty")]
    EmptyName,
}

impl ValidationError {
    #[must_use]
    pub fn user_message(self) -> &'static str {
        match self {
            Self::MissingApp => labels::SELECT_APP,
            Self::MissingVersion => labels::SELECT_VERSION,
            Self::EmptyQuery => labels::ENTER_SQL,
            Self::EmptyName => labels::ENTER_NAME,
        }
    }
}

/// A selector value that names a concrete app and version, with trimmed SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTarget {
    pub app: String,
    pub version: String,
    pub sql: String,
}

pub fn validate_query_target(
    app: Option<&str>,
    version: Option<&str>,
    sql: &str,
) -> Result<QueryTarget, ValidationError> {
    let app = concrete_selection(app, labels::APP_PLACEHOLDER).ok_or(ValidationError::MissingApp)?;
    let version = concrete_selection(version, labels::VERSION_PLACEHOLDER)
        .ok_or(ValidationError::MissingVersion)?;
    let sql = sql.trim();
    if sql.is_empty() {
        return Err(ValidationError::EmptyQuery);
    }

    Ok(QueryTarget {
        app: app.to_string(),
        version: version.to_string(),
        sql: sql.to_string(),
    })
}

fn concrete_selection<'a>(value: Option<&'a str>, placeholder: &str) -> Option<&'a str> {
    value
        .map(str::trim)
        .filter(|selected| !selected.is_empty() && *selected != placeholder)
}

#[cfg(test)]
mod tests {
    use super::{validate_query_target, ValidationError};
    use crate::labels;

    #[test]
    fn placeholders_count_as_missing() {
        assert_eq!(
            validate_query_target(Some(labels::APP_PLACEHOLDER), Some("v2"), "select 1"),
            Err(ValidationError::MissingApp)
        );
        assert_eq!(
            validate_query_target(Some("Shop"), Some(labels::VERSION_PLACEHOLDER), "select 1"),
            Err(ValidationError::MissingVersion)
        );
        assert_eq!(
            validate_query_target(None, Some("v2"), "select 1"),
            Err(ValidationError::MissingApp)
        );
    }

    #[test]
    fn whitespace_only_sql_is_rejected() {
        assert_eq!(
            validate_query_target(Some("Shop"), Some("v2"), " \n\t "),
            Err(ValidationError::EmptyQuery)
        );
    }

    #[test]
    fn valid_target_is_trimmed() {
        let target = validate_query_target(Some("Shop"), Some("v2"), "  select 1 \n")
            .expect("target should validate");
        assert_eq!(target.app, "Shop");
        assert_eq!(target.version, "v2");
        assert_eq!(target.sql, "select 1");
    }

    #[test]
    fn messages_match_console_labels() {
        assert_eq!(ValidationError::MissingApp.user_message(), "请选择产品");
        assert_eq!(ValidationError::EmptyQuery.user_message(), "请输入sql语句");
    }
}
