use qcat_interchange::{ConfigurationRef, InterchangeError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A structural problem found while building or validating a configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigIssue {
    pub pass: u8,
    /// Kind of element the issue is attached to ("question", "questiongroup", ...).
    pub element: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
}

impl ConfigIssue {
    pub fn new(
        pass: u8,
        element: &str,
        keyword: Option<&str>,
        field: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        ConfigIssue {
            pass,
            element: element.to_owned(),
            keyword: keyword.map(str::to_owned),
            field: field.map(str::to_owned),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pass {}: {}", self.pass, self.element)?;
        if let Some(keyword) = &self.keyword {
            write!(f, " '{}'", keyword)?;
        }
        if let Some(field) = &self.field {
            write!(f, " ({})", field)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Errors surfaced by the configuration registry.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigurationError {
    #[error("unknown configuration {0}")]
    UnknownConfiguration(ConfigurationRef),

    #[error("invalid configuration {key}: {} issue(s), first: {}", issues.len(), first_issue(issues))]
    InvalidConfiguration {
        key: ConfigurationRef,
        issues: Vec<ConfigIssue>,
    },

    #[error("{element} '{keyword}' not found")]
    NotFound { element: String, keyword: String },

    #[error("configuration document: {0}")]
    Document(#[from] InterchangeError),

    #[error("io error: {0}")]
    Io(String),
}

fn first_issue(issues: &[ConfigIssue]) -> String {
    issues
        .first()
        .map(|i| i.to_string())
        .unwrap_or_else(|| "none".to_string())
}

impl ConfigurationError {
    pub fn not_found(element: &str, keyword: &str) -> Self {
        ConfigurationError::NotFound {
            element: element.to_string(),
            keyword: keyword.to_string(),
        }
    }
}
