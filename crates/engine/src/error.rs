use qcat_core::{ConfigurationError, ConfigurationRef};
use qcat_search::SearchError;
use qcat_storage::{DocumentStatus, StorageError, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One problem with a submitted or stored payload, addressed down to the
/// questiongroup instance and question where possible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDiagnostic {
    pub questiongroup: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    pub message: String,
}

impl FieldDiagnostic {
    pub fn group(questiongroup: &str, message: impl Into<String>) -> Self {
        FieldDiagnostic {
            questiongroup: questiongroup.to_string(),
            index: None,
            question: None,
            message: message.into(),
        }
    }

    pub fn field(
        questiongroup: &str,
        index: usize,
        question: &str,
        message: impl Into<String>,
    ) -> Self {
        FieldDiagnostic {
            questiongroup: questiongroup.to_string(),
            index: Some(index),
            question: Some(question.to_string()),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.questiongroup)?;
        if let Some(index) = self.index {
            write!(f, "[{}]", index)?;
        }
        if let Some(question) = &self.question {
            write!(f, ".{}", question)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Errors surfaced by the engine and the access boundary.
#[derive(Debug, thiserror::Error)]
pub enum QcatError {
    #[error("unknown configuration {0}")]
    UnknownConfiguration(ConfigurationRef),

    #[error("configuration {0} is invalid and cannot serve forms")]
    InvalidConfiguration(ConfigurationRef),

    #[error("validation failed: {}", summarize(.0))]
    ValidationFailed(Vec<FieldDiagnostic>),

    #[error("permission denied: requires {required_role}")]
    PermissionDenied { required_role: String },

    #[error("document is being edited by user {user} until {until}")]
    LockedBy { user: UserId, until: String },

    #[error("illegal transition from {from} to {to}")]
    IllegalTransition {
        from: DocumentStatus,
        to: DocumentStatus,
    },

    #[error("required answers missing: {}", .missing.join(", "))]
    IncompleteForSubmit { missing: Vec<String> },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("link rejected: {0}")]
    LinkInconsistent(String),

    #[error("external service unavailable: {0}")]
    ExternalUnavailable(String),

    #[error("search index out of sync: {0}")]
    IndexOutOfSync(String),

    #[error(transparent)]
    Storage(StorageError),

    #[error(transparent)]
    Configuration(ConfigurationError),
}

fn summarize(diagnostics: &[FieldDiagnostic]) -> String {
    match diagnostics {
        [] => "no diagnostics".to_string(),
        [only] => only.to_string(),
        [first, rest @ ..] => format!("{} (and {} more)", first, rest.len()),
    }
}

impl QcatError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        QcatError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn denied(required_role: impl Into<String>) -> Self {
        QcatError::PermissionDenied {
            required_role: required_role.into(),
        }
    }

    /// Field diagnostics carried by `ValidationFailed`; empty otherwise.
    pub fn diagnostics(&self) -> &[FieldDiagnostic] {
        match self {
            QcatError::ValidationFailed(d) => d,
            _ => &[],
        }
    }
}

impl From<StorageError> for QcatError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound { kind, id } => QcatError::NotFound { kind, id },
            other => QcatError::Storage(other),
        }
    }
}

impl From<ConfigurationError> for QcatError {
    fn from(e: ConfigurationError) -> Self {
        match e {
            ConfigurationError::UnknownConfiguration(key) => QcatError::UnknownConfiguration(key),
            ConfigurationError::InvalidConfiguration { key, .. } => {
                QcatError::InvalidConfiguration(key)
            }
            other => QcatError::Configuration(other),
        }
    }
}

impl From<SearchError> for QcatError {
    fn from(e: SearchError) -> Self {
        QcatError::ExternalUnavailable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_not_found_maps_to_not_found() {
        let err: QcatError = StorageError::document_not_found("abc").into();
        assert!(matches!(err, QcatError::NotFound { kind: "document", .. }));
    }

    #[test]
    fn validation_message_names_first_field() {
        let err = QcatError::ValidationFailed(vec![
            FieldDiagnostic::field("qg_1", 0, "key_1", "too long"),
            FieldDiagnostic::group("qg_5", "too many instances"),
        ]);
        assert_eq!(
            err.to_string(),
            "validation failed: qg_1[0].key_1: too long (and 1 more)"
        );
        assert_eq!(err.diagnostics().len(), 2);
    }
}
