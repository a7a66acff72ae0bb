//! Application state, session resolution and error responses.

use std::path::PathBuf;

use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use qcat_engine::{QcatError, Viewer};
use qcat_search::SearchBackend;
use tracing::error;

use crate::commands::Boundary;

pub(crate) struct AppState<B: SearchBackend> {
    pub(crate) qcat: Boundary<B>,
    /// Where `reload-configuration` style requests read documents from.
    pub(crate) configurations_dir: PathBuf,
}

impl<B: SearchBackend> AppState<B> {
    /// Resolve the viewer from the session cookie, or from a bearer token
    /// for API clients.
    pub(crate) async fn viewer(&self, headers: &HeaderMap) -> Viewer {
        let token = session_token(headers, self.qcat.session_cookie()).or_else(|| bearer_token(headers));
        self.qcat.authenticate(token.as_deref()).await.viewer
    }
}

fn session_token(headers: &HeaderMap, cookie: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == cookie)
        .map(|(_, value)| value.to_string())
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_string())
}

/// An engine error rendered as a JSON response.
pub(crate) struct ApiError(pub(crate) QcatError);

impl From<QcatError> for ApiError {
    fn from(e: QcatError) -> Self {
        ApiError(e)
    }
}

pub(crate) fn status_for(e: &QcatError) -> StatusCode {
    match e {
        QcatError::UnknownConfiguration(_) | QcatError::NotFound { .. } => StatusCode::NOT_FOUND,
        QcatError::ValidationFailed(_) | QcatError::IncompleteForSubmit { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        QcatError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
        QcatError::LockedBy { .. } => StatusCode::LOCKED,
        QcatError::IllegalTransition { .. }
        | QcatError::LinkInconsistent(_)
        | QcatError::InvalidConfiguration(_) => StatusCode::CONFLICT,
        QcatError::ExternalUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        QcatError::IndexOutOfSync(_) | QcatError::Storage(_) | QcatError::Configuration(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }
        let mut body = serde_json::json!({ "error": self.0.to_string() });
        match &self.0 {
            QcatError::ValidationFailed(diagnostics) => {
                body["diagnostics"] = serde_json::json!(diagnostics);
            }
            QcatError::IncompleteForSubmit { missing } => {
                body["missing"] = serde_json::json!(missing);
            }
            QcatError::LockedBy { user, until } => {
                body["locked_by"] = serde_json::json!(user);
                body["until"] = serde_json::json!(until);
            }
            _ => {}
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn session_cookie_is_found_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; wocat_session=abc123; lang=fr"),
        );
        assert_eq!(session_token(&headers, "wocat_session").as_deref(), Some("abc123"));
        assert_eq!(session_token(&headers, "fe_typo_user"), None);
    }

    #[test]
    fn bearer_token_is_accepted() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer t-1"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("t-1"));
    }

    #[test]
    fn engine_errors_map_to_statuses() {
        assert_eq!(status_for(&QcatError::not_found("document", "x")), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&QcatError::denied("publisher")), StatusCode::FORBIDDEN);
        assert_eq!(
            status_for(&QcatError::LockedBy { user: 2, until: "later".into() }),
            StatusCode::LOCKED
        );
        assert_eq!(
            status_for(&QcatError::LinkInconsistent("wrong configuration".into())),
            StatusCode::CONFLICT
        );
    }
}
