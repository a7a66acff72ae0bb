//! Route handlers. Each resolves the viewer and delegates to the access
//! boundary; engine errors become JSON error responses via [`ApiError`].

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use qcat_engine::{
    DocumentSummary, DocumentView, FormDescriptor, LinkCandidate, MembershipChange, Permission, QcatError,
    ReviewAction, Selector, StepCommit, StepInput, UserCandidate,
};
use qcat_search::{CancellationFlag, ListPage, ListQuery, RebuildReport, SearchBackend};
use qcat_storage::{BlobRecord, DocumentRecord, Role, UserId};
use serde::Deserialize;
use serde_json::{json, Value};

use super::json_error;
use super::state::{ApiError, AppState};

type ApiResult<T> = Result<Json<T>, ApiError>;

fn default_language() -> String {
    "en".to_string()
}

#[derive(Debug, Deserialize)]
pub(crate) struct LanguageParams {
    #[serde(default = "default_language")]
    lang: String,
}

/// Fallback handler for unmatched routes.
pub(crate) async fn handle_not_found() -> impl IntoResponse {
    json_error(StatusCode::NOT_FOUND, "not found")
}

/// GET /health
pub(crate) async fn handle_health<B: SearchBackend>(State(state): State<Arc<AppState<B>>>) -> impl IntoResponse {
    let response = json!({
        "status": "ok",
        "configurations": state.qcat.registry().codes(),
    });
    (StatusCode::OK, Json(response))
}

// ── Session ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct LoginRequest {
    username: String,
    password: String,
}

/// POST /api/v1/login
pub(crate) async fn handle_login<B: SearchBackend>(
    State(state): State<Arc<AppState<B>>>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(token) = state.qcat.login(&req.username, &req.password).await? else {
        return Ok(json_error(StatusCode::UNAUTHORIZED, "invalid credentials").into_response());
    };
    let cookie = format!("{}={}; Path=/; HttpOnly", state.qcat.session_cookie(), token);
    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(json!({ "token": token })),
    )
        .into_response())
}

// ── Lists ────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ListParams {
    q: Option<String>,
    /// Comma-separated configuration codes; `wocat` means the defaults.
    #[serde(rename = "type")]
    configurations: Option<String>,
    country: Option<String>,
    created_from: Option<String>,
    created_to: Option<String>,
    updated_from: Option<String>,
    updated_to: Option<String>,
    lang: Option<String>,
    page: Option<usize>,
    page_size: Option<usize>,
    #[serde(default)]
    sort_by_updated: bool,
}

impl ListParams {
    fn into_query(self) -> ListQuery {
        let defaults = ListQuery::default();
        ListQuery {
            text: self.q.filter(|q| !q.trim().is_empty()),
            configurations: self
                .configurations
                .map(|c| {
                    c.split(',')
                        .map(str::trim)
                        .filter(|c| !c.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            country: self.country,
            created_from: self.created_from,
            created_to: self.created_to,
            updated_from: self.updated_from,
            updated_to: self.updated_to,
            facets: Vec::new(),
            language: self.lang.unwrap_or(defaults.language),
            page: self.page.unwrap_or(defaults.page).max(1),
            page_size: self.page_size.unwrap_or(defaults.page_size),
            sort_by_updated: self.sort_by_updated,
        }
    }
}

/// GET /api/v1/questionnaires
pub(crate) async fn handle_list<B: SearchBackend>(
    State(state): State<Arc<AppState<B>>>,
    Query(params): Query<ListParams>,
) -> ApiResult<ListPage> {
    Ok(Json(state.qcat.list(&params.into_query()).await?))
}

/// GET /api/v1/questionnaires/counts
pub(crate) async fn handle_counts<B: SearchBackend>(
    State(state): State<Arc<AppState<B>>>,
) -> ApiResult<BTreeMap<String, usize>> {
    Ok(Json(state.qcat.counts().await?))
}

/// GET /api/v1/my-data
pub(crate) async fn handle_my_data<B: SearchBackend>(
    State(state): State<Arc<AppState<B>>>,
    headers: HeaderMap,
    Query(params): Query<LanguageParams>,
) -> ApiResult<Vec<DocumentSummary>> {
    let viewer = state.viewer(&headers).await;
    if viewer.is_anonymous() {
        return Err(QcatError::denied("authenticated user").into());
    }
    Ok(Json(state.qcat.my_data(&viewer, &params.lang).await?))
}

/// GET /api/v1/pending/review
pub(crate) async fn handle_pending_review<B: SearchBackend>(
    State(state): State<Arc<AppState<B>>>,
    headers: HeaderMap,
    Query(params): Query<LanguageParams>,
) -> ApiResult<Vec<DocumentSummary>> {
    let viewer = state.viewer(&headers).await;
    Ok(Json(state.qcat.pending_review(&viewer, &params.lang).await?))
}

/// GET /api/v1/pending/publish
pub(crate) async fn handle_pending_publish<B: SearchBackend>(
    State(state): State<Arc<AppState<B>>>,
    headers: HeaderMap,
    Query(params): Query<LanguageParams>,
) -> ApiResult<Vec<DocumentSummary>> {
    let viewer = state.viewer(&headers).await;
    Ok(Json(state.qcat.pending_publish(&viewer, &params.lang).await?))
}

// ── Detail and editing ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct DetailParams {
    version: Option<u32>,
    #[serde(default)]
    public: bool,
    #[serde(default = "default_language")]
    lang: String,
}

/// GET /api/v1/questionnaires/{identifier}
pub(crate) async fn handle_detail<B: SearchBackend>(
    State(state): State<Arc<AppState<B>>>,
    Path(identifier): Path<String>,
    headers: HeaderMap,
    Query(params): Query<DetailParams>,
) -> ApiResult<DocumentView> {
    let viewer = state.viewer(&headers).await;
    let selector = match (params.version, params.public) {
        (Some(version), _) => Selector::Version(version),
        (None, true) => Selector::Public,
        (None, false) => Selector::LatestForUser,
    };
    Ok(Json(
        state
            .qcat
            .detail(&identifier, &viewer, selector, &params.lang)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
pub(crate) struct NewDraftRequest {
    #[serde(default = "default_language")]
    language: String,
}

/// POST /api/v1/configurations/{code}/drafts
pub(crate) async fn handle_create_draft<B: SearchBackend>(
    State(state): State<Arc<AppState<B>>>,
    Path(code): Path<String>,
    headers: HeaderMap,
    Json(req): Json<NewDraftRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = state.viewer(&headers).await;
    let doc: DocumentRecord = state.qcat.create_draft(&code, &req.language, &viewer).await?;
    Ok((StatusCode::CREATED, Json(doc)))
}

/// GET /api/v1/documents/{id}/steps/{category}
pub(crate) async fn handle_step_render<B: SearchBackend>(
    State(state): State<Arc<AppState<B>>>,
    Path((id, category)): Path<(String, String)>,
    headers: HeaderMap,
    Query(params): Query<LanguageParams>,
) -> ApiResult<FormDescriptor> {
    let viewer = state.viewer(&headers).await;
    Ok(Json(
        state
            .qcat
            .step_render(&id, &category, &viewer, &params.lang)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
pub(crate) struct StepRequest {
    payload: Value,
    #[serde(default = "default_language")]
    language: String,
    #[serde(default)]
    confirm_translation: bool,
}

/// POST /api/v1/documents/{id}/steps/{category}
pub(crate) async fn handle_step_commit<B: SearchBackend>(
    State(state): State<Arc<AppState<B>>>,
    Path((id, category)): Path<(String, String)>,
    headers: HeaderMap,
    Json(req): Json<StepRequest>,
) -> ApiResult<StepCommit> {
    let viewer = state.viewer(&headers).await;
    let input = StepInput {
        category: &category,
        payload: &req.payload,
        language: &req.language,
        confirm_translation: req.confirm_translation,
    };
    Ok(Json(state.qcat.step_commit(&id, input, &viewer).await?))
}

/// DELETE /api/v1/documents/{id}/lock
pub(crate) async fn handle_release_lock<B: SearchBackend>(
    State(state): State<Arc<AppState<B>>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let viewer = state.viewer(&headers).await;
    state.qcat.release_lock(&id, &viewer).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/blobs, raw bytes with their content type.
pub(crate) async fn handle_upload<B: SearchBackend>(
    State(state): State<Arc<AppState<B>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = state.viewer(&headers).await;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let blob: BlobRecord = state.qcat.upload(&body, &content_type, &viewer).await?;
    Ok((StatusCode::CREATED, Json(blob)))
}

// ── Workflow ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct ActionRequest {
    action: ReviewAction,
    message: Option<String>,
}

/// POST /api/v1/documents/{id}/actions
pub(crate) async fn handle_review_action<B: SearchBackend>(
    State(state): State<Arc<AppState<B>>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<ActionRequest>,
) -> ApiResult<DocumentRecord> {
    let viewer = state.viewer(&headers).await;
    Ok(Json(
        state
            .qcat
            .review_action(&id, req.action, &viewer, req.message.as_deref())
            .await?,
    ))
}

/// POST /api/v1/documents/{id}/fork
pub(crate) async fn handle_fork<B: SearchBackend>(
    State(state): State<Arc<AppState<B>>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = state.viewer(&headers).await;
    let new_id = state.qcat.fork_new_version(&id, &viewer).await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": new_id }))))
}

#[derive(Debug, Deserialize)]
pub(crate) struct MembershipRequest {
    user: UserId,
    role: Role,
    #[serde(default = "default_true")]
    add: bool,
    message: Option<String>,
    #[serde(default)]
    retain_previous: bool,
}

fn default_true() -> bool {
    true
}

/// POST /api/v1/documents/{id}/members
pub(crate) async fn handle_membership<B: SearchBackend>(
    State(state): State<Arc<AppState<B>>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<MembershipRequest>,
) -> ApiResult<Value> {
    let viewer = state.viewer(&headers).await;
    let change = MembershipChange {
        user: req.user,
        role: req.role,
        add: req.add,
        message: req.message,
        retain_previous: req.retain_previous,
    };
    let events = state.qcat.set_membership(&id, &change, &viewer).await?;
    Ok(Json(json!({ "events": events.len() })))
}

// ── Search helpers ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct LinkSearchParams {
    #[serde(default)]
    q: String,
    configuration: Option<String>,
    #[serde(default = "default_language")]
    lang: String,
}

/// GET /api/v1/links
pub(crate) async fn handle_link_search<B: SearchBackend>(
    State(state): State<Arc<AppState<B>>>,
    headers: HeaderMap,
    Query(params): Query<LinkSearchParams>,
) -> ApiResult<Vec<LinkCandidate>> {
    let viewer = state.viewer(&headers).await;
    Ok(Json(
        state
            .qcat
            .search_links(&params.q, &viewer, params.configuration.as_deref(), &params.lang)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
pub(crate) struct UserSearchParams {
    #[serde(default)]
    name: String,
}

/// GET /api/v1/users
pub(crate) async fn handle_user_search<B: SearchBackend>(
    State(state): State<Arc<AppState<B>>>,
    headers: HeaderMap,
    Query(params): Query<UserSearchParams>,
) -> ApiResult<Vec<UserCandidate>> {
    let viewer = state.viewer(&headers).await;
    if viewer.is_anonymous() {
        return Err(QcatError::denied("authenticated user").into());
    }
    Ok(Json(state.qcat.search_users(&params.name).await))
}

// ── Administration ───────────────────────────────────────────────────────

/// POST /api/v1/admin/reindex/{code}
pub(crate) async fn handle_reindex<B: SearchBackend>(
    State(state): State<Arc<AppState<B>>>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> ApiResult<RebuildReport> {
    let viewer = state.viewer(&headers).await;
    if !viewer.has(Permission::Secretariat) {
        return Err(QcatError::denied(Permission::Secretariat.as_str()).into());
    }
    let report = state
        .qcat
        .rebuild_index(&code, &CancellationFlag::new())
        .await?;
    Ok(Json(report))
}

/// POST /api/v1/admin/configurations/{code}/{edition}/reload
pub(crate) async fn handle_reload<B: SearchBackend>(
    State(state): State<Arc<AppState<B>>>,
    Path((code, edition)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Value> {
    let viewer = state.viewer(&headers).await;
    if !viewer.has(Permission::Secretariat) {
        return Err(QcatError::denied(Permission::Secretariat.as_str()).into());
    }
    let config = state
        .qcat
        .reload_configuration(&code, &edition, &state.configurations_dir)?;
    let key = config.key();
    Ok(Json(json!({ "code": key.code, "edition": key.edition })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_params_split_configuration_codes() {
        let params = ListParams {
            q: Some("  ".into()),
            configurations: Some("technologies, unccd,".into()),
            page: Some(0),
            ..ListParams::default()
        };
        let query = params.into_query();
        assert_eq!(query.text, None);
        assert_eq!(query.configurations, vec!["technologies", "unccd"]);
        assert_eq!(query.page, 1);
        assert_eq!(query.language, "en");
    }
}
