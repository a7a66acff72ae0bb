//! External user directory: login, session validation, user lookup and
//! search.
//!
//! [`HttpDirectory`] talks to the directory's REST API with `ureq` inside
//! `spawn_blocking`. [`DirectoryClient`] bounds every call with a timeout
//! and degrades instead of failing: searches return nothing and lookups
//! fall back to the user records cached in the store.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use qcat_storage::{AnswerStore, UserId, UserRecord};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use tracing::{debug, warn};

use crate::clock::{timestamp, Clock};
use crate::error::QcatError;
use crate::viewer::Viewer;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCandidate {
    pub id: UserId,
    pub display_name: String,
    pub email: String,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Session token for valid credentials, `None` otherwise.
    async fn login(&self, username: &str, password: &str) -> Result<Option<String>, QcatError>;

    /// User behind a session token, `None` for an invalid session.
    async fn validate(&self, token: &str) -> Result<Option<UserId>, QcatError>;

    async fn get_user(&self, id: UserId) -> Result<Option<UserRecord>, QcatError>;

    async fn search_users(&self, name: &str) -> Result<Vec<UserCandidate>, QcatError>;
}

// ──────────────────────────────────────────────
// HTTP directory
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectorySettings {
    pub url: String,
    /// Static service credential, sent as `Authorization: Token <key>`.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Service account used to obtain a credential when no key is set.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

pub struct HttpDirectory {
    settings: DirectorySettings,
    timeout: Duration,
    service_token: Mutex<Option<String>>,
}

struct Reply {
    status: u16,
    body: Json,
}

impl HttpDirectory {
    pub fn new(settings: DirectorySettings, timeout: Duration) -> Self {
        HttpDirectory {
            settings,
            timeout,
            service_token: Mutex::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.settings.url.trim_end_matches('/'), path)
    }

    async fn call(
        &self,
        path: &str,
        body: Option<Json>,
        authorization: Option<String>,
    ) -> Result<Reply, QcatError> {
        let url = self.url(path);
        let timeout = self.timeout;
        debug!(%url, "directory request");
        tokio::task::spawn_blocking(move || {
            let config = ureq::Agent::config_builder()
                .http_status_as_error(false)
                .timeout_global(Some(timeout))
                .build();
            let agent = ureq::Agent::new_with_config(config);
            let result = match body {
                Some(body) => {
                    let mut request = agent.post(&url).header("Accept", "application/json");
                    if let Some(auth) = &authorization {
                        request = request.header("Authorization", auth);
                    }
                    request.send_json(&body)
                }
                None => {
                    let mut request = agent.get(&url).header("Accept", "application/json");
                    if let Some(auth) = &authorization {
                        request = request.header("Authorization", auth);
                    }
                    request.call()
                }
            };
            let response = result.map_err(|e| QcatError::ExternalUnavailable(e.to_string()))?;
            let status = response.status().as_u16();
            let text = response
                .into_body()
                .read_to_string()
                .map_err(|e| QcatError::ExternalUnavailable(e.to_string()))?;
            let body = serde_json::from_str(&text).unwrap_or(Json::Null);
            Ok(Reply { status, body })
        })
        .await
        .map_err(|e| QcatError::ExternalUnavailable(format!("task join error: {}", e)))?
    }

    /// Service credential: the static key, or a token from a prior login
    /// of the service account.
    async fn credential(&self) -> Result<String, QcatError> {
        if let Some(key) = &self.settings.api_key {
            return Ok(format!("Token {}", key));
        }
        if let Some(token) = self
            .service_token
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        {
            return Ok(format!("Token {}", token));
        }
        let (Some(username), Some(password)) = (&self.settings.username, &self.settings.password)
        else {
            return Err(QcatError::ExternalUnavailable(
                "directory has no service credential configured".to_string(),
            ));
        };
        let token = self.login(username, password).await?.ok_or_else(|| {
            QcatError::ExternalUnavailable("directory rejected the service login".to_string())
        })?;
        *self.service_token.lock().unwrap_or_else(|e| e.into_inner()) = Some(token.clone());
        Ok(format!("Token {}", token))
    }

    async fn authorized(&self, path: &str, body: Option<Json>) -> Result<Reply, QcatError> {
        let credential = self.credential().await?;
        let reply = self.call(path, body, Some(credential)).await?;
        if reply.status == 401 || reply.status == 403 {
            // Service token rotated; the next call logs in again.
            self.service_token
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take();
        }
        Ok(reply)
    }
}

fn user_from_json(id: UserId, body: &Json) -> UserRecord {
    let text = |key: &str| body.get(key).and_then(Json::as_str).unwrap_or("").to_string();
    UserRecord {
        id,
        email: text("email"),
        first_name: text("first_name"),
        last_name: text("last_name"),
        permissions: body
            .get("permissions")
            .and_then(Json::as_array)
            .map(|a| a.iter().filter_map(Json::as_str).map(str::to_string).collect())
            .unwrap_or_default(),
        updated: String::new(),
    }
}

fn unexpected(reply: &Reply) -> QcatError {
    QcatError::ExternalUnavailable(format!("directory answered with status {}", reply.status))
}

#[async_trait]
impl UserDirectory for HttpDirectory {
    async fn login(&self, username: &str, password: &str) -> Result<Option<String>, QcatError> {
        let reply = self
            .call(
                "auth/login/",
                Some(json!({"username": username, "password": password})),
                None,
            )
            .await?;
        match reply.status {
            200..=299 => Ok(reply
                .body
                .get("token")
                .or_else(|| reply.body.get("session_id"))
                .and_then(Json::as_str)
                .map(str::to_string)),
            400..=499 => Ok(None),
            _ => Err(unexpected(&reply)),
        }
    }

    async fn validate(&self, token: &str) -> Result<Option<UserId>, QcatError> {
        let reply = self
            .authorized("auth/session/", Some(json!({"session_id": token})))
            .await?;
        match reply.status {
            200..=299 => {
                let valid = reply.body.get("success").and_then(Json::as_bool) == Some(true)
                    && reply.body.get("login").and_then(Json::as_bool) == Some(true);
                Ok(valid
                    .then(|| reply.body.get("userid").and_then(Json::as_u64))
                    .flatten())
            }
            400..=499 => Ok(None),
            _ => Err(unexpected(&reply)),
        }
    }

    async fn get_user(&self, id: UserId) -> Result<Option<UserRecord>, QcatError> {
        let reply = self.authorized(&format!("users/{}/", id), None).await?;
        match reply.status {
            200..=299 => Ok(Some(user_from_json(id, &reply.body))),
            404 => Ok(None),
            _ => Err(unexpected(&reply)),
        }
    }

    async fn search_users(&self, name: &str) -> Result<Vec<UserCandidate>, QcatError> {
        let encoded: String = name
            .bytes()
            .map(|b| match b {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                    (b as char).to_string()
                }
                other => format!("%{:02X}", other),
            })
            .collect();
        let reply = self.authorized(&format!("users/?name={}", encoded), None).await?;
        if !(200..=299).contains(&reply.status) {
            return Err(unexpected(&reply));
        }
        Ok(reply
            .body
            .as_array()
            .map(|users| {
                users
                    .iter()
                    .filter_map(|u| {
                        let id = u.get("pk").or_else(|| u.get("id")).and_then(Json::as_u64)?;
                        let record = user_from_json(id, u);
                        Some(UserCandidate {
                            id,
                            display_name: record.display_name(),
                            email: record.email,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

// ──────────────────────────────────────────────
// Static directory
// ──────────────────────────────────────────────

/// In-memory directory for tests and offline installations.
#[derive(Default)]
pub struct StaticDirectory {
    users: BTreeMap<UserId, UserRecord>,
    passwords: BTreeMap<String, (String, UserId)>,
    sessions: Mutex<BTreeMap<String, UserId>>,
    delay: Option<Duration>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        StaticDirectory::default()
    }

    pub fn with_user(mut self, user: UserRecord) -> Self {
        self.users.insert(user.id, user);
        self
    }

    pub fn with_password(mut self, username: &str, password: &str, id: UserId) -> Self {
        self.passwords
            .insert(username.to_string(), (password.to_string(), id));
        self
    }

    pub fn with_session(self, token: &str, id: UserId) -> Self {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(token.to_string(), id);
        self
    }

    /// Answer every call only after `delay`, to exercise timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl UserDirectory for StaticDirectory {
    async fn login(&self, username: &str, password: &str) -> Result<Option<String>, QcatError> {
        self.pause().await;
        let Some((expected, id)) = self.passwords.get(username) else {
            return Ok(None);
        };
        if expected != password {
            return Ok(None);
        }
        let token = format!("session-{}-{}", id, uuid::Uuid::new_v4());
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(token.clone(), *id);
        Ok(Some(token))
    }

    async fn validate(&self, token: &str) -> Result<Option<UserId>, QcatError> {
        self.pause().await;
        Ok(self
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(token)
            .copied())
    }

    async fn get_user(&self, id: UserId) -> Result<Option<UserRecord>, QcatError> {
        self.pause().await;
        Ok(self.users.get(&id).cloned())
    }

    async fn search_users(&self, name: &str) -> Result<Vec<UserCandidate>, QcatError> {
        self.pause().await;
        let needle = name.trim().to_lowercase();
        Ok(self
            .users
            .values()
            .filter(|u| {
                !needle.is_empty()
                    && (u.display_name().to_lowercase().contains(&needle)
                        || u.email.to_lowercase().contains(&needle))
            })
            .map(|u| UserCandidate {
                id: u.id,
                display_name: u.display_name(),
                email: u.email.clone(),
            })
            .collect())
    }
}

// ──────────────────────────────────────────────
// Degrading client
// ──────────────────────────────────────────────

/// Result of reading the session cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub viewer: Viewer,
    /// The cookie carried an invalid token and should be cleared.
    pub logout: bool,
}

pub struct DirectoryClient<S: AnswerStore> {
    directory: Arc<dyn UserDirectory>,
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl<S: AnswerStore> DirectoryClient<S> {
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        DirectoryClient {
            directory,
            store,
            clock,
            timeout,
        }
    }

    async fn bounded<T>(
        &self,
        what: &str,
        call: impl std::future::Future<Output = Result<T, QcatError>>,
    ) -> Result<T, QcatError> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(call = what, timeout_ms = self.timeout.as_millis() as u64, "directory call timed out");
                Err(QcatError::ExternalUnavailable(format!("{} timed out", what)))
            }
        }
    }

    /// Candidates for a name search; empty when the directory is slow or
    /// down.
    pub async fn search_users(&self, name: &str) -> Vec<UserCandidate> {
        if name.trim().is_empty() {
            return Vec::new();
        }
        match self
            .bounded("search_users", self.directory.search_users(name))
            .await
        {
            Ok(users) => users,
            Err(e) => {
                warn!(error = %e, "user search degraded to an empty result");
                Vec::new()
            }
        }
    }

    /// Fresh user data, cached in the store; the cached copy when the
    /// directory cannot answer.
    pub async fn get_user(&self, id: UserId) -> Option<UserRecord> {
        match self.bounded("get_user", self.directory.get_user(id)).await {
            Ok(Some(mut user)) => {
                user.updated = timestamp(self.clock.now());
                if let Err(e) = self.store.put_user(user.clone()).await {
                    warn!(user = id, error = %e, "could not cache directory user");
                }
                Some(user)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(user = id, error = %e, "user lookup degraded to cached data");
                self.store.get_user(id).await.ok().flatten()
            }
        }
    }

    pub async fn display_name(&self, id: UserId) -> String {
        match self.store.get_user(id).await.ok().flatten() {
            Some(user) => user.display_name(),
            None => self
                .get_user(id)
                .await
                .map(|u| u.display_name())
                .unwrap_or_else(|| format!("user {}", id)),
        }
    }

    /// Resolve the session cookie value to a viewer. No cookie is
    /// anonymous; an unreachable directory is anonymous without logout.
    pub async fn authenticate(&self, token: Option<&str>) -> Session {
        let Some(token) = token.map(str::trim).filter(|t| !t.is_empty()) else {
            return Session {
                viewer: Viewer::anonymous(),
                logout: false,
            };
        };
        match self.bounded("validate", self.directory.validate(token)).await {
            Ok(Some(id)) => {
                let viewer = match self.get_user(id).await {
                    Some(user) => Viewer::from_record(&user),
                    None => Viewer::user(id),
                };
                Session {
                    viewer,
                    logout: false,
                }
            }
            Ok(None) => Session {
                viewer: Viewer::anonymous(),
                logout: true,
            },
            Err(e) => {
                warn!(error = %e, "session validation degraded to anonymous");
                Session {
                    viewer: Viewer::anonymous(),
                    logout: false,
                }
            }
        }
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Option<String>, QcatError> {
        self.bounded("login", self.directory.login(username, password))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::viewer::Permission;
    use qcat_storage::MemoryStore;

    fn ada() -> UserRecord {
        UserRecord {
            id: 7,
            email: "ada@example.org".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            permissions: vec!["review_any".to_string()],
            updated: String::new(),
        }
    }

    fn client(directory: StaticDirectory, store: Arc<MemoryStore>) -> DirectoryClient<MemoryStore> {
        DirectoryClient::new(
            Arc::new(directory),
            store,
            Arc::new(SystemClock),
            Duration::from_millis(50),
        )
    }

    #[tokio::test]
    async fn session_cookie_resolves_to_viewer_with_permissions() {
        let store = Arc::new(MemoryStore::new());
        let directory = StaticDirectory::new()
            .with_user(ada())
            .with_password("ada@example.org", "secret", 7);
        let client = client(directory, store.clone());

        assert!(client.login("ada@example.org", "wrong").await.unwrap().is_none());
        let token = client.login("ada@example.org", "secret").await.unwrap().unwrap();
        let session = client.authenticate(Some(&token)).await;
        assert_eq!(session.viewer.user_id, Some(7));
        assert!(session.viewer.has(Permission::ReviewAny));
        assert!(!session.logout);
        assert!(store.get_user(7).await.unwrap().is_some());

        let invalid = client.authenticate(Some("stale")).await;
        assert!(invalid.viewer.is_anonymous());
        assert!(invalid.logout);
        assert!(!client.authenticate(None).await.logout);
    }

    #[tokio::test]
    async fn slow_directory_degrades() {
        let store = Arc::new(MemoryStore::new());
        store
            .put_user(UserRecord {
                updated: "2025-01-01T00:00:00.000000Z".to_string(),
                ..ada()
            })
            .await
            .unwrap();
        let slow = StaticDirectory::new()
            .with_user(ada())
            .with_session("tok", 7)
            .with_delay(Duration::from_millis(500));
        let client = client(slow, store);

        assert!(client.search_users("ada").await.is_empty());
        let cached = client.get_user(7).await.unwrap();
        assert_eq!(cached.updated, "2025-01-01T00:00:00.000000Z");
        let session = client.authenticate(Some("tok")).await;
        assert!(session.viewer.is_anonymous());
        assert!(!session.logout);
    }

    #[tokio::test]
    async fn static_search_matches_name_or_email() {
        let directory = StaticDirectory::new().with_user(ada());
        let found = directory.search_users("lovelace").await.unwrap();
        assert_eq!(found[0].display_name, "Ada Lovelace");
        assert!(directory.search_users("").await.unwrap().is_empty());
    }
}
