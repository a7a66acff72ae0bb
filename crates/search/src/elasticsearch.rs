//! Elasticsearch backend over the REST API.
//!
//! Uses `ureq` (sync) wrapped in `tokio::task::spawn_blocking` so the async
//! runtime is never blocked on cluster I/O.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde_json::{json, Value};
use tracing::debug;

use crate::backend::SearchBackend;
use crate::error::SearchError;
use crate::query::{Hit, SearchHits, SearchQuery};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Get,
    Put,
    Post,
    Delete,
}

#[derive(Debug, Clone)]
pub struct ElasticsearchBackend {
    base_url: String,
    authorization: Option<String>,
    timeout: Duration,
}

struct Response {
    status: u16,
    body: Value,
}

impl ElasticsearchBackend {
    pub fn new(base_url: &str) -> Self {
        ElasticsearchBackend {
            base_url: base_url.trim_end_matches('/').to_string(),
            authorization: None,
            timeout: Duration::from_secs(30),
        }
    }

    /// Send HTTP basic credentials with every request.
    pub fn with_basic_auth(mut self, username: &str, password: &str) -> Self {
        let token = base64::engine::general_purpose::STANDARD
            .encode(format!("{username}:{password}"));
        self.authorization = Some(format!("Basic {token}"));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<(String, &'static str)>,
    ) -> Result<Response, SearchError> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let authorization = self.authorization.clone();
        let timeout = self.timeout;
        debug!(?method, %url, "elasticsearch request");

        tokio::task::spawn_blocking(move || {
            let config = ureq::Agent::config_builder()
                .http_status_as_error(false)
                .timeout_global(Some(timeout))
                .build();
            let agent = ureq::Agent::new_with_config(config);
            let result = match (method, body) {
                (Method::Get, _) => authorize(agent.get(&url), &authorization).call(),
                (Method::Delete, _) => authorize(agent.delete(&url), &authorization).call(),
                (Method::Put, Some((payload, content_type))) => {
                    authorize(agent.put(&url), &authorization)
                        .header("Content-Type", content_type)
                        .send(payload.as_bytes())
                }
                (Method::Post, Some((payload, content_type))) => {
                    authorize(agent.post(&url), &authorization)
                        .header("Content-Type", content_type)
                        .send(payload.as_bytes())
                }
                (Method::Put, None) => authorize(agent.put(&url), &authorization).send_empty(),
                (Method::Post, None) => authorize(agent.post(&url), &authorization).send_empty(),
            };
            let response = result.map_err(|e| SearchError::Unavailable(e.to_string()))?;
            let status = response.status().as_u16();
            let text = response
                .into_body()
                .read_to_string()
                .map_err(|e| SearchError::Unavailable(e.to_string()))?;
            let body = if text.trim().is_empty() {
                Value::Null
            } else {
                serde_json::from_str(&text).map_err(|e| SearchError::Serialization(e.to_string()))?
            };
            Ok(Response { status, body })
        })
        .await
        .map_err(|e| SearchError::Unavailable(format!("task join error: {e}")))?
    }

    async fn json(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Response, SearchError> {
        let body = body.map(|b| (b.to_string(), "application/json"));
        self.request(method, path, body).await
    }
}

fn authorize<B>(
    request: ureq::RequestBuilder<B>,
    authorization: &Option<String>,
) -> ureq::RequestBuilder<B> {
    match authorization {
        Some(value) => request.header("Authorization", value),
        None => request,
    }
}

/// Map non-2xx responses to errors.
fn ok(response: Response) -> Result<Value, SearchError> {
    match response.status {
        200..=299 => Ok(response.body),
        404 => Err(SearchError::IndexNotFound(error_reason(&response.body))),
        status => Err(SearchError::Backend {
            status,
            message: error_reason(&response.body),
        }),
    }
}

fn error_reason(body: &Value) -> String {
    body.pointer("/error/reason")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}

/// NDJSON body for the `_bulk` endpoint.
pub(crate) fn bulk_body(index: &str, documents: &[(String, Value)]) -> String {
    let mut out = String::new();
    for (id, doc) in documents {
        out.push_str(&json!({"index": {"_index": index, "_id": id}}).to_string());
        out.push('\n');
        out.push_str(&doc.to_string());
        out.push('\n');
    }
    out
}

#[async_trait]
impl SearchBackend for ElasticsearchBackend {
    async fn create_index(&self, index: &str, mapping: &Value) -> Result<(), SearchError> {
        ok(self.json(Method::Put, index, Some(mapping)).await?).map(|_| ())
    }

    async fn delete_index(&self, index: &str) -> Result<(), SearchError> {
        match ok(self.json(Method::Delete, index, None).await?) {
            Ok(_) | Err(SearchError::IndexNotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn list_indices(&self, prefix: &str) -> Result<Vec<String>, SearchError> {
        let path = format!("_cat/indices/{prefix}*?format=json&h=index");
        let body = match ok(self.json(Method::Get, &path, None).await?) {
            Ok(body) => body,
            Err(SearchError::IndexNotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut names: Vec<String> = body
            .as_array()
            .map(|rows| {
                rows.iter()
                    .filter_map(|r| r.get("index").and_then(Value::as_str))
                    .filter(|name| name.starts_with(prefix))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        Ok(names)
    }

    async fn alias_target(&self, alias: &str) -> Result<Option<String>, SearchError> {
        match ok(self.json(Method::Get, &format!("_alias/{alias}"), None).await?) {
            Ok(body) => Ok(body
                .as_object()
                .and_then(|indices| indices.keys().next().cloned())),
            Err(SearchError::IndexNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn swap_alias(&self, alias: &str, index: &str) -> Result<(), SearchError> {
        let mut actions = Vec::new();
        if let Some(previous) = self.alias_target(alias).await? {
            actions.push(json!({"remove": {"index": previous, "alias": alias}}));
        }
        actions.push(json!({"add": {"index": index, "alias": alias}}));
        let body = json!({"actions": actions});
        ok(self.json(Method::Post, "_aliases", Some(&body)).await?).map(|_| ())
    }

    async fn bulk_put(
        &self,
        index: &str,
        documents: &[(String, Value)],
    ) -> Result<(), SearchError> {
        if documents.is_empty() {
            return Ok(());
        }
        let body = bulk_body(index, documents);
        let response = ok(self
            .request(Method::Post, "_bulk", Some((body, "application/x-ndjson")))
            .await?)?;
        if response.get("errors").and_then(Value::as_bool) == Some(true) {
            let first = response
                .pointer("/items/0/index/error/reason")
                .and_then(Value::as_str)
                .unwrap_or("bulk item failed")
                .to_string();
            return Err(SearchError::Backend {
                status: 400,
                message: first,
            });
        }
        Ok(())
    }

    async fn delete_document(&self, index: &str, id: &str) -> Result<(), SearchError> {
        let path = format!("{index}/_doc/{id}");
        match ok(self.json(Method::Delete, &path, None).await?) {
            Ok(_) | Err(SearchError::IndexNotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn copy_documents(&self, from: &str, to: &str) -> Result<(), SearchError> {
        let body = json!({"source": {"index": from}, "dest": {"index": to}});
        ok(self
            .json(Method::Post, "_reindex?refresh=true", Some(&body))
            .await?)
        .map(|_| ())
    }

    async fn refresh(&self, index: &str) -> Result<(), SearchError> {
        ok(self
            .json(Method::Post, &format!("{index}/_refresh"), None)
            .await?)
        .map(|_| ())
    }

    async fn search(
        &self,
        targets: &[String],
        query: &SearchQuery,
    ) -> Result<SearchHits, SearchError> {
        let path = format!(
            "{}/_search?ignore_unavailable=true&allow_no_indices=true",
            targets.join(",")
        );
        let body = ok(self
            .json(Method::Post, &path, Some(&query.to_es_body()))
            .await?)?;
        Ok(parse_hits(&body))
    }
}

pub(crate) fn parse_hits(body: &Value) -> SearchHits {
    let total = body
        .pointer("/hits/total/value")
        .and_then(Value::as_u64)
        .unwrap_or(0) as usize;
    let hits = body
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|h| Hit {
                    id: h.get("_id").and_then(Value::as_str).unwrap_or("").to_string(),
                    score: h.get("_score").and_then(Value::as_f64).unwrap_or(0.0),
                    source: h.get("_source").cloned().unwrap_or(Value::Null),
                })
                .collect()
        })
        .unwrap_or_default();
    SearchHits { total, hits }
}
