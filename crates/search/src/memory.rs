//! In-process [`SearchBackend`] used by tests and single-node deployments.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::backend::SearchBackend;
use crate::error::SearchError;
use crate::query::{Filter, Hit, SearchHits, SearchQuery, Sort};

#[derive(Debug, Default)]
struct MemoryIndex {
    mapping: Value,
    documents: BTreeMap<String, Value>,
}

#[derive(Debug, Default)]
struct State {
    indices: BTreeMap<String, MemoryIndex>,
    aliases: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
pub struct MemorySearchBackend {
    state: RwLock<State>,
    unavailable: AtomicBool,
}

impl MemorySearchBackend {
    pub fn new() -> Self {
        MemorySearchBackend::default()
    }

    /// Make every call fail with `Unavailable` until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Mapping an index was created with.
    pub async fn mapping(&self, index: &str) -> Option<Value> {
        self.state
            .read()
            .await
            .indices
            .get(index)
            .map(|i| i.mapping.clone())
    }

    /// Ids stored in the index an alias or index name resolves to.
    pub async fn document_ids(&self, target: &str) -> Vec<String> {
        let state = self.state.read().await;
        let index = state.aliases.get(target).map(String::as_str).unwrap_or(target);
        state
            .indices
            .get(index)
            .map(|i| i.documents.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn check(&self) -> Result<(), SearchError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(SearchError::Unavailable("memory backend switched off".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Every value at a dotted path, flattening arrays along the way.
fn values_at<'a>(value: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut current = vec![value];
    for segment in path.split('.') {
        let mut next = Vec::new();
        for v in current {
            flatten_into(v.get(segment), &mut next);
        }
        current = next;
    }
    let mut out = Vec::new();
    for v in current {
        flatten_into(Some(v), &mut out);
    }
    out
}

fn flatten_into<'a>(value: Option<&'a Value>, out: &mut Vec<&'a Value>) {
    match value {
        Some(Value::Array(items)) => items.iter().for_each(|i| flatten_into(Some(i), out)),
        Some(Value::Null) | None => {}
        Some(v) => out.push(v),
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn matches_filter(doc: &Value, filter: &Filter) -> bool {
    match filter {
        Filter::Terms { field, values } => values_at(doc, field)
            .into_iter()
            .filter_map(scalar_string)
            .any(|v| values.contains(&v)),
        Filter::Range { field, gte, lte } => values_at(doc, field)
            .into_iter()
            .filter_map(scalar_string)
            .any(|v| {
                gte.as_ref().map_or(true, |g| v.as_str() >= g.as_str())
                    && lte.as_ref().map_or(true, |l| v.as_str() <= l.as_str())
            }),
    }
}

fn text_score(doc: &Value, query: &SearchQuery, text: &str) -> f64 {
    let tokens: Vec<String> = text.split_whitespace().map(str::to_lowercase).collect();
    let mut score = 0.0;
    for field in &query.text_fields {
        for value in values_at(doc, &field.field) {
            let Some(s) = value.as_str() else { continue };
            let haystack = s.to_lowercase();
            for token in &tokens {
                if haystack.contains(token.as_str()) {
                    score += field.boost;
                }
            }
        }
    }
    score
}

#[async_trait]
impl SearchBackend for MemorySearchBackend {
    async fn create_index(&self, index: &str, mapping: &Value) -> Result<(), SearchError> {
        self.check()?;
        let mut state = self.state.write().await;
        if state.indices.contains_key(index) {
            return Err(SearchError::Backend {
                status: 400,
                message: format!("index {index} already exists"),
            });
        }
        state.indices.insert(
            index.to_string(),
            MemoryIndex {
                mapping: mapping.clone(),
                documents: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> Result<(), SearchError> {
        self.check()?;
        let mut state = self.state.write().await;
        state.indices.remove(index);
        state.aliases.retain(|_, target| target != index);
        Ok(())
    }

    async fn list_indices(&self, prefix: &str) -> Result<Vec<String>, SearchError> {
        self.check()?;
        Ok(self
            .state
            .read()
            .await
            .indices
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn alias_target(&self, alias: &str) -> Result<Option<String>, SearchError> {
        self.check()?;
        Ok(self.state.read().await.aliases.get(alias).cloned())
    }

    async fn swap_alias(&self, alias: &str, index: &str) -> Result<(), SearchError> {
        self.check()?;
        let mut state = self.state.write().await;
        if !state.indices.contains_key(index) {
            return Err(SearchError::IndexNotFound(index.to_string()));
        }
        state.aliases.insert(alias.to_string(), index.to_string());
        Ok(())
    }

    async fn bulk_put(
        &self,
        index: &str,
        documents: &[(String, Value)],
    ) -> Result<(), SearchError> {
        self.check()?;
        let mut state = self.state.write().await;
        let target = state.aliases.get(index).cloned().unwrap_or_else(|| index.to_string());
        let idx = state
            .indices
            .get_mut(&target)
            .ok_or_else(|| SearchError::IndexNotFound(target.clone()))?;
        for (id, doc) in documents {
            idx.documents.insert(id.clone(), doc.clone());
        }
        Ok(())
    }

    async fn delete_document(&self, index: &str, id: &str) -> Result<(), SearchError> {
        self.check()?;
        let mut state = self.state.write().await;
        let target = state.aliases.get(index).cloned().unwrap_or_else(|| index.to_string());
        if let Some(idx) = state.indices.get_mut(&target) {
            idx.documents.remove(id);
        }
        Ok(())
    }

    async fn copy_documents(&self, from: &str, to: &str) -> Result<(), SearchError> {
        self.check()?;
        let mut state = self.state.write().await;
        let documents = state
            .indices
            .get(from)
            .ok_or_else(|| SearchError::IndexNotFound(from.to_string()))?
            .documents
            .clone();
        state
            .indices
            .get_mut(to)
            .ok_or_else(|| SearchError::IndexNotFound(to.to_string()))?
            .documents
            .extend(documents);
        Ok(())
    }

    async fn refresh(&self, _index: &str) -> Result<(), SearchError> {
        self.check()
    }

    async fn search(
        &self,
        targets: &[String],
        query: &SearchQuery,
    ) -> Result<SearchHits, SearchError> {
        self.check()?;
        let state = self.state.read().await;
        let indices: BTreeSet<&str> = targets
            .iter()
            .map(|t| state.aliases.get(t).map(String::as_str).unwrap_or(t.as_str()))
            .filter(|name| state.indices.contains_key(*name))
            .collect();

        let text = query.text();
        let mut hits: Vec<Hit> = Vec::new();
        for name in indices {
            let Some(index) = state.indices.get(name) else { continue };
            for (id, doc) in &index.documents {
                if !query.filters.iter().all(|f| matches_filter(doc, f)) {
                    continue;
                }
                let score = match text {
                    Some(t) => text_score(doc, query, t),
                    None => 1.0,
                };
                if score > 0.0 {
                    hits.push(Hit {
                        id: id.clone(),
                        score,
                        source: doc.clone(),
                    });
                }
            }
        }

        let by_updated = |a: &Hit, b: &Hit| {
            let ua = a.source.get("updated").and_then(Value::as_str).unwrap_or("");
            let ub = b.source.get("updated").and_then(Value::as_str).unwrap_or("");
            ub.cmp(ua).then_with(|| a.id.cmp(&b.id))
        };
        match (query.sort, text.is_some()) {
            (Sort::Score, true) => hits.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| by_updated(a, b))
            }),
            _ => hits.sort_by(by_updated),
        }

        let total = hits.len();
        let hits = hits.into_iter().skip(query.from).take(query.size).collect();
        Ok(SearchHits { total, hits })
    }
}
