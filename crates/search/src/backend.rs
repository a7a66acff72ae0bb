use async_trait::async_trait;
use serde_json::Value;

use crate::error::SearchError;
use crate::query::{SearchHits, SearchQuery};

/// Index operations the Search Synchroniser and Query Service need.
///
/// Indices are concrete, numbered stores; aliases are stable names that
/// point at exactly one index. Readers always go through the alias.
#[async_trait]
pub trait SearchBackend: Send + Sync + 'static {
    async fn create_index(&self, index: &str, mapping: &Value) -> Result<(), SearchError>;

    /// Deleting an absent index is not an error.
    async fn delete_index(&self, index: &str) -> Result<(), SearchError>;

    /// Indices whose name starts with `prefix`, sorted.
    async fn list_indices(&self, prefix: &str) -> Result<Vec<String>, SearchError>;

    /// Index the alias currently points at.
    async fn alias_target(&self, alias: &str) -> Result<Option<String>, SearchError>;

    /// Point `alias` at `index`, detaching it from its previous index in the
    /// same atomic step.
    async fn swap_alias(&self, alias: &str, index: &str) -> Result<(), SearchError>;

    /// Upsert `(id, document)` pairs.
    async fn bulk_put(&self, index: &str, documents: &[(String, Value)])
        -> Result<(), SearchError>;

    /// Deleting an absent document is not an error.
    async fn delete_document(&self, index: &str, id: &str) -> Result<(), SearchError>;

    /// Copy every document of `from` into `to`.
    async fn copy_documents(&self, from: &str, to: &str) -> Result<(), SearchError>;

    async fn refresh(&self, index: &str) -> Result<(), SearchError>;

    /// Run `query` across indices or aliases; unknown names are ignored.
    async fn search(&self, targets: &[String], query: &SearchQuery)
        -> Result<SearchHits, SearchError>;
}
