//! Search Synchroniser: per-configuration aliases over numbered indices.
//!
//! Readers always query the alias `<prefix><code>`. Rebuilds and mapping
//! updates write into a fresh `<alias>_<n>` index and swap the alias in one
//! step, so serving never sees a half-filled index.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use qcat_core::Configuration;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::backend::SearchBackend;
use crate::error::SearchError;
use crate::mapping::{build_mapping, Analyzers};
use crate::retry::{IndexRetryQueue, RetryItem, RetryOp};

/// Cooperative cancellation checked between rebuild batches.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        CancellationFlag::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct IndexSettings {
    /// Prefix shared by every alias and index (test vs production).
    pub prefix: String,
    pub languages: Vec<String>,
    pub analyzers: Analyzers,
    pub batch_size: usize,
}

impl Default for IndexSettings {
    fn default() -> Self {
        IndexSettings {
            prefix: "qcat_".to_string(),
            languages: vec!["en".to_string(), "es".to_string(), "fr".to_string()],
            analyzers: Analyzers::builtin(),
            batch_size: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RebuildReport {
    pub index: String,
    pub documents: usize,
    pub batches: usize,
    /// Human-readable progress lines.
    pub log: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RetryReport {
    pub succeeded: usize,
    pub failed: usize,
}

pub struct SearchIndexer<B: SearchBackend> {
    backend: Arc<B>,
    settings: IndexSettings,
    retry: IndexRetryQueue,
}

impl<B: SearchBackend> SearchIndexer<B> {
    pub fn new(backend: Arc<B>, settings: IndexSettings) -> Self {
        SearchIndexer {
            backend,
            settings,
            retry: IndexRetryQueue::new(),
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn settings(&self) -> &IndexSettings {
        &self.settings
    }

    pub fn retry_queue(&self) -> &IndexRetryQueue {
        &self.retry
    }

    pub fn alias(&self, code: &str) -> String {
        format!("{}{}", self.settings.prefix, code)
    }

    fn mapping(&self, config: &Configuration) -> Value {
        build_mapping(config, &self.settings.languages, &self.settings.analyzers)
    }

    async fn next_index(&self, alias: &str) -> Result<String, SearchError> {
        let stem = format!("{alias}_");
        let highest = self
            .backend
            .list_indices(&stem)
            .await?
            .iter()
            .filter_map(|name| name[stem.len()..].parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        Ok(format!("{stem}{}", highest + 1))
    }

    /// Create the alias with a first index, or move it to a fresh index
    /// carrying the current mapping and documents. Returns the index the
    /// alias now points at.
    pub async fn create_or_update(&self, config: &Configuration) -> Result<String, SearchError> {
        let alias = self.alias(&config.code);
        let index = self.next_index(&alias).await?;
        self.backend.create_index(&index, &self.mapping(config)).await?;
        let previous = self.backend.alias_target(&alias).await?;
        if let Some(old) = &previous {
            self.backend.copy_documents(old, &index).await?;
        }
        self.backend.refresh(&index).await?;
        self.backend.swap_alias(&alias, &index).await?;
        if let Some(old) = previous {
            self.backend.delete_index(&old).await?;
        }
        info!(code = %config.code, %index, "search alias updated");
        Ok(index)
    }

    /// Make sure the alias for `config` exists.
    pub async fn ensure_alias(&self, config: &Configuration) -> Result<(), SearchError> {
        if self.backend.alias_target(&self.alias(&config.code)).await?.is_none() {
            self.create_or_update(config).await?;
        }
        Ok(())
    }

    /// Bulk upsert projection documents keyed by internal id.
    pub async fn put(&self, code: &str, documents: &[(String, Value)]) -> Result<(), SearchError> {
        let alias = self.alias(code);
        self.backend.bulk_put(&alias, documents).await?;
        self.backend.refresh(&alias).await
    }

    pub async fn delete(&self, code: &str, id: &str) -> Result<(), SearchError> {
        let alias = self.alias(code);
        self.backend.delete_document(&alias, id).await?;
        self.backend.refresh(&alias).await
    }

    /// `put` that never fails: errors are logged and queued for retry.
    pub async fn put_or_enqueue(&self, code: &str, id: &str, document: Value) -> bool {
        match self.put(code, &[(id.to_string(), document.clone())]).await {
            Ok(()) => true,
            Err(e) => {
                error!(%code, document_id = %id, error = %e, "index put failed, queued for retry");
                self.retry.enqueue(RetryItem {
                    code: code.to_string(),
                    id: id.to_string(),
                    op: RetryOp::Put(document),
                });
                false
            }
        }
    }

    /// `delete` that never fails: errors are logged and queued for retry.
    pub async fn delete_or_enqueue(&self, code: &str, id: &str) -> bool {
        match self.delete(code, id).await {
            Ok(()) => true,
            Err(e) => {
                error!(%code, document_id = %id, error = %e, "index delete failed, queued for retry");
                self.retry.enqueue(RetryItem {
                    code: code.to_string(),
                    id: id.to_string(),
                    op: RetryOp::Delete,
                });
                false
            }
        }
    }

    /// Replay queued writes; failures go back into the queue.
    pub async fn retry_pending(&self) -> RetryReport {
        let mut report = RetryReport::default();
        for item in self.retry.drain() {
            let ok = match &item.op {
                RetryOp::Put(doc) => self.put_or_enqueue(&item.code, &item.id, doc.clone()).await,
                RetryOp::Delete => self.delete_or_enqueue(&item.code, &item.id).await,
            };
            if ok {
                report.succeeded += 1;
            } else {
                report.failed += 1;
            }
        }
        report
    }

    /// Drop every index under the configured prefix.
    pub async fn delete_all(&self) -> Result<Vec<String>, SearchError> {
        let indices = self.backend.list_indices(&self.settings.prefix).await?;
        for index in &indices {
            self.backend.delete_index(index).await?;
        }
        warn!(prefix = %self.settings.prefix, count = indices.len(), "search indices deleted");
        Ok(indices)
    }

    /// Rebuild the alias for `config` from `documents` into a fresh index.
    ///
    /// `cancel` is checked between batches. On cancellation the new index
    /// is deleted and the alias keeps pointing at the previous index.
    pub async fn rebuild(
        &self,
        config: &Configuration,
        documents: &[(String, Value)],
        cancel: &CancellationFlag,
    ) -> Result<RebuildReport, SearchError> {
        let alias = self.alias(&config.code);
        let index = self.next_index(&alias).await?;
        self.backend.create_index(&index, &self.mapping(config)).await?;
        let mut log = vec![format!("created index {index}")];

        let batch_size = self.settings.batch_size.max(1);
        let mut batches = 0;
        for batch in documents.chunks(batch_size) {
            if cancel.is_cancelled() {
                return self.abandon(&index).await;
            }
            if let Err(e) = self.backend.bulk_put(&index, batch).await {
                let _ = self.backend.delete_index(&index).await;
                return Err(e);
            }
            batches += 1;
            log.push(format!("indexed batch {batches} ({} documents)", batch.len()));
        }
        if cancel.is_cancelled() {
            return self.abandon(&index).await;
        }

        self.backend.refresh(&index).await?;
        let previous = self.backend.alias_target(&alias).await?;
        self.backend.swap_alias(&alias, &index).await?;
        log.push(format!("alias {alias} now points at {index}"));
        if let Some(old) = previous.filter(|old| old != &index) {
            self.backend.delete_index(&old).await?;
            log.push(format!("deleted index {old}"));
        }
        info!(code = %config.code, %index, documents = documents.len(), "rebuild finished");
        Ok(RebuildReport {
            index,
            documents: documents.len(),
            batches,
            log,
        })
    }

    async fn abandon(&self, index: &str) -> Result<RebuildReport, SearchError> {
        warn!(%index, "rebuild cancelled");
        self.backend.delete_index(index).await?;
        Err(SearchError::Cancelled)
    }

    /// Index each alias currently points at.
    pub async fn aliases(
        &self,
        codes: &[String],
    ) -> Result<BTreeMap<String, Option<String>>, SearchError> {
        let mut out = BTreeMap::new();
        for code in codes {
            let alias = self.alias(code);
            out.insert(alias.clone(), self.backend.alias_target(&alias).await?);
        }
        Ok(out)
    }
}
