//! Keeps the search index in step with the Public documents of the store.
//!
//! The workflow reports publications and withdrawals through
//! [`PublicIndex`]; index failures never reach the caller. They are
//! logged and queued for `retry-index`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use qcat_core::Registry;
use qcat_search::{
    project, Author, CancellationFlag, LinkedSummary, RebuildReport, SearchBackend, SearchError,
    SearchIndexer, SearchQuery,
};
use qcat_storage::{AnswerStore, DocumentFilter, DocumentRecord, DocumentStatus, Role};
use serde::Serialize;
use serde_json::Value as Json;
use tracing::{error, info, warn};

use crate::error::QcatError;
use crate::links::LinkResolver;
use crate::viewer::Viewer;

/// Receiver of changes to the set of Public documents.
#[async_trait]
pub trait PublicIndex: Send + Sync {
    /// `doc` became Public, replacing `retired` if there was one.
    async fn published(&self, doc: &DocumentRecord, retired: Option<&DocumentRecord>);

    /// `doc` is no longer Public.
    async fn withdrawn(&self, doc: &DocumentRecord);

    /// Re-project Public documents whose linked set changed.
    async fn refreshed(&self, docs: &[DocumentRecord]);
}

/// A `PublicIndex` that ignores every change.
pub struct NoIndex;

#[async_trait]
impl PublicIndex for NoIndex {
    async fn published(&self, _doc: &DocumentRecord, _retired: Option<&DocumentRecord>) {}

    async fn withdrawn(&self, _doc: &DocumentRecord) {}

    async fn refreshed(&self, _docs: &[DocumentRecord]) {}
}

/// Index ids that disagree with the store for one configuration code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub code: String,
    /// Public in the store, absent from the index.
    pub missing: Vec<String>,
    /// In the index, not Public in the store.
    pub stale: Vec<String>,
}

impl SyncReport {
    pub fn in_sync(&self) -> bool {
        self.missing.is_empty() && self.stale.is_empty()
    }
}

pub struct SearchSync<S: AnswerStore, B: SearchBackend> {
    store: Arc<S>,
    registry: Arc<Registry>,
    indexer: Arc<SearchIndexer<B>>,
    links: LinkResolver<S>,
}

impl<S: AnswerStore, B: SearchBackend> SearchSync<S, B> {
    pub fn new(store: Arc<S>, registry: Arc<Registry>, indexer: Arc<SearchIndexer<B>>) -> Self {
        let links = LinkResolver::new(store.clone(), registry.clone());
        SearchSync {
            store,
            registry,
            indexer,
            links,
        }
    }

    pub fn indexer(&self) -> &Arc<SearchIndexer<B>> {
        &self.indexer
    }

    async fn authors(&self, doc: &DocumentRecord) -> Result<Vec<Author>, QcatError> {
        let mut authors = Vec::new();
        for membership in self.store.memberships(&doc.id).await? {
            if !matches!(membership.role, Role::Compiler | Role::Editor) {
                continue;
            }
            let name = match self.store.get_user(membership.user_id).await? {
                Some(user) => user.display_name(),
                None => format!("user {}", membership.user_id),
            };
            authors.push(Author {
                id: membership.user_id,
                name,
                role: membership.role,
            });
        }
        Ok(authors)
    }

    /// Index document for a Public `doc`.
    pub async fn projection(&self, doc: &DocumentRecord) -> Result<Json, QcatError> {
        let config = self.registry.resolve_ref(&doc.configuration)?;
        let authors = self.authors(doc).await?;
        let linked: Vec<LinkedSummary> = self
            .links
            .linked(doc, &Viewer::anonymous())
            .await?
            .into_iter()
            .map(|l| LinkedSummary {
                identifier: l.identifier,
                configuration: l.configuration,
                name: l.name,
            })
            .collect();
        Ok(project(doc, &config, &authors, &linked))
    }

    async fn put(&self, doc: &DocumentRecord) {
        let config = match self.registry.resolve_ref(&doc.configuration) {
            Ok(config) => config,
            Err(e) => {
                error!(identifier = %doc.identifier, error = %e, "cannot index document");
                return;
            }
        };
        if let Err(e) = self.indexer.ensure_alias(&config).await {
            warn!(code = %config.code, error = %e, "alias check failed");
        }
        match self.projection(doc).await {
            Ok(projected) => {
                self.indexer
                    .put_or_enqueue(&doc.configuration.code, &doc.id, projected)
                    .await;
            }
            Err(e) => {
                let out_of_sync = QcatError::IndexOutOfSync(format!("{}: {}", doc.identifier, e));
                error!(identifier = %doc.identifier, error = %out_of_sync, "projection failed");
            }
        }
    }

    async fn linked_public(&self, doc: &DocumentRecord) -> Vec<DocumentRecord> {
        let linked = match self.links.linked(doc, &Viewer::anonymous()).await {
            Ok(linked) => linked,
            Err(e) => {
                warn!(identifier = %doc.identifier, error = %e, "linked documents unavailable");
                return Vec::new();
            }
        };
        let mut out = Vec::new();
        for l in linked {
            if let Ok(target) = self.store.get_document(&l.document_id).await {
                out.push(target);
            }
        }
        out
    }

    /// Rebuild the alias of `code` from the Public documents in the store.
    pub async fn rebuild(
        &self,
        code: &str,
        cancel: &CancellationFlag,
    ) -> Result<RebuildReport, QcatError> {
        let config = self.registry.active(code)?;
        let filter = DocumentFilter {
            configuration_code: Some(code.to_string()),
            statuses: vec![DocumentStatus::Public],
            ..DocumentFilter::default()
        };
        let mut documents = Vec::new();
        let mut listed = BTreeMap::new();
        for doc in self.store.list_documents(&filter).await? {
            documents.push((doc.id.clone(), self.projection(&doc).await?));
            listed.insert(doc.id.clone(), doc.updated.clone());
        }
        let mut report = self.indexer.rebuild(&config, &documents, cancel).await?;
        let caught_up = self.catch_up(code, &filter, &listed).await?;
        if caught_up > 0 {
            report
                .log
                .push(format!("caught up {caught_up} documents changed during the rebuild"));
        }
        Ok(report)
    }

    /// Writes made while a rebuild ran went to the index it replaced.
    /// Re-apply every change to the Public set since `listed` was read.
    async fn catch_up(
        &self,
        code: &str,
        filter: &DocumentFilter,
        listed: &BTreeMap<String, String>,
    ) -> Result<usize, QcatError> {
        let mut changed = 0;
        let mut current = BTreeSet::new();
        for doc in self.store.list_documents(filter).await? {
            current.insert(doc.id.clone());
            if listed.get(&doc.id) != Some(&doc.updated) {
                self.put(&doc).await;
                changed += 1;
            }
        }
        for id in listed.keys().filter(|id| !current.contains(*id)) {
            self.indexer.delete_or_enqueue(code, id).await;
            changed += 1;
        }
        if changed > 0 {
            info!(%code, changed, "rebuild caught up with concurrent changes");
        }
        Ok(changed)
    }

    /// Compare the Public ids of `code` with the ids in its alias.
    pub async fn check(&self, code: &str) -> Result<SyncReport, QcatError> {
        let filter = DocumentFilter {
            configuration_code: Some(code.to_string()),
            statuses: vec![DocumentStatus::Public],
            ..DocumentFilter::default()
        };
        let public: BTreeSet<String> = self
            .store
            .list_documents(&filter)
            .await?
            .into_iter()
            .map(|d| d.id)
            .collect();
        let indexed = self.indexed_ids(code).await?;
        Ok(SyncReport {
            code: code.to_string(),
            missing: public.difference(&indexed).cloned().collect(),
            stale: indexed.difference(&public).cloned().collect(),
        })
    }

    async fn indexed_ids(&self, code: &str) -> Result<BTreeSet<String>, SearchError> {
        const PAGE: usize = 1000;
        let targets = [self.indexer.alias(code)];
        let mut ids = BTreeSet::new();
        let mut from = 0;
        loop {
            let query = SearchQuery {
                from,
                ..SearchQuery::match_all(PAGE)
            };
            let hits = self.indexer.backend().search(&targets, &query).await?;
            let fetched = hits.hits.len();
            ids.extend(hits.hits.into_iter().map(|h| h.id));
            from += fetched;
            if fetched < PAGE || from >= hits.total {
                break;
            }
        }
        Ok(ids)
    }

    /// Re-index what `check` found out of step.
    pub async fn repair(&self, report: &SyncReport) -> Result<usize, QcatError> {
        let mut fixed = 0;
        for id in &report.missing {
            let doc = self.store.get_document(id).await?;
            self.put(&doc).await;
            fixed += 1;
        }
        for id in &report.stale {
            if self.indexer.delete_or_enqueue(&report.code, id).await {
                fixed += 1;
            }
        }
        if fixed > 0 {
            info!(code = %report.code, fixed, "index repaired");
        }
        Ok(fixed)
    }
}

#[async_trait]
impl<S: AnswerStore, B: SearchBackend> PublicIndex for SearchSync<S, B> {
    async fn published(&self, doc: &DocumentRecord, retired: Option<&DocumentRecord>) {
        if let Some(old) = retired {
            self.indexer
                .delete_or_enqueue(&old.configuration.code, &old.id)
                .await;
        }
        self.put(doc).await;
        for other in self.linked_public(doc).await {
            self.put(&other).await;
        }
    }

    async fn withdrawn(&self, doc: &DocumentRecord) {
        self.indexer
            .delete_or_enqueue(&doc.configuration.code, &doc.id)
            .await;
    }

    async fn refreshed(&self, docs: &[DocumentRecord]) {
        for doc in docs.iter().filter(|d| d.status == DocumentStatus::Public) {
            self.put(doc).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qcat_core::{DomainTables, FeatureToggles};
    use qcat_search::{IndexSettings, MemorySearchBackend};
    use qcat_storage::conformance::make_document;
    use qcat_storage::{MembershipRecord, MemoryStore, UserRecord};
    use serde_json::json;
    use std::path::Path;

    fn registry() -> Arc<Registry> {
        let registry = Registry::new(DomainTables::bundled(), FeatureToggles::default());
        registry
            .load_dir(&Path::new(env!("CARGO_MANIFEST_DIR")).join("../../configurations"))
            .unwrap();
        Arc::new(registry)
    }

    fn public(id: &str, identifier: &str) -> DocumentRecord {
        let mut doc = make_document(id, identifier, 1);
        doc.status = DocumentStatus::Public;
        doc.payload = json!({"qg_name": [{"name": {"en": identifier}}]});
        doc
    }

    async fn fixture() -> (Arc<MemoryStore>, Arc<MemorySearchBackend>, SearchSync<MemoryStore, MemorySearchBackend>) {
        let store = Arc::new(MemoryStore::new());
        let backend = Arc::new(MemorySearchBackend::new());
        let indexer = Arc::new(SearchIndexer::new(backend.clone(), IndexSettings::default()));
        let sync = SearchSync::new(store.clone(), registry(), indexer);
        (store, backend, sync)
    }

    #[tokio::test]
    async fn publishing_replaces_the_retired_version() {
        let (store, backend, sync) = fixture().await;
        let old = public("old", "sample_1");
        let new = public("new", "sample_1");
        let mut snap = store.begin_snapshot().await.unwrap();
        store.insert_document(&mut snap, new.clone()).await.unwrap();
        store
            .put_membership(
                &mut snap,
                MembershipRecord {
                    document_id: "new".to_string(),
                    user_id: 1,
                    role: Role::Compiler,
                },
            )
            .await
            .unwrap();
        store.commit_snapshot(snap).await.unwrap();
        store
            .put_user(UserRecord {
                id: 1,
                email: "a@example.org".to_string(),
                first_name: "Ada".to_string(),
                last_name: "Lovelace".to_string(),
                permissions: Vec::new(),
                updated: "2025-01-01T00:00:00.000000Z".to_string(),
            })
            .await
            .unwrap();

        sync.published(&old, None).await;
        sync.published(&new, Some(&old)).await;
        let ids = backend.document_ids("qcat_sample").await;
        assert_eq!(ids, vec!["new".to_string()]);

        let projected = sync.projection(&new).await.unwrap();
        assert_eq!(projected["authors"][0]["name"], "Ada Lovelace");
    }

    #[tokio::test]
    async fn failed_writes_are_queued_not_raised() {
        let (_store, backend, sync) = fixture().await;
        backend.set_unavailable(true);
        sync.published(&public("a", "sample_1"), None).await;
        assert_eq!(sync.indexer().retry_queue().len(), 1);
        backend.set_unavailable(false);
        let config = registry().resolve("sample", "2015").unwrap();
        sync.indexer().ensure_alias(&config).await.unwrap();
        let report = sync.indexer().retry_pending().await;
        assert_eq!(report.succeeded, 1);
        assert_eq!(backend.document_ids("qcat_sample").await, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn check_and_repair_match_the_store() {
        let (store, _backend, sync) = fixture().await;
        let doc = public("a", "sample_1");
        let mut snap = store.begin_snapshot().await.unwrap();
        store.insert_document(&mut snap, doc.clone()).await.unwrap();
        store.commit_snapshot(snap).await.unwrap();
        let config = registry().resolve("sample", "2015").unwrap();
        sync.indexer().create_or_update(&config).await.unwrap();
        sync.indexer()
            .put("sample", &[("ghost".to_string(), json!({"id": "ghost"}))])
            .await
            .unwrap();

        let report = sync.check("sample").await.unwrap();
        assert_eq!(report.missing, vec!["a".to_string()]);
        assert_eq!(report.stale, vec!["ghost".to_string()]);
        assert_eq!(sync.repair(&report).await.unwrap(), 2);
        assert!(sync.check("sample").await.unwrap().in_sync());
    }

    /// Publishes `late` into the store as soon as the rebuild creates its
    /// new index, after the document list has been read.
    struct PublishDuringRebuild {
        inner: MemorySearchBackend,
        store: Arc<MemoryStore>,
        late: std::sync::Mutex<Option<DocumentRecord>>,
    }

    #[async_trait]
    impl SearchBackend for PublishDuringRebuild {
        async fn create_index(&self, index: &str, mapping: &Json) -> Result<(), SearchError> {
            self.inner.create_index(index, mapping).await?;
            let late = self.late.lock().unwrap().take();
            if let Some(doc) = late {
                let mut snap = self.store.begin_snapshot().await.unwrap();
                self.store.insert_document(&mut snap, doc).await.unwrap();
                self.store.commit_snapshot(snap).await.unwrap();
            }
            Ok(())
        }
        async fn delete_index(&self, index: &str) -> Result<(), SearchError> {
            self.inner.delete_index(index).await
        }
        async fn list_indices(&self, prefix: &str) -> Result<Vec<String>, SearchError> {
            self.inner.list_indices(prefix).await
        }
        async fn alias_target(&self, alias: &str) -> Result<Option<String>, SearchError> {
            self.inner.alias_target(alias).await
        }
        async fn swap_alias(&self, alias: &str, index: &str) -> Result<(), SearchError> {
            self.inner.swap_alias(alias, index).await
        }
        async fn bulk_put(&self, index: &str, documents: &[(String, Json)]) -> Result<(), SearchError> {
            self.inner.bulk_put(index, documents).await
        }
        async fn delete_document(&self, index: &str, id: &str) -> Result<(), SearchError> {
            self.inner.delete_document(index, id).await
        }
        async fn copy_documents(&self, from: &str, to: &str) -> Result<(), SearchError> {
            self.inner.copy_documents(from, to).await
        }
        async fn refresh(&self, index: &str) -> Result<(), SearchError> {
            self.inner.refresh(index).await
        }
        async fn search(
            &self,
            targets: &[String],
            query: &SearchQuery,
        ) -> Result<qcat_search::SearchHits, SearchError> {
            self.inner.search(targets, query).await
        }
    }

    #[tokio::test]
    async fn rebuild_keeps_documents_published_while_it_ran() {
        let store = Arc::new(MemoryStore::new());
        let early = public("early", "sample_1");
        let mut snap = store.begin_snapshot().await.unwrap();
        store.insert_document(&mut snap, early).await.unwrap();
        store.commit_snapshot(snap).await.unwrap();

        let backend = Arc::new(PublishDuringRebuild {
            inner: MemorySearchBackend::new(),
            store: store.clone(),
            late: std::sync::Mutex::new(Some(public("late", "sample_2"))),
        });
        let indexer = Arc::new(SearchIndexer::new(backend.clone(), IndexSettings::default()));
        let sync = SearchSync::new(store.clone(), registry(), indexer);

        let report = sync.rebuild("sample", &CancellationFlag::new()).await.unwrap();
        assert_eq!(report.documents, 1);
        assert!(report.log.iter().any(|l| l.starts_with("caught up 1 ")));
        assert_eq!(
            backend.inner.document_ids("qcat_sample").await,
            vec!["early".to_string(), "late".to_string()]
        );
        assert!(sync.check("sample").await.unwrap().in_sync());
    }
}
