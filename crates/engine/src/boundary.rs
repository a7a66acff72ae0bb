//! Access Boundary: the surface the web layer and the CLI talk to.
//!
//! Every method resolves the viewer's roles on the document and consults
//! the role-gate table before delegating to the workflow, the form
//! engine, the link resolver or the search services.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use qcat_core::{localized, ConfigurationRef, Registry};
use qcat_search::{IndexSettings, ListPage, ListQuery, QueryService, SearchBackend, SearchIndexer};
use qcat_storage::{AnswerStore, BlobRecord, DocumentFilter, DocumentRecord, DocumentStatus, Role, UserId};
use serde::Serialize;
use serde_json::Value as Json;
use tracing::debug;

use crate::blobs::BlobRegistry;
use crate::clock::Clock;
use crate::directory::{DirectoryClient, Session, UserCandidate, UserDirectory};
use crate::error::QcatError;
use crate::events::{Event, EventBus};
use crate::form::{document_progress, render, FormDescriptor, Progress, RenderContext};
use crate::links::{overlay_links, LinkCandidate, LinkedDocument};
use crate::settings::EngineSettings;
use crate::sync::{PublicIndex, SearchSync};
use crate::viewer::{Permission, Viewer};
use crate::workflow::{
    can_view, check_edit, check_transition, roles_of, select, EditLock, MembershipChange,
    ReviewAction, Selector, StepCommit, StepInput, Workflow,
};

/// One row of a store-served listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentSummary {
    pub id: String,
    pub identifier: String,
    pub configuration: ConfigurationRef,
    pub version: u32,
    pub status: DocumentStatus,
    pub name: String,
    pub updated: String,
    pub roles: Vec<Role>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Member {
    pub user_id: UserId,
    pub name: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryView {
    pub keyword: String,
    pub label: String,
    pub progress: Progress,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionInfo {
    pub id: String,
    pub version: u32,
    pub status: DocumentStatus,
}

/// A document as one viewer may see it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentView {
    pub summary: DocumentSummary,
    pub original_language: String,
    pub translations: Vec<String>,
    pub payload: Json,
    pub categories: Vec<CategoryView>,
    pub linked: Vec<LinkedDocument>,
    pub members: Vec<Member>,
    pub can_edit: bool,
    pub actions: Vec<ReviewAction>,
    pub versions: Vec<VersionInfo>,
    pub locked_by: Option<UserId>,
}

/// Everything the boundary is built from.
pub struct BoundaryParts<S: AnswerStore, B: SearchBackend> {
    pub store: Arc<S>,
    pub registry: Arc<Registry>,
    pub search: Arc<B>,
    pub index: IndexSettings,
    pub directory: Arc<dyn UserDirectory>,
    pub clock: Arc<dyn Clock>,
    pub settings: EngineSettings,
    /// Where uploaded bytes are written; `None` keeps metadata only.
    pub blob_root: Option<PathBuf>,
}

pub struct AccessBoundary<S: AnswerStore, B: SearchBackend> {
    pub(crate) store: Arc<S>,
    pub(crate) registry: Arc<Registry>,
    pub(crate) workflow: Workflow<S>,
    pub(crate) query: QueryService<B>,
    pub(crate) sync: Arc<SearchSync<S, B>>,
    pub(crate) directory: DirectoryClient<S>,
    pub(crate) blobs: BlobRegistry<S>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) settings: EngineSettings,
}

impl<S: AnswerStore, B: SearchBackend> AccessBoundary<S, B> {
    pub fn new(parts: BoundaryParts<S, B>) -> Self {
        let BoundaryParts {
            store,
            registry,
            search,
            index,
            directory,
            clock,
            settings,
            blob_root,
        } = parts;
        let query = QueryService::new(search.clone(), registry.clone(), &index.prefix);
        let indexer = Arc::new(SearchIndexer::new(search, index));
        let sync = Arc::new(SearchSync::new(store.clone(), registry.clone(), indexer));
        let public_index: Arc<dyn PublicIndex> = sync.clone();
        let workflow = Workflow::new(
            store.clone(),
            registry.clone(),
            EventBus::for_store(store.clone()),
            public_index,
            clock.clone(),
            settings.clone(),
        );
        let directory = DirectoryClient::new(
            directory,
            store.clone(),
            clock.clone(),
            settings.directory_timeout(),
        );
        let blobs = BlobRegistry::new(store.clone(), blob_root, clock.clone());
        AccessBoundary {
            store,
            registry,
            workflow,
            query,
            sync,
            directory,
            blobs,
            clock,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn sync(&self) -> &Arc<SearchSync<S, B>> {
        &self.sync
    }

    /// Name of the cookie carrying the session token.
    pub fn session_cookie(&self) -> &'static str {
        self.settings.session_cookie()
    }

    pub async fn authenticate(&self, token: Option<&str>) -> Session {
        self.directory.authenticate(token).await
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Option<String>, QcatError> {
        self.directory.login(username, password).await
    }

    // ── Listings ─────────────────────────────────────────────────────────

    /// Public listing from the search index.
    pub async fn list(&self, query: &ListQuery) -> Result<ListPage, QcatError> {
        Ok(self.query.list(query).await?)
    }

    async fn summary(&self, doc: &DocumentRecord, roles: &BTreeSet<Role>, language: &str) -> DocumentSummary {
        DocumentSummary {
            id: doc.id.clone(),
            identifier: doc.identifier.clone(),
            configuration: doc.configuration.clone(),
            version: doc.version,
            status: doc.status,
            name: localized(&self.workflow.links().name_of(doc), language),
            updated: doc.updated.clone(),
            roles: roles.iter().copied().collect(),
        }
    }

    /// Versions of `identifier`, oldest first, with the viewer's roles.
    async fn versions(
        &self,
        identifier: &str,
        viewer: &Viewer,
    ) -> Result<Vec<(DocumentRecord, BTreeSet<Role>)>, QcatError> {
        let mut out = Vec::new();
        for doc in self.store.list_versions(identifier).await? {
            let memberships = self.store.memberships(&doc.id).await?;
            let roles = roles_of(viewer.user_id, &memberships);
            out.push((doc, roles));
        }
        Ok(out)
    }

    async fn latest_per_identifier(
        &self,
        docs: Vec<DocumentRecord>,
        viewer: &Viewer,
        language: &str,
        keep: impl Fn(&DocumentRecord, &BTreeSet<Role>) -> bool,
    ) -> Result<Vec<DocumentSummary>, QcatError> {
        let identifiers: BTreeSet<String> = docs.into_iter().map(|d| d.identifier).collect();
        let mut out = Vec::new();
        for identifier in identifiers {
            let versions = self.versions(&identifier, viewer).await?;
            let Some(latest) = select(&versions, Selector::LatestForUser, viewer) else {
                continue;
            };
            let roles = versions
                .iter()
                .find(|(d, _)| d.id == latest.id)
                .map(|(_, r)| r.clone())
                .unwrap_or_default();
            if keep(latest, &roles) {
                out.push(self.summary(latest, &roles, language).await);
            }
        }
        out.sort_by(|a, b| b.updated.cmp(&a.updated));
        Ok(out)
    }

    /// Documents the viewer is a member of, newest visible version each.
    pub async fn my_data(&self, viewer: &Viewer, language: &str) -> Result<Vec<DocumentSummary>, QcatError> {
        let Some(user) = viewer.user_id else {
            return Ok(Vec::new());
        };
        let docs = self
            .store
            .list_documents(&DocumentFilter {
                member: Some(user),
                ..DocumentFilter::default()
            })
            .await?;
        self.latest_per_identifier(docs, viewer, language, |_, _| true).await
    }

    async fn pending(
        &self,
        status: DocumentStatus,
        role: Role,
        permission: Permission,
        viewer: &Viewer,
        language: &str,
    ) -> Result<Vec<DocumentSummary>, QcatError> {
        if viewer.is_anonymous() {
            return Ok(Vec::new());
        }
        let docs = self
            .store
            .list_documents(&DocumentFilter {
                statuses: vec![status],
                member: (!viewer.has(permission)).then_some(viewer.user_id).flatten(),
                ..DocumentFilter::default()
            })
            .await?;
        self.latest_per_identifier(docs, viewer, language, |doc, roles| {
            doc.status == status && (roles.contains(&role) || viewer.has(permission))
        })
        .await
    }

    /// Submitted documents waiting for this reviewer.
    pub async fn pending_review(&self, viewer: &Viewer, language: &str) -> Result<Vec<DocumentSummary>, QcatError> {
        self.pending(DocumentStatus::Submitted, Role::Reviewer, Permission::ReviewAny, viewer, language)
            .await
    }

    /// Reviewed documents waiting for this publisher.
    pub async fn pending_publish(&self, viewer: &Viewer, language: &str) -> Result<Vec<DocumentSummary>, QcatError> {
        self.pending(DocumentStatus::Reviewed, Role::Publisher, Permission::PublishAny, viewer, language)
            .await
    }

    // ── Detail ───────────────────────────────────────────────────────────

    pub async fn detail(
        &self,
        identifier: &str,
        viewer: &Viewer,
        selector: Selector,
        language: &str,
    ) -> Result<DocumentView, QcatError> {
        let versions = self.versions(identifier, viewer).await?;
        let doc = select(&versions, selector, viewer)
            .cloned()
            .ok_or_else(|| QcatError::not_found("document", identifier))?;
        let roles = versions
            .iter()
            .find(|(d, _)| d.id == doc.id)
            .map(|(_, r)| r.clone())
            .unwrap_or_default();

        let config = self.registry.resolve_ref(&doc.configuration).or_else(|_| {
            self.registry
                .resolve_read_only(&doc.configuration.code, &doc.configuration.edition)
        })?;
        let linked = self.workflow.links().linked(&doc, viewer).await?;
        let mut payload = doc.payload.clone();
        overlay_links(&config, &mut payload, &linked);

        let categories = document_progress(&config, &payload)?
            .into_iter()
            .filter_map(|(keyword, progress)| {
                let label = config.get_category(&keyword).ok()?.label(language);
                Some(CategoryView {
                    keyword,
                    label,
                    progress,
                })
            })
            .collect();

        let mut members = Vec::new();
        for membership in self.store.memberships(&doc.id).await? {
            members.push(Member {
                user_id: membership.user_id,
                name: self.directory.display_name(membership.user_id).await,
                role: membership.role,
            });
        }

        let actions = [
            ReviewAction::Submit,
            ReviewAction::Review,
            ReviewAction::RejectSubmitted,
            ReviewAction::Publish,
            ReviewAction::RejectReviewed,
            ReviewAction::Delete,
        ]
        .into_iter()
        .filter(|a| check_transition(*a, doc.status, &roles, viewer, Some("-")).is_ok())
        .collect();

        let visible_versions = versions
            .iter()
            .filter(|(d, r)| can_view(d.status, r, viewer))
            .map(|(d, _)| VersionInfo {
                id: d.id.clone(),
                version: d.version,
                status: d.status,
            })
            .collect();

        let now = self.clock.now();
        Ok(DocumentView {
            summary: self.summary(&doc, &roles, language).await,
            original_language: doc.original_language.clone(),
            translations: doc.translation_languages.clone(),
            payload,
            categories,
            linked,
            members,
            can_edit: check_edit(doc.status, &roles, viewer).is_ok(),
            actions,
            versions: visible_versions,
            locked_by: doc
                .blocked_by
                .filter(|_| crate::workflow::is_locked(&doc, now)),
        })
    }

    // ── Editing ──────────────────────────────────────────────────────────

    pub async fn create_draft(&self, code: &str, language: &str, viewer: &Viewer) -> Result<DocumentRecord, QcatError> {
        self.workflow.create_draft(code, language, viewer).await
    }

    /// Render one step. Editors get the edit lock; if someone else holds
    /// it they get the read-only form naming the holder.
    pub async fn step_render(
        &self,
        document_id: &str,
        category: &str,
        viewer: &Viewer,
        language: &str,
    ) -> Result<FormDescriptor, QcatError> {
        let doc = self.store.get_document(document_id).await?;
        let memberships = self.store.memberships(&doc.id).await?;
        let roles = roles_of(viewer.user_id, &memberships);
        if !can_view(doc.status, &roles, viewer) {
            return Err(QcatError::not_found("document", document_id));
        }
        let config = self.registry.resolve_ref(&doc.configuration)?;

        let (mut doc, read_only, locked_by, notice) = if check_edit(doc.status, &roles, viewer).is_ok() {
            match self.workflow.acquire_lock(document_id, viewer).await {
                Ok(EditLock { document, notice }) => (document, false, None, notice),
                Err(QcatError::LockedBy { user, .. }) => {
                    debug!(identifier = %doc.identifier, holder = user, "step opened read-only");
                    (doc, true, Some(user), None)
                }
                Err(e) => return Err(e),
            }
        } else {
            (doc, true, None, None)
        };

        let linked = self.workflow.links().linked(&doc, viewer).await?;
        overlay_links(&config, &mut doc.payload, &linked);
        let mut form = render(
            &config,
            &doc,
            category,
            RenderContext {
                language,
                links: &linked,
                read_only,
            },
        )?;
        form.locked_by = locked_by;
        form.notice = notice;
        Ok(form)
    }

    pub async fn step_commit(
        &self,
        document_id: &str,
        input: StepInput<'_>,
        viewer: &Viewer,
    ) -> Result<StepCommit, QcatError> {
        self.workflow.commit_step(document_id, input, viewer).await
    }

    pub async fn release_lock(&self, document_id: &str, viewer: &Viewer) -> Result<(), QcatError> {
        self.workflow.release_lock(document_id, viewer).await
    }

    pub async fn upload(&self, bytes: &[u8], content_type: &str, viewer: &Viewer) -> Result<BlobRecord, QcatError> {
        if viewer.is_anonymous() {
            return Err(QcatError::denied("authenticated user"));
        }
        self.blobs.upload(bytes, content_type).await
    }

    // ── Workflow ─────────────────────────────────────────────────────────

    pub async fn review_action(
        &self,
        document_id: &str,
        action: ReviewAction,
        viewer: &Viewer,
        message: Option<&str>,
    ) -> Result<DocumentRecord, QcatError> {
        self.workflow.transition(document_id, action, viewer, message).await
    }

    /// Returns the id of the new (or already open) version.
    pub async fn fork_new_version(&self, document_id: &str, viewer: &Viewer) -> Result<String, QcatError> {
        Ok(self.workflow.fork(document_id, viewer).await?.id)
    }

    /// Change a membership. The user must be known to the directory or
    /// the local cache.
    pub async fn set_membership(
        &self,
        document_id: &str,
        change: &MembershipChange,
        viewer: &Viewer,
    ) -> Result<Vec<Event>, QcatError> {
        if self.directory.get_user(change.user).await.is_none() {
            return Err(QcatError::not_found("user", change.user.to_string()));
        }
        self.workflow.set_membership(document_id, change, viewer).await
    }

    // ── Search helpers ───────────────────────────────────────────────────

    pub async fn search_links(
        &self,
        query: &str,
        viewer: &Viewer,
        configuration: Option<&str>,
        language: &str,
    ) -> Result<Vec<LinkCandidate>, QcatError> {
        self.workflow
            .links()
            .search(query, viewer, configuration, language)
            .await
    }

    pub async fn search_users(&self, query: &str) -> Vec<UserCandidate> {
        self.directory.search_users(query).await
    }

    /// Public documents of each configuration code the viewer may list.
    pub async fn counts(&self) -> Result<BTreeMap<String, usize>, QcatError> {
        let mut counts = BTreeMap::new();
        for doc in self
            .store
            .list_documents(&DocumentFilter {
                statuses: vec![DocumentStatus::Public],
                ..DocumentFilter::default()
            })
            .await?
        {
            *counts.entry(doc.configuration.code).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
