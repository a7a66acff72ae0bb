//! Review Workflow: drafts, step commits, status transitions, forks,
//! memberships and the edit lock.
//!
//! Every write for an identifier runs under its [`IdentifierLocks`] entry
//! and inside one store snapshot. Events are published only after the
//! snapshot commits; index updates follow the events and never fail the
//! operation.

pub mod gates;
pub mod locks;
pub mod visibility;

use std::collections::BTreeSet;
use std::sync::Arc;

use qcat_core::{Configuration, QuestionType, Registry};
use qcat_storage::{
    AnswerStore, DocumentFilter, DocumentRecord, DocumentStatus, MembershipRecord, Role, UserId,
};
use serde::Serialize;
use serde_json::{Map, Value as Json};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::blobs::check_upload;
use crate::clock::{timestamp, Clock};
use crate::error::{FieldDiagnostic, QcatError};
use crate::events::{Event, EventBus, EventKind};
use crate::form::{bind, missing_for_submit, prune_hidden, BlobRef, TranslationMode};
use crate::links::{LinkChanges, LinkResolver};
use crate::migrate::migrate;
use crate::settings::EngineSettings;
use crate::sync::PublicIndex;
use crate::viewer::Viewer;

pub use gates::{check_edit, check_fork, check_membership, check_transition, roles_of, ReviewAction};
pub use locks::{check_lock, is_locked, IdentifierLocks, LockState};
pub use visibility::{can_view, has_edit_privileges, select, Selector};

/// A lock taken for editing, with the notice shown when an abandoned lock
/// was recovered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EditLock {
    pub document: DocumentRecord,
    pub notice: Option<String>,
}

/// Result of a committed step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepCommit {
    pub document: DocumentRecord,
    pub links: LinkChanges,
    /// `qg[i].question` paths cleared because conditions no longer allow
    /// them.
    pub pruned: Vec<String>,
}

/// A step submitted for commit.
#[derive(Debug, Clone, Copy)]
pub struct StepInput<'a> {
    pub category: &'a str,
    pub payload: &'a Json,
    pub language: &'a str,
    /// Set once the user confirmed starting a new translation.
    pub confirm_translation: bool,
}

/// A change of membership requested by a viewer.
#[derive(Debug, Clone)]
pub struct MembershipChange {
    pub user: UserId,
    pub role: Role,
    pub add: bool,
    pub message: Option<String>,
    /// On a compiler change, keep the previous compiler as editor.
    pub retain_previous: bool,
}

fn require_user(viewer: &Viewer) -> Result<UserId, QcatError> {
    viewer
        .user_id
        .ok_or_else(|| QcatError::denied("authenticated user"))
}

pub struct Workflow<S: AnswerStore> {
    store: Arc<S>,
    registry: Arc<Registry>,
    links: LinkResolver<S>,
    events: EventBus,
    index: Arc<dyn PublicIndex>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
    locks: IdentifierLocks,
}

impl<S: AnswerStore> Workflow<S> {
    pub fn new(
        store: Arc<S>,
        registry: Arc<Registry>,
        events: EventBus,
        index: Arc<dyn PublicIndex>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        let links = LinkResolver::new(store.clone(), registry.clone());
        Workflow {
            store,
            registry,
            links,
            events,
            index,
            clock,
            settings,
            locks: IdentifierLocks::new(),
        }
    }

    pub fn links(&self) -> &LinkResolver<S> {
        &self.links
    }

    async fn roles(&self, doc: &DocumentRecord, viewer: &Viewer) -> Result<(Vec<MembershipRecord>, BTreeSet<Role>), QcatError> {
        let memberships = self.store.memberships(&doc.id).await?;
        let roles = roles_of(viewer.user_id, &memberships);
        Ok((memberships, roles))
    }

    fn lock_until(&self) -> String {
        timestamp(self.clock.now() + self.settings.lock_ttl())
    }

    // ── Drafts ───────────────────────────────────────────────────────────

    /// Start a new questionnaire in the active edition of `code`; the
    /// creator becomes its compiler.
    pub async fn create_draft(
        &self,
        code: &str,
        language: &str,
        viewer: &Viewer,
    ) -> Result<DocumentRecord, QcatError> {
        let user = require_user(viewer)?;
        let config = self.registry.active(code)?;
        if config.module && !self.registry.features().module_feature {
            return Err(QcatError::UnknownConfiguration(config.key()));
        }
        if !config.languages.iter().any(|l| l == language) {
            return Err(QcatError::ValidationFailed(vec![FieldDiagnostic::group(
                "language",
                format!("{} is not offered by {}", language, config.key()),
            )]));
        }
        let identifier = self.store.allocate_identifier(code).await?;
        let now = timestamp(self.clock.now());
        let doc = DocumentRecord {
            id: Uuid::new_v4().to_string(),
            identifier,
            version: 1,
            status: DocumentStatus::Draft,
            configuration: config.key(),
            original_language: language.to_string(),
            translation_languages: Vec::new(),
            created: now.clone(),
            updated: now,
            blocked_by: None,
            blocked_until: None,
            revision: 0,
            payload: Json::Object(Map::new()),
            previous_id: None,
            annotations: Vec::new(),
            forked_links: Vec::new(),
        };
        let mut snapshot = self.store.begin_snapshot().await?;
        let staged = async {
            self.store.insert_document(&mut snapshot, doc.clone()).await?;
            self.store
                .put_membership(
                    &mut snapshot,
                    MembershipRecord {
                        document_id: doc.id.clone(),
                        user_id: user,
                        role: Role::Compiler,
                    },
                )
                .await
        }
        .await;
        if let Err(e) = staged {
            let _ = self.store.abort_snapshot(snapshot).await;
            return Err(e.into());
        }
        self.store.commit_snapshot(snapshot).await?;
        info!(identifier = %doc.identifier, configuration = %doc.configuration, actor = user, "draft created");
        Ok(doc)
    }

    // ── Edit lock ────────────────────────────────────────────────────────

    /// Take or refresh the edit lock of a document for `viewer`.
    ///
    /// Another user's running lock on any non-Public version of the
    /// identifier fails with `LockedBy`. An expired one is taken over.
    pub async fn acquire_lock(&self, document_id: &str, viewer: &Viewer) -> Result<EditLock, QcatError> {
        let user = require_user(viewer)?;
        let doc = self.store.get_document(document_id).await?;
        let _guard = self.locks.lock(&doc.identifier).await;
        let (_, roles) = self.roles(&doc, viewer).await?;
        check_edit(doc.status, &roles, viewer)?;

        let now = self.clock.now();
        let versions = self.store.list_versions(&doc.identifier).await?;
        let state = check_lock(&versions, user, now)?;
        let notice = match state {
            LockState::Abandoned { previous } => {
                info!(identifier = %doc.identifier, previous, actor = user, "recovered abandoned edit lock");
                Some(format!(
                    "recovered from an abandoned edit by user {}",
                    previous
                ))
            }
            _ => None,
        };

        let mut snapshot = self.store.begin_snapshot().await?;
        let staged = async {
            for other in versions.iter().filter(|v| v.id != doc.id && v.blocked_by.is_some()) {
                if other.blocked_by == Some(user) || !is_locked(other, now) {
                    let mut cleared = self.store.get_document_for_update(&mut snapshot, &other.id).await?;
                    cleared.blocked_by = None;
                    cleared.blocked_until = None;
                    let revision = cleared.revision;
                    self.store.update_document(&mut snapshot, cleared, revision).await?;
                }
            }
            let mut locked = self.store.get_document_for_update(&mut snapshot, &doc.id).await?;
            locked.blocked_by = Some(user);
            locked.blocked_until = Some(self.lock_until());
            let revision = locked.revision;
            locked.revision = self.store.update_document(&mut snapshot, locked.clone(), revision).await?;
            Ok::<_, QcatError>(locked)
        }
        .await;
        let locked = match staged {
            Ok(locked) => locked,
            Err(e) => {
                let _ = self.store.abort_snapshot(snapshot).await;
                return Err(e);
            }
        };
        self.store.commit_snapshot(snapshot).await?;
        debug!(identifier = %locked.identifier, actor = user, until = ?locked.blocked_until, "edit lock held");
        Ok(EditLock {
            document: locked,
            notice,
        })
    }

    /// Give up the viewer's own lock. Not holding it is not an error.
    pub async fn release_lock(&self, document_id: &str, viewer: &Viewer) -> Result<(), QcatError> {
        let user = require_user(viewer)?;
        let doc = self.store.get_document(document_id).await?;
        if doc.blocked_by != Some(user) {
            return Ok(());
        }
        let _guard = self.locks.lock(&doc.identifier).await;
        let mut snapshot = self.store.begin_snapshot().await?;
        let mut released = self.store.get_document_for_update(&mut snapshot, document_id).await?;
        released.blocked_by = None;
        released.blocked_until = None;
        let revision = released.revision;
        if let Err(e) = self.store.update_document(&mut snapshot, released, revision).await {
            let _ = self.store.abort_snapshot(snapshot).await;
            return Err(e.into());
        }
        self.store.commit_snapshot(snapshot).await?;
        Ok(())
    }

    /// Clear every expired lock. Returns the identifiers touched.
    pub async fn clean_locks(&self) -> Result<Vec<String>, QcatError> {
        let now = self.clock.now();
        let stale: Vec<DocumentRecord> = self
            .store
            .list_documents(&DocumentFilter::default())
            .await?
            .into_iter()
            .filter(|d| d.blocked_by.is_some() && !is_locked(d, now))
            .collect();
        let mut cleaned = Vec::new();
        for doc in stale {
            let _guard = self.locks.lock(&doc.identifier).await;
            let mut snapshot = self.store.begin_snapshot().await?;
            let mut current = self.store.get_document_for_update(&mut snapshot, &doc.id).await?;
            if is_locked(&current, now) {
                self.store.abort_snapshot(snapshot).await?;
                continue;
            }
            current.blocked_by = None;
            current.blocked_until = None;
            let revision = current.revision;
            if let Err(e) = self.store.update_document(&mut snapshot, current, revision).await {
                let _ = self.store.abort_snapshot(snapshot).await;
                return Err(e.into());
            }
            self.store.commit_snapshot(snapshot).await?;
            cleaned.push(doc.identifier);
        }
        if !cleaned.is_empty() {
            info!(count = cleaned.len(), "expired edit locks cleared");
        }
        Ok(cleaned)
    }

    // ── Step commit ──────────────────────────────────────────────────────

    async fn check_blobs(&self, config: &Configuration, blobs: &[BlobRef]) -> Result<(), QcatError> {
        let mut diagnostics = Vec::new();
        for blob in blobs {
            let Ok(question) = config.get_question(&blob.question) else {
                continue;
            };
            let problem = match self.store.get_blob(&blob.uuid).await {
                Ok(record) => check_upload(question, &record).err(),
                Err(qcat_storage::StorageError::NotFound { .. }) => {
                    Some(format!("no uploaded file {}", blob.uuid))
                }
                Err(e) => return Err(e.into()),
            };
            if let Some(message) = problem {
                diagnostics.push(FieldDiagnostic::field(
                    &blob.questiongroup,
                    blob.index,
                    &blob.question,
                    message,
                ));
            }
        }
        if diagnostics.is_empty() {
            Ok(())
        } else {
            Err(QcatError::ValidationFailed(diagnostics))
        }
    }

    /// Validate and commit one step of a document.
    ///
    /// Invalid input leaves the document untouched. A valid step is merged
    /// into the payload, answers that conditions no longer allow are
    /// removed across all steps, the edit lock is refreshed and the links
    /// of the step are reconciled.
    pub async fn commit_step(
        &self,
        document_id: &str,
        input: StepInput<'_>,
        viewer: &Viewer,
    ) -> Result<StepCommit, QcatError> {
        let user = require_user(viewer)?;
        let identifier = self.store.get_document(document_id).await?.identifier;
        let _guard = self.locks.lock(&identifier).await;
        let doc = self.store.get_document(document_id).await?;
        let (memberships, roles) = self.roles(&doc, viewer).await?;
        check_edit(doc.status, &roles, viewer)?;
        let config = self.registry.resolve_ref(&doc.configuration)?;

        let now = self.clock.now();
        let versions = self.store.list_versions(&doc.identifier).await?;
        check_lock(&versions, user, now)?;

        let mut updated = doc.clone();
        match TranslationMode::of(&doc, input.language) {
            TranslationMode::New if !config.languages.iter().any(|l| l == input.language) => {
                return Err(QcatError::ValidationFailed(vec![FieldDiagnostic::group(
                    "language",
                    format!("{} is not offered by {}", input.language, config.key()),
                )]));
            }
            TranslationMode::New if !input.confirm_translation => {
                return Err(QcatError::ValidationFailed(vec![FieldDiagnostic::group(
                    "language",
                    format!("confirm creating a new {} translation", input.language),
                )]));
            }
            TranslationMode::New => updated.translation_languages.push(input.language.to_string()),
            TranslationMode::Original | TranslationMode::Existing => {}
        }

        let bound = bind(&config, &doc.payload, input.category, input.payload, input.language)?;
        self.check_blobs(&config, &bound.blobs).await?;
        let targets = self.links.targets(&config, &doc, &bound.links, viewer).await?;

        let mut payload = bound.merge_into(&doc.payload);
        let pruned = prune_hidden(&config, &mut payload);
        if !pruned.is_empty() {
            debug!(identifier = %doc.identifier, cleared = ?pruned, "hidden answers removed");
        }
        let step_groups: BTreeSet<&str> = bound.groups.keys().map(String::as_str).collect();
        updated.payload = payload;
        updated.updated = timestamp(now);
        updated.blocked_by = Some(user);
        updated.blocked_until = Some(self.lock_until());
        updated
            .annotations
            .retain(|a| !step_groups.contains(a.questiongroup.as_str()));

        let link_questions: Vec<_> = config
            .category_questiongroups(input.category)?
            .into_iter()
            .flat_map(|g| g.questions.iter())
            .filter(|q| q.kind == QuestionType::Link)
            .collect();

        let mut snapshot = self.store.begin_snapshot().await?;
        let staged = async {
            for other in versions.iter().filter(|v| v.id != doc.id && v.blocked_by.is_some()) {
                if !is_locked(other, now) || other.blocked_by == Some(user) {
                    let mut cleared = self.store.get_document_for_update(&mut snapshot, &other.id).await?;
                    cleared.blocked_by = None;
                    cleared.blocked_until = None;
                    let revision = cleared.revision;
                    self.store.update_document(&mut snapshot, cleared, revision).await?;
                }
            }
            let revision = updated.revision;
            let mut committed = updated.clone();
            committed.revision = self.store.update_document(&mut snapshot, updated.clone(), revision).await?;
            let changes = if link_questions.is_empty() {
                LinkChanges::default()
            } else {
                let in_scope = |code: &str| {
                    config.links_to(code)
                        && link_questions.iter().any(|q| {
                            q.link_configuration.as_deref().map_or(true, |c| c == code)
                        })
                };
                self.links.reconcile(&mut snapshot, &committed, &targets, in_scope).await?
            };
            Ok::<_, QcatError>((committed, changes))
        }
        .await;
        let (committed, changes) = match staged {
            Ok(result) => result,
            Err(e) => {
                let _ = self.store.abort_snapshot(snapshot).await;
                return Err(e);
            }
        };
        self.store.commit_snapshot(snapshot).await?;

        let event = Event::new(EventKind::Edited, &committed, Some(user), &committed.updated)
            .addressed(&memberships);
        self.events.publish(&[event]).await;
        info!(
            identifier = %committed.identifier,
            category = input.category,
            actor = user,
            links_added = changes.added.len(),
            links_removed = changes.removed.len(),
            "step committed"
        );
        Ok(StepCommit {
            document: committed,
            links: changes,
            pruned,
        })
    }

    // ── Transitions ──────────────────────────────────────────────────────

    /// Apply a review action. On publish a previous Public version of the
    /// identifier becomes Inactive and its links move to the new version.
    pub async fn transition(
        &self,
        document_id: &str,
        action: ReviewAction,
        viewer: &Viewer,
        message: Option<&str>,
    ) -> Result<DocumentRecord, QcatError> {
        let identifier = self.store.get_document(document_id).await?.identifier;
        let _guard = self.locks.lock(&identifier).await;
        let doc = self.store.get_document(document_id).await?;
        let (memberships, roles) = self.roles(&doc, viewer).await?;
        let rule = check_transition(action, doc.status, &roles, viewer, message)?;

        if action == ReviewAction::Submit {
            let config = self.registry.resolve_ref(&doc.configuration)?;
            let missing = missing_for_submit(&config, &doc.payload);
            if !missing.is_empty() {
                return Err(QcatError::IncompleteForSubmit { missing });
            }
        }

        let versions = self.store.list_versions(&doc.identifier).await?;
        let now = timestamp(self.clock.now());
        let was_public = doc.status == DocumentStatus::Public;
        let linked_before = if action == ReviewAction::Delete {
            self.linked_public(&doc).await
        } else {
            Vec::new()
        };

        let mut next = doc.clone();
        next.status = rule.to;
        next.updated = now.clone();
        next.blocked_by = None;
        next.blocked_until = None;

        let mut snapshot = self.store.begin_snapshot().await?;
        let staged = async {
            let mut retired = None;
            if action == ReviewAction::Publish {
                if let Some(old) = versions
                    .iter()
                    .find(|v| v.status == DocumentStatus::Public && v.id != doc.id)
                {
                    let mut old = self.store.get_document_for_update(&mut snapshot, &old.id).await?;
                    old.status = DocumentStatus::Inactive;
                    old.updated = now.clone();
                    let revision = old.revision;
                    old.revision = self.store.update_document(&mut snapshot, old.clone(), revision).await?;
                    retired = Some(old);
                }
            }
            let revision = next.revision;
            let mut committed = next.clone();
            committed.revision = self.store.update_document(&mut snapshot, next.clone(), revision).await?;
            if action == ReviewAction::Delete {
                self.links.remove_all(&mut snapshot, &committed).await?;
            } else {
                if let Some(old) = &retired {
                    self.links.retarget(&mut snapshot, old, &committed).await?;
                }
                self.links.restamp(&mut snapshot, &committed).await?;
            }
            Ok::<_, QcatError>((committed, retired))
        }
        .await;
        let (committed, retired) = match staged {
            Ok(result) => result,
            Err(e) => {
                let _ = self.store.abort_snapshot(snapshot).await;
                return Err(e);
            }
        };
        self.store.commit_snapshot(snapshot).await?;

        let actor = viewer.user_id;
        let event = Event::new(rule.event, &committed, actor, &now)
            .with_message(message)
            .addressed(&memberships);
        self.events.publish(&[event]).await;
        info!(
            identifier = %committed.identifier,
            from = %doc.status,
            to = %committed.status,
            actor = ?actor,
            "status changed"
        );

        match action {
            ReviewAction::Publish => self.index.published(&committed, retired.as_ref()).await,
            ReviewAction::Delete => {
                if was_public {
                    self.index.withdrawn(&committed).await;
                }
                self.index.refreshed(&linked_before).await;
            }
            _ => {}
        }
        Ok(committed)
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

    // ── Fork ─────────────────────────────────────────────────────────────

    /// Start a new version of a Public document in the active edition of
    /// its configuration. If a version is already in progress it is
    /// returned instead.
    pub async fn fork(&self, document_id: &str, viewer: &Viewer) -> Result<DocumentRecord, QcatError> {
        let user = require_user(viewer)?;
        let source = self.store.get_document(document_id).await?;
        let _guard = self.locks.lock(&source.identifier).await;
        let (memberships, roles) = self.roles(&source, viewer).await?;
        check_fork(source.status, &roles, viewer)?;

        let versions = self.store.list_versions(&source.identifier).await?;
        if let Some(open) = versions
            .iter()
            .rev()
            .find(|v| v.status.is_editable_chain() && v.version > source.version)
        {
            debug!(identifier = %open.identifier, version = open.version, "new version already in progress");
            return Ok(open.clone());
        }

        let target = self.registry.active(&source.configuration.code)?;
        let migration = migrate(&self.registry, &source.payload, &source.configuration.edition, &target)?;
        let now = timestamp(self.clock.now());
        let version = versions.iter().map(|v| v.version).max().unwrap_or(source.version) + 1;
        let forked_links = self.links.linked_identifiers(&source).await?;
        let draft = DocumentRecord {
            id: Uuid::new_v4().to_string(),
            identifier: source.identifier.clone(),
            version,
            status: DocumentStatus::Draft,
            configuration: target.key(),
            original_language: source.original_language.clone(),
            translation_languages: source.translation_languages.clone(),
            created: now.clone(),
            updated: now,
            blocked_by: None,
            blocked_until: None,
            revision: 0,
            payload: migration.payload,
            previous_id: Some(source.id.clone()),
            annotations: migration.annotations,
            forked_links: forked_links.into_iter().collect(),
        };

        let mut snapshot = self.store.begin_snapshot().await?;
        let staged = async {
            self.store.insert_document(&mut snapshot, draft.clone()).await?;
            for membership in &memberships {
                self.store
                    .put_membership(
                        &mut snapshot,
                        MembershipRecord {
                            document_id: draft.id.clone(),
                            ..membership.clone()
                        },
                    )
                    .await?;
            }
            self.links.copy(&mut snapshot, &source, &draft).await?;
            Ok::<_, QcatError>(())
        }
        .await;
        if let Err(e) = staged {
            let _ = self.store.abort_snapshot(snapshot).await;
            return Err(e);
        }
        self.store.commit_snapshot(snapshot).await?;
        info!(
            identifier = %draft.identifier,
            version = draft.version,
            from = %source.configuration,
            to = %draft.configuration,
            annotations = draft.annotations.len(),
            actor = user,
            "new version forked"
        );
        Ok(draft)
    }

    // ── Memberships ──────────────────────────────────────────────────────

    /// Add or remove a member. Changing the compiler replaces the current
    /// one, optionally keeping them on as editor.
    pub async fn set_membership(
        &self,
        document_id: &str,
        change: &MembershipChange,
        viewer: &Viewer,
    ) -> Result<Vec<Event>, QcatError> {
        let actor = require_user(viewer)?;
        let doc = self.store.get_document(document_id).await?;
        let _guard = self.locks.lock(&doc.identifier).await;
        let (memberships, roles) = self.roles(&doc, viewer).await?;
        check_membership(change.role, &roles, viewer)?;

        let now = timestamp(self.clock.now());
        let message = change.message.as_deref();
        let has = |user: UserId, role: Role| {
            memberships.iter().any(|m| m.user_id == user && m.role == role)
        };
        let mut puts: Vec<(UserId, Role)> = Vec::new();
        let mut removals: Vec<(UserId, Role)> = Vec::new();

        if change.role == Role::Compiler {
            if !change.add {
                return Err(QcatError::ValidationFailed(vec![FieldDiagnostic::group(
                    "compiler",
                    "a questionnaire always has a compiler; assign a new one instead",
                )]));
            }
            if has(change.user, Role::Compiler) {
                return Ok(Vec::new());
            }
            for previous in memberships.iter().filter(|m| m.role == Role::Compiler) {
                removals.push((previous.user_id, Role::Compiler));
                if change.retain_previous && !has(previous.user_id, Role::Editor) {
                    puts.push((previous.user_id, Role::Editor));
                }
            }
            puts.insert(0, (change.user, Role::Compiler));
        } else if change.add {
            if has(change.user, change.role) {
                return Ok(Vec::new());
            }
            puts.push((change.user, change.role));
        } else {
            if !has(change.user, change.role) {
                return Err(QcatError::not_found(
                    "membership",
                    format!("{} {} on {}", change.role, change.user, doc.identifier),
                ));
            }
            removals.push((change.user, change.role));
        }

        let mut after: Vec<MembershipRecord> = memberships
            .iter()
            .filter(|m| !removals.contains(&(m.user_id, m.role)))
            .cloned()
            .collect();
        after.extend(puts.iter().map(|(user, role)| MembershipRecord {
            document_id: doc.id.clone(),
            user_id: *user,
            role: *role,
        }));

        let mut snapshot = self.store.begin_snapshot().await?;
        let staged = async {
            for (user, role) in &removals {
                self.store.remove_membership(&mut snapshot, &doc.id, *user, *role).await?;
            }
            for (user, role) in &puts {
                self.store
                    .put_membership(
                        &mut snapshot,
                        MembershipRecord {
                            document_id: doc.id.clone(),
                            user_id: *user,
                            role: *role,
                        },
                    )
                    .await?;
            }
            Ok::<_, QcatError>(())
        }
        .await;
        if let Err(e) = staged {
            let _ = self.store.abort_snapshot(snapshot).await;
            return Err(e);
        }
        self.store.commit_snapshot(snapshot).await?;

        let mut events = Vec::new();
        let changes = removals
            .iter()
            .map(|c| (*c, false))
            .chain(puts.iter().map(|c| (*c, true)));
        for ((user, role), added) in changes {
            let Some(kind) = EventKind::membership(role, added) else {
                continue;
            };
            let addressed_to = if added { &after } else { &memberships };
            events.push(
                Event::new(kind, &doc, Some(actor), &now)
                    .with_message(message)
                    .affecting(user, role)
                    .addressed(addressed_to),
            );
        }
        self.events.publish(&events).await;
        info!(
            identifier = %doc.identifier,
            user = change.user,
            role = %change.role,
            add = change.add,
            actor,
            "membership changed"
        );
        Ok(events)
    }
}
