//! Link Resolver: symmetric links between answer documents.
//!
//! A link is stored as two directed edges between document ids, each
//! stamped with the statuses of both ends. Writers keep the pair
//! consistent inside the snapshot of the operation that changes it;
//! readers pick one version per linked identifier.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use qcat_core::{localized, Configuration, Labels, Question, QuestionType, Registry};
use qcat_storage::{
    AnswerStore, DocumentFilter, DocumentRecord, DocumentStatus, LinkRecord, Role, StorageError,
};
use serde::Serialize;
use serde_json::{json, Map, Value as Json};
use tracing::debug;

use crate::error::{FieldDiagnostic, QcatError};
use crate::form::LinkRef;
use crate::viewer::Viewer;
use crate::workflow::gates::roles_of;
use crate::workflow::visibility::{has_edit_privileges, select, Selector};

/// A linked document as shown to one viewer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkedDocument {
    pub identifier: String,
    pub configuration: String,
    pub document_id: String,
    pub status: DocumentStatus,
    pub name: Labels,
}

/// A result of the link search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkCandidate {
    pub identifier: String,
    pub configuration: String,
    pub status: DocumentStatus,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkChanges {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl LinkChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Display name of a document: the configured list name field, falling
/// back to the identifier.
pub fn document_name(doc: &DocumentRecord, config: Option<&Configuration>) -> Labels {
    let (qg, question) = config
        .map(|c| c.list.name.clone())
        .unwrap_or_else(|| ("qg_name".to_string(), "name".to_string()));
    let found = doc
        .payload
        .get(&qg)
        .and_then(Json::as_array)
        .into_iter()
        .flatten()
        .find_map(|instance| match instance.get(&question)? {
            Json::String(s) if !s.trim().is_empty() => {
                Some(Labels::from([(doc.original_language.clone(), s.clone())]))
            }
            Json::Object(map) => {
                let labels: Labels = map
                    .iter()
                    .filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_string())))
                    .filter(|(_, v)| !v.trim().is_empty())
                    .collect();
                (!labels.is_empty()).then_some(labels)
            }
            _ => None,
        });
    found.unwrap_or_else(|| Labels::from([(doc.original_language.clone(), doc.identifier.clone())]))
}

/// Write `linked` into the link questions of `payload`. Each linked
/// document goes to the first link question accepting its configuration;
/// link groups without links are removed.
pub fn overlay_links(config: &Configuration, payload: &mut Json, linked: &[LinkedDocument]) {
    let mut assigned: BTreeMap<(String, String), Vec<&LinkedDocument>> = BTreeMap::new();
    let link_questions: Vec<&Question> = config
        .questions()
        .filter(|q| q.kind == QuestionType::Link)
        .collect();
    for doc in linked {
        let target = link_questions.iter().find(|q| match &q.link_configuration {
            Some(code) => *code == doc.configuration,
            None => config.links_to(&doc.configuration),
        });
        if let Some(q) = target {
            assigned
                .entry((q.questiongroup.clone(), q.keyword.clone()))
                .or_default()
                .push(doc);
        }
    }
    if !payload.is_object() {
        *payload = Json::Object(Map::new());
    }
    let Json::Object(root) = payload else {
        return;
    };
    for q in &link_questions {
        root.remove(&q.questiongroup);
    }
    for ((group, question), docs) in assigned {
        let instances = root
            .entry(group)
            .or_insert_with(|| Json::Array(Vec::new()));
        if let Json::Array(list) = instances {
            for doc in docs {
                let mut instance = Map::new();
                instance.insert(question.clone(), json!({"link_identifier": doc.identifier}));
                list.push(Json::Object(instance));
            }
        }
    }
}

pub struct LinkResolver<S: AnswerStore> {
    store: Arc<S>,
    registry: Arc<Registry>,
}

impl<S: AnswerStore> LinkResolver<S> {
    pub fn new(store: Arc<S>, registry: Arc<Registry>) -> Self {
        LinkResolver { store, registry }
    }

    async fn versions_with_roles(
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

    /// Target of a link entered in a form: the Public version, else the
    /// newest version the viewer can see.
    pub async fn resolve_for_commit(
        &self,
        identifier: &str,
        viewer: &Viewer,
    ) -> Result<Option<DocumentRecord>, QcatError> {
        let versions = self.versions_with_roles(identifier, viewer).await?;
        Ok(select(&versions, Selector::Public, viewer)
            .or_else(|| select(&versions, Selector::LatestForUser, viewer))
            .cloned())
    }

    /// The version of `identifier` a viewer sees in link lists. Editors
    /// see their newest version; everyone else the Public one or nothing.
    pub async fn read_precedence(
        &self,
        identifier: &str,
        viewer: &Viewer,
    ) -> Result<Option<DocumentRecord>, QcatError> {
        let versions = self.versions_with_roles(identifier, viewer).await?;
        let editor = versions.iter().any(|(_, roles)| has_edit_privileges(roles));
        let selector = if editor {
            Selector::LatestForUser
        } else {
            Selector::Public
        };
        Ok(select(&versions, selector, viewer)
            .filter(|d| d.status != DocumentStatus::Inactive)
            .cloned())
    }

    pub fn name_of(&self, doc: &DocumentRecord) -> Labels {
        let config = self
            .registry
            .resolve_read_only(&doc.configuration.code, &doc.configuration.edition)
            .ok();
        document_name(doc, config.as_deref())
    }

    /// Linked documents of `doc` for `viewer`, one per linked identifier.
    pub async fn linked(
        &self,
        doc: &DocumentRecord,
        viewer: &Viewer,
    ) -> Result<Vec<LinkedDocument>, QcatError> {
        let identifiers = self.linked_identifiers(doc).await?;
        let mut out = Vec::new();
        for identifier in identifiers {
            if let Some(target) = self.read_precedence(&identifier, viewer).await? {
                out.push(LinkedDocument {
                    identifier: target.identifier.clone(),
                    configuration: target.configuration.code.clone(),
                    document_id: target.id.clone(),
                    status: target.status,
                    name: self.name_of(&target),
                });
            }
        }
        Ok(out)
    }

    /// Reject links the configurations on either end do not allow.
    pub fn check_allowed(
        &self,
        from: &Configuration,
        question: Option<&Question>,
        target: &DocumentRecord,
    ) -> Result<(), QcatError> {
        let code = &target.configuration.code;
        if !from.links_to(code) {
            return Err(QcatError::LinkInconsistent(format!(
                "{} does not accept links to {}",
                from.code, code
            )));
        }
        if let Some(required) = question.and_then(|q| q.link_configuration.as_ref()) {
            if required != code {
                return Err(QcatError::LinkInconsistent(format!(
                    "{} only links to {}, not {}",
                    question.map_or("", |q| q.keyword.as_str()),
                    required,
                    target.identifier
                )));
            }
        }
        let target_config = self
            .registry
            .resolve_read_only(code, &target.configuration.edition)?;
        if !target_config.links_to(&from.code) {
            return Err(QcatError::LinkInconsistent(format!(
                "{} does not accept links from {}",
                code, from.code
            )));
        }
        Ok(())
    }

    /// Resolve the links entered in a bound step to documents.
    pub async fn targets(
        &self,
        config: &Configuration,
        doc: &DocumentRecord,
        links: &[LinkRef],
        viewer: &Viewer,
    ) -> Result<Vec<DocumentRecord>, QcatError> {
        let mut diagnostics = Vec::new();
        let mut targets: BTreeMap<String, DocumentRecord> = BTreeMap::new();
        for link in links {
            if link.identifier == doc.identifier {
                return Err(QcatError::LinkInconsistent(format!(
                    "{} cannot link to itself",
                    doc.identifier
                )));
            }
            match self.resolve_for_commit(&link.identifier, viewer).await? {
                Some(target) => {
                    let question = config.get_question(&link.question).ok();
                    self.check_allowed(config, question, &target)?;
                    targets.insert(target.identifier.clone(), target);
                }
                None => diagnostics.push(FieldDiagnostic::field(
                    &link.questiongroup,
                    link.index,
                    &link.question,
                    format!("no questionnaire {} to link to", link.identifier),
                )),
            }
        }
        if !diagnostics.is_empty() {
            return Err(QcatError::ValidationFailed(diagnostics));
        }
        Ok(targets.into_values().collect())
    }

    async fn put_pair(&self, snapshot: &mut S::Snapshot, edge: LinkRecord) -> Result<(), QcatError> {
        self.store.put_link(snapshot, edge.mirrored()).await?;
        self.store.put_link(snapshot, edge).await?;
        Ok(())
    }

    async fn remove_pair(
        &self,
        snapshot: &mut S::Snapshot,
        a: &str,
        b: &str,
    ) -> Result<(), QcatError> {
        self.store.remove_link(snapshot, a, b).await?;
        self.store.remove_link(snapshot, b, a).await?;
        Ok(())
    }

    /// Make the links of `doc` that fall under `in_scope` (by target
    /// configuration code) equal to `targets`. Edges to another version of
    /// a selected identifier are kept. Reconciling twice changes nothing.
    pub async fn reconcile(
        &self,
        snapshot: &mut S::Snapshot,
        doc: &DocumentRecord,
        targets: &[DocumentRecord],
        in_scope: impl Fn(&str) -> bool + Send,
    ) -> Result<LinkChanges, QcatError> {
        let mut changes = LinkChanges::default();
        let existing = self.store.links_from(&doc.id).await?;
        let wanted: BTreeSet<&str> = targets.iter().map(|t| t.identifier.as_str()).collect();

        for edge in &existing {
            let target = match self.store.get_document(&edge.to_id).await {
                Ok(target) => target,
                Err(StorageError::NotFound { .. }) => {
                    self.remove_pair(snapshot, &doc.id, &edge.to_id).await?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if in_scope(&target.configuration.code) && !wanted.contains(target.identifier.as_str()) {
                self.remove_pair(snapshot, &doc.id, &edge.to_id).await?;
                changes.removed.push(target.identifier);
            }
        }

        for target in targets {
            let covered = existing.iter().any(|e| {
                e.to_id == target.id && e.from_status == doc.status && e.to_status == target.status
            });
            if covered {
                continue;
            }
            let linked_before = existing.iter().any(|e| e.to_id == target.id);
            self.put_pair(
                snapshot,
                LinkRecord {
                    from_id: doc.id.clone(),
                    from_status: doc.status,
                    to_id: target.id.clone(),
                    to_status: target.status,
                },
            )
            .await?;
            if !linked_before {
                changes.added.push(target.identifier.clone());
            }
        }
        if !changes.is_empty() {
            debug!(identifier = %doc.identifier, added = changes.added.len(), removed = changes.removed.len(), "links reconciled");
        }
        Ok(changes)
    }

    /// Re-stamp every link of `doc` with its current status.
    pub async fn restamp(&self, snapshot: &mut S::Snapshot, doc: &DocumentRecord) -> Result<(), QcatError> {
        for edge in self.store.links_from(&doc.id).await? {
            if edge.from_status == doc.status {
                continue;
            }
            self.put_pair(
                snapshot,
                LinkRecord {
                    from_status: doc.status,
                    ..edge
                },
            )
            .await?;
        }
        Ok(())
    }

    /// Drop the links of a retired version. Links another document made to
    /// it after `new` was forked move onto `new`; links `new` inherited at
    /// the fork are left as its own edits made them.
    pub async fn retarget(
        &self,
        snapshot: &mut S::Snapshot,
        old: &DocumentRecord,
        new: &DocumentRecord,
    ) -> Result<usize, QcatError> {
        let kept = self.linked_identifiers(new).await?;
        let mut moved = 0;
        for edge in self.store.links_from(&old.id).await? {
            self.remove_pair(snapshot, &old.id, &edge.to_id).await?;
            if edge.to_id == new.id {
                continue;
            }
            let identifier = match self.store.get_document(&edge.to_id).await {
                Ok(target) => target.identifier,
                Err(StorageError::NotFound { .. }) => continue,
                Err(e) => return Err(e.into()),
            };
            if new.forked_links.contains(&identifier) || kept.contains(&identifier) {
                continue;
            }
            self.put_pair(
                snapshot,
                LinkRecord {
                    from_id: new.id.clone(),
                    from_status: new.status,
                    to_id: edge.to_id.clone(),
                    to_status: edge.to_status,
                },
            )
            .await?;
            moved += 1;
        }
        Ok(moved)
    }

    /// Identifiers `doc` currently links to.
    pub async fn linked_identifiers(&self, doc: &DocumentRecord) -> Result<BTreeSet<String>, QcatError> {
        let mut identifiers = BTreeSet::new();
        for edge in self.store.links_from(&doc.id).await? {
            match self.store.get_document(&edge.to_id).await {
                Ok(target) => {
                    identifiers.insert(target.identifier);
                }
                Err(StorageError::NotFound { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(identifiers)
    }

    /// Give a new version the links of the version it was forked from.
    pub async fn copy(
        &self,
        snapshot: &mut S::Snapshot,
        from: &DocumentRecord,
        to: &DocumentRecord,
    ) -> Result<(), QcatError> {
        for edge in self.store.links_from(&from.id).await? {
            self.put_pair(
                snapshot,
                LinkRecord {
                    from_id: to.id.clone(),
                    from_status: to.status,
                    to_id: edge.to_id,
                    to_status: edge.to_status,
                },
            )
            .await?;
        }
        Ok(())
    }

    /// Remove every link of `doc` in both directions.
    pub async fn remove_all(&self, snapshot: &mut S::Snapshot, doc: &DocumentRecord) -> Result<usize, QcatError> {
        let mut others: BTreeSet<String> = self
            .store
            .links_from(&doc.id)
            .await?
            .into_iter()
            .map(|e| e.to_id)
            .collect();
        others.extend(self.store.links_to(&doc.id).await?.into_iter().map(|e| e.from_id));
        for other in &others {
            self.remove_pair(snapshot, &doc.id, other).await?;
        }
        Ok(others.len())
    }

    /// Candidates for the link step: one version per identifier under the
    /// read precedence, matched on identifier or name.
    pub async fn search(
        &self,
        text: &str,
        viewer: &Viewer,
        configuration: Option<&str>,
        language: &str,
    ) -> Result<Vec<LinkCandidate>, QcatError> {
        let filter = DocumentFilter {
            configuration_code: configuration.map(str::to_string),
            statuses: DocumentStatus::ALL
                .into_iter()
                .filter(|s| *s != DocumentStatus::Inactive)
                .collect(),
            ..DocumentFilter::default()
        };
        let identifiers: BTreeSet<String> = self
            .store
            .list_documents(&filter)
            .await?
            .into_iter()
            .map(|d| d.identifier)
            .collect();
        let needle = text.trim().to_lowercase();
        let mut out = Vec::new();
        for identifier in identifiers {
            let Some(doc) = self.read_precedence(&identifier, viewer).await? else {
                continue;
            };
            let name = self.name_of(&doc);
            let matches = needle.is_empty()
                || identifier.to_lowercase().contains(&needle)
                || name.values().any(|n| n.to_lowercase().contains(&needle));
            if matches {
                out.push(LinkCandidate {
                    identifier,
                    configuration: doc.configuration.code.clone(),
                    status: doc.status,
                    name: localized(&name, language),
                });
            }
        }
        Ok(out)
    }
}
