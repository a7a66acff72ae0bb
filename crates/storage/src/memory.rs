//! In-process `AnswerStore` backend, optionally persisted to a JSON file.
//!
//! Snapshots are journals: mutations are staged as operations and replayed
//! against a copy of the committed state under the write lock at commit,
//! then swapped in. Readers never wait on an open snapshot.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::StorageError;
use crate::record::*;
use crate::traits::AnswerStore;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct State {
    documents: BTreeMap<String, DocumentRecord>,
    memberships: Vec<MembershipRecord>,
    links: Vec<LinkRecord>,
    events: Vec<EventRecord>,
    notifications: Vec<NotificationRecord>,
    blobs: BTreeMap<String, BlobRecord>,
    users: BTreeMap<UserId, UserRecord>,
    mail_preferences: BTreeMap<UserId, MailPreferences>,
    sequence: u64,
}

#[derive(Debug, Clone)]
enum Op {
    InsertDocument(DocumentRecord),
    UpdateDocument {
        record: DocumentRecord,
        expected_revision: i64,
    },
    PutMembership(MembershipRecord),
    RemoveMembership {
        document_id: String,
        user_id: UserId,
        role: Role,
    },
    PutLink(LinkRecord),
    RemoveLink {
        from_id: String,
        to_id: String,
    },
    InsertEvent(EventRecord),
    EnqueueNotification(NotificationRecord),
}

/// Staged mutations of one transaction.
#[derive(Debug, Default)]
pub struct MemorySnapshot {
    ops: Vec<Op>,
    /// Documents written in this snapshot, for read-your-writes.
    staged: BTreeMap<String, DocumentRecord>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
    file: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Open a store persisted to `path`. A missing file starts empty; the
    /// file is rewritten after every successful write.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| StorageError::Serialization(format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => State::default(),
            Err(e) => {
                return Err(StorageError::Backend(format!("{}: {}", path.display(), e)));
            }
        };
        Ok(MemoryStore {
            state: Arc::new(RwLock::new(state)),
            file: Some(path),
        })
    }

    async fn persist(&self, state: &State) -> Result<(), StorageError> {
        let Some(path) = &self.file else {
            return Ok(());
        };
        let text = serde_json::to_string_pretty(state)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, text)
            .await
            .map_err(|e| StorageError::Backend(format!("{}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| StorageError::Backend(format!("{}: {}", path.display(), e)))?;
        Ok(())
    }

    /// Apply a direct (non-snapshot) write and persist it.
    async fn write<T>(&self, f: impl FnOnce(&mut State) -> Result<T, StorageError>) -> Result<T, StorageError> {
        let mut guard = self.state.write().await;
        let mut next = guard.clone();
        let out = f(&mut next)?;
        self.persist(&next).await?;
        *guard = next;
        Ok(out)
    }
}

fn check_update(
    current: &DocumentRecord,
    record: &DocumentRecord,
    expected_revision: i64,
) -> Result<(), StorageError> {
    if current.revision != expected_revision {
        return Err(StorageError::ConcurrentConflict {
            document_id: record.id.clone(),
            expected_revision,
        });
    }
    if current.status != DocumentStatus::Draft && current.configuration != record.configuration {
        return Err(StorageError::ConfigurationFrozen {
            document_id: record.id.clone(),
        });
    }
    Ok(())
}

fn apply(state: &mut State, op: Op) -> Result<(), StorageError> {
    match op {
        Op::InsertDocument(record) => {
            if state.documents.contains_key(&record.id) {
                return Err(StorageError::AlreadyExists {
                    kind: "document",
                    id: record.id,
                });
            }
            state.documents.insert(record.id.clone(), record);
        }
        Op::UpdateDocument {
            mut record,
            expected_revision,
        } => {
            let current = state
                .documents
                .get(&record.id)
                .ok_or_else(|| StorageError::document_not_found(&record.id))?;
            check_update(current, &record, expected_revision)?;
            record.revision = expected_revision + 1;
            state.documents.insert(record.id.clone(), record);
        }
        Op::PutMembership(record) => {
            if !state.memberships.contains(&record) {
                state.memberships.push(record);
            }
        }
        Op::RemoveMembership {
            document_id,
            user_id,
            role,
        } => state
            .memberships
            .retain(|m| !(m.document_id == document_id && m.user_id == user_id && m.role == role)),
        Op::PutLink(record) => {
            state
                .links
                .retain(|l| !(l.from_id == record.from_id && l.to_id == record.to_id));
            state.links.push(record);
        }
        Op::RemoveLink { from_id, to_id } => state
            .links
            .retain(|l| !(l.from_id == from_id && l.to_id == to_id)),
        Op::InsertEvent(record) => state.events.push(record),
        Op::EnqueueNotification(record) => state.notifications.push(record),
    }
    Ok(())
}

#[async_trait]
impl AnswerStore for MemoryStore {
    type Snapshot = MemorySnapshot;

    async fn begin_snapshot(&self) -> Result<MemorySnapshot, StorageError> {
        Ok(MemorySnapshot::default())
    }

    async fn commit_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        if snapshot.ops.is_empty() {
            return Ok(());
        }
        let mut guard = self.state.write().await;
        let mut next = guard.clone();
        let count = snapshot.ops.len();
        for op in snapshot.ops {
            apply(&mut next, op)?;
        }
        self.persist(&next).await?;
        *guard = next;
        debug!(operations = count, "snapshot committed");
        Ok(())
    }

    async fn abort_snapshot(&self, _snapshot: MemorySnapshot) -> Result<(), StorageError> {
        Ok(())
    }

    async fn insert_document(
        &self,
        snapshot: &mut MemorySnapshot,
        record: DocumentRecord,
    ) -> Result<(), StorageError> {
        let exists = snapshot.staged.contains_key(&record.id)
            || self.state.read().await.documents.contains_key(&record.id);
        if exists {
            return Err(StorageError::AlreadyExists {
                kind: "document",
                id: record.id,
            });
        }
        snapshot.staged.insert(record.id.clone(), record.clone());
        snapshot.ops.push(Op::InsertDocument(record));
        Ok(())
    }

    async fn get_document_for_update(
        &self,
        snapshot: &mut MemorySnapshot,
        id: &str,
    ) -> Result<DocumentRecord, StorageError> {
        if let Some(record) = snapshot.staged.get(id) {
            return Ok(record.clone());
        }
        self.get_document(id).await
    }

    async fn update_document(
        &self,
        snapshot: &mut MemorySnapshot,
        mut record: DocumentRecord,
        expected_revision: i64,
    ) -> Result<i64, StorageError> {
        let current = self.get_document_for_update(snapshot, &record.id).await?;
        check_update(&current, &record, expected_revision)?;
        snapshot.ops.push(Op::UpdateDocument {
            record: record.clone(),
            expected_revision,
        });
        record.revision = expected_revision + 1;
        snapshot.staged.insert(record.id.clone(), record);
        Ok(expected_revision + 1)
    }

    async fn put_membership(
        &self,
        snapshot: &mut MemorySnapshot,
        record: MembershipRecord,
    ) -> Result<(), StorageError> {
        snapshot.ops.push(Op::PutMembership(record));
        Ok(())
    }

    async fn remove_membership(
        &self,
        snapshot: &mut MemorySnapshot,
        document_id: &str,
        user_id: UserId,
        role: Role,
    ) -> Result<(), StorageError> {
        snapshot.ops.push(Op::RemoveMembership {
            document_id: document_id.to_string(),
            user_id,
            role,
        });
        Ok(())
    }

    async fn put_link(
        &self,
        snapshot: &mut MemorySnapshot,
        record: LinkRecord,
    ) -> Result<(), StorageError> {
        snapshot.ops.push(Op::PutLink(record));
        Ok(())
    }

    async fn remove_link(
        &self,
        snapshot: &mut MemorySnapshot,
        from_id: &str,
        to_id: &str,
    ) -> Result<(), StorageError> {
        snapshot.ops.push(Op::RemoveLink {
            from_id: from_id.to_string(),
            to_id: to_id.to_string(),
        });
        Ok(())
    }

    async fn insert_event(
        &self,
        snapshot: &mut MemorySnapshot,
        record: EventRecord,
    ) -> Result<(), StorageError> {
        snapshot.ops.push(Op::InsertEvent(record));
        Ok(())
    }

    async fn enqueue_notification(
        &self,
        snapshot: &mut MemorySnapshot,
        record: NotificationRecord,
    ) -> Result<(), StorageError> {
        snapshot.ops.push(Op::EnqueueNotification(record));
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<DocumentRecord, StorageError> {
        self.state
            .read()
            .await
            .documents
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::document_not_found(id))
    }

    async fn list_versions(&self, identifier: &str) -> Result<Vec<DocumentRecord>, StorageError> {
        let state = self.state.read().await;
        let mut versions: Vec<DocumentRecord> = state
            .documents
            .values()
            .filter(|d| d.identifier == identifier)
            .cloned()
            .collect();
        versions.sort_by_key(|d| d.version);
        Ok(versions)
    }

    async fn list_documents(
        &self,
        filter: &DocumentFilter,
    ) -> Result<Vec<DocumentRecord>, StorageError> {
        let state = self.state.read().await;
        let mut docs: Vec<DocumentRecord> = state
            .documents
            .values()
            .filter(|d| filter.matches(d))
            .filter(|d| {
                filter.member.map_or(true, |user| {
                    state
                        .memberships
                        .iter()
                        .any(|m| m.document_id == d.id && m.user_id == user)
                })
            })
            .cloned()
            .collect();
        docs.sort_by(|a, b| b.updated.cmp(&a.updated).then_with(|| a.id.cmp(&b.id)));
        Ok(docs)
    }

    async fn memberships(&self, document_id: &str) -> Result<Vec<MembershipRecord>, StorageError> {
        Ok(self
            .state
            .read()
            .await
            .memberships
            .iter()
            .filter(|m| m.document_id == document_id)
            .cloned()
            .collect())
    }

    async fn memberships_of_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<MembershipRecord>, StorageError> {
        Ok(self
            .state
            .read()
            .await
            .memberships
            .iter()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn links_from(&self, document_id: &str) -> Result<Vec<LinkRecord>, StorageError> {
        Ok(self
            .state
            .read()
            .await
            .links
            .iter()
            .filter(|l| l.from_id == document_id)
            .cloned()
            .collect())
    }

    async fn links_to(&self, document_id: &str) -> Result<Vec<LinkRecord>, StorageError> {
        Ok(self
            .state
            .read()
            .await
            .links
            .iter()
            .filter(|l| l.to_id == document_id)
            .cloned()
            .collect())
    }

    async fn list_links(&self) -> Result<Vec<LinkRecord>, StorageError> {
        Ok(self.state.read().await.links.clone())
    }

    async fn events(&self, document_id: Option<&str>) -> Result<Vec<EventRecord>, StorageError> {
        Ok(self
            .state
            .read()
            .await
            .events
            .iter()
            .filter(|e| document_id.map_or(true, |id| e.document_id == id))
            .cloned()
            .collect())
    }

    async fn pending_notifications(
        &self,
        limit: usize,
    ) -> Result<Vec<NotificationRecord>, StorageError> {
        let state = self.state.read().await;
        let pending = state.notifications.iter().filter(|n| n.sent_at.is_none());
        Ok(if limit == 0 {
            pending.cloned().collect()
        } else {
            pending.take(limit).cloned().collect()
        })
    }

    async fn mark_notification_sent(&self, id: &str, sent_at: &str) -> Result<(), StorageError> {
        self.write(|state| {
            let item = state
                .notifications
                .iter_mut()
                .find(|n| n.id == id)
                .ok_or_else(|| StorageError::NotFound {
                    kind: "notification",
                    id: id.to_string(),
                })?;
            item.sent_at = Some(sent_at.to_string());
            Ok(())
        })
        .await
    }

    async fn allocate_identifier(&self, code: &str) -> Result<String, StorageError> {
        self.write(|state| {
            state.sequence += 1;
            Ok(format!("{}_{}", code, state.sequence))
        })
        .await
    }

    async fn put_blob(&self, record: BlobRecord) -> Result<BlobRecord, StorageError> {
        self.write(|state| {
            if let Some(existing) = state.blobs.values().find(|b| b.sha256 == record.sha256) {
                return Ok(existing.clone());
            }
            state.blobs.insert(record.uuid.clone(), record.clone());
            Ok(record)
        })
        .await
    }

    async fn get_blob(&self, uuid: &str) -> Result<BlobRecord, StorageError> {
        self.state
            .read()
            .await
            .blobs
            .get(uuid)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                kind: "blob",
                id: uuid.to_string(),
            })
    }

    async fn list_blobs(&self) -> Result<Vec<BlobRecord>, StorageError> {
        Ok(self.state.read().await.blobs.values().cloned().collect())
    }

    async fn delete_blob(&self, uuid: &str) -> Result<(), StorageError> {
        self.write(|state| {
            state
                .blobs
                .remove(uuid)
                .map(|_| ())
                .ok_or_else(|| StorageError::NotFound {
                    kind: "blob",
                    id: uuid.to_string(),
                })
        })
        .await
    }

    async fn put_user(&self, record: UserRecord) -> Result<(), StorageError> {
        self.write(|state| {
            state.users.insert(record.id, record);
            Ok(())
        })
        .await
    }

    async fn get_user(&self, id: UserId) -> Result<Option<UserRecord>, StorageError> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn mail_preferences(
        &self,
        user_id: UserId,
    ) -> Result<Option<MailPreferences>, StorageError> {
        Ok(self.state.read().await.mail_preferences.get(&user_id).cloned())
    }

    async fn put_mail_preferences(&self, record: MailPreferences) -> Result<(), StorageError> {
        self.write(|state| {
            state.mail_preferences.insert(record.user_id, record);
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance::make_document;

    #[tokio::test]
    async fn staged_update_is_visible_inside_snapshot_only() {
        let store = MemoryStore::new();
        let mut snap = store.begin_snapshot().await.unwrap();
        store
            .insert_document(&mut snap, make_document("d1", "sample_1", 1))
            .await
            .unwrap();
        let staged = store.get_document_for_update(&mut snap, "d1").await.unwrap();
        assert_eq!(staged.identifier, "sample_1");
        assert!(store.get_document("d1").await.is_err());
        store.commit_snapshot(snap).await.unwrap();
        assert!(store.get_document("d1").await.is_ok());
    }

    #[tokio::test]
    async fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        {
            let store = MemoryStore::open(&path).await.unwrap();
            let mut snap = store.begin_snapshot().await.unwrap();
            store
                .insert_document(&mut snap, make_document("d1", "sample_1", 1))
                .await
                .unwrap();
            store.commit_snapshot(snap).await.unwrap();
            assert_eq!(store.allocate_identifier("sample").await.unwrap(), "sample_1");
        }
        let reopened = MemoryStore::open(&path).await.unwrap();
        assert_eq!(reopened.get_document("d1").await.unwrap().version, 1);
        assert_eq!(
            reopened.allocate_identifier("sample").await.unwrap(),
            "sample_2"
        );
    }

    #[tokio::test]
    async fn blobs_are_deduplicated_by_content_hash() {
        let store = MemoryStore::new();
        let blob = |uuid: &str| BlobRecord {
            uuid: uuid.to_string(),
            sha256: "ab".repeat(32),
            content_type: "image/png".to_string(),
            size: 10,
            path: "ab/ab/abab".to_string(),
            thumbnails: BTreeMap::new(),
            created: "2025-01-01T00:00:00Z".to_string(),
        };
        let first = store.put_blob(blob("u1")).await.unwrap();
        let second = store.put_blob(blob("u2")).await.unwrap();
        assert_eq!(first.uuid, "u1");
        assert_eq!(second.uuid, "u1");
        assert_eq!(store.list_blobs().await.unwrap().len(), 1);
        store.delete_blob("u1").await.unwrap();
        assert!(store.get_blob("u1").await.is_err());
    }
}
