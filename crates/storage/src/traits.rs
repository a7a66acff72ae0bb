use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::{
    BlobRecord, DocumentFilter, DocumentRecord, EventRecord, LinkRecord, MailPreferences,
    MembershipRecord, NotificationRecord, Role, UserId, UserRecord,
};

/// The storage trait for QCAT answer documents.
///
/// An `AnswerStore` is the single source of truth for answer documents,
/// their memberships and links, the activity log and the notification
/// queue. The search index is derived from it.
///
/// ## Snapshot Semantics
///
/// All mutating operations on documents and their relations take
/// `&mut Self::Snapshot`, an in-progress transaction:
///
/// 1. `begin_snapshot()` — start a transaction
/// 2. Call mutating methods with `&mut snapshot`
/// 3. `commit_snapshot(snapshot)` — apply every mutation atomically
///    OR `abort_snapshot(snapshot)` — discard them
///
/// Dropping a `Snapshot` without committing discards it. Uncommitted
/// mutations are invisible to the query methods.
///
/// ## OCC Conflict Detection
///
/// `update_document` succeeds only if the stored `revision` equals
/// `expected_revision`. Implementations check this when the update is
/// staged and again at commit; either check may return
/// `StorageError::ConcurrentConflict`.
///
/// ## Configuration Freeze
///
/// Once a stored document has left Draft, an update that changes its
/// `configuration` fails with `StorageError::ConfigurationFrozen`.
#[async_trait]
pub trait AnswerStore: Send + Sync + 'static {
    /// The snapshot (transaction) type used by this storage backend.
    type Snapshot: Send;

    // ── Snapshot lifecycle ────────────────────────────────────────────────────

    async fn begin_snapshot(&self) -> Result<Self::Snapshot, StorageError>;

    async fn commit_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    async fn abort_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    // ── Document operations (within snapshot) ────────────────────────────────

    /// Insert a new document. Fails with `AlreadyExists` on a duplicate id.
    async fn insert_document(
        &self,
        snapshot: &mut Self::Snapshot,
        record: DocumentRecord,
    ) -> Result<(), StorageError>;

    /// Read a document, seeing writes already staged in this snapshot.
    async fn get_document_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        id: &str,
    ) -> Result<DocumentRecord, StorageError>;

    /// Replace a document if its stored revision equals
    /// `expected_revision`. Returns the new revision.
    async fn update_document(
        &self,
        snapshot: &mut Self::Snapshot,
        record: DocumentRecord,
        expected_revision: i64,
    ) -> Result<i64, StorageError>;

    // ── Relations (within snapshot) ──────────────────────────────────────────

    /// Add a membership. Adding an existing membership is a no-op.
    async fn put_membership(
        &self,
        snapshot: &mut Self::Snapshot,
        record: MembershipRecord,
    ) -> Result<(), StorageError>;

    /// Remove a membership. Removing an absent membership is a no-op.
    async fn remove_membership(
        &self,
        snapshot: &mut Self::Snapshot,
        document_id: &str,
        user_id: UserId,
        role: Role,
    ) -> Result<(), StorageError>;

    /// Insert or re-stamp the directed edge `from_id → to_id`. At most one
    /// edge exists per ordered pair.
    async fn put_link(
        &self,
        snapshot: &mut Self::Snapshot,
        record: LinkRecord,
    ) -> Result<(), StorageError>;

    /// Remove the directed edge `from_id → to_id` if present.
    async fn remove_link(
        &self,
        snapshot: &mut Self::Snapshot,
        from_id: &str,
        to_id: &str,
    ) -> Result<(), StorageError>;

    /// Append to the activity log.
    async fn insert_event(
        &self,
        snapshot: &mut Self::Snapshot,
        record: EventRecord,
    ) -> Result<(), StorageError>;

    /// Append to the notification queue.
    async fn enqueue_notification(
        &self,
        snapshot: &mut Self::Snapshot,
        record: NotificationRecord,
    ) -> Result<(), StorageError>;

    // ── Query operations ──────────────────────────────────────────────────────

    async fn get_document(&self, id: &str) -> Result<DocumentRecord, StorageError>;

    /// All versions sharing `identifier`, oldest first.
    async fn list_versions(&self, identifier: &str) -> Result<Vec<DocumentRecord>, StorageError>;

    async fn list_documents(
        &self,
        filter: &DocumentFilter,
    ) -> Result<Vec<DocumentRecord>, StorageError>;

    async fn memberships(&self, document_id: &str)
        -> Result<Vec<MembershipRecord>, StorageError>;

    async fn memberships_of_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<MembershipRecord>, StorageError>;

    async fn links_from(&self, document_id: &str) -> Result<Vec<LinkRecord>, StorageError>;

    async fn links_to(&self, document_id: &str) -> Result<Vec<LinkRecord>, StorageError>;

    async fn list_links(&self) -> Result<Vec<LinkRecord>, StorageError>;

    /// Activity log, oldest first; `None` returns every event.
    async fn events(&self, document_id: Option<&str>) -> Result<Vec<EventRecord>, StorageError>;

    // ── Notification queue ────────────────────────────────────────────────────

    /// Undispatched notifications, oldest first (`limit` 0 = no limit).
    async fn pending_notifications(
        &self,
        limit: usize,
    ) -> Result<Vec<NotificationRecord>, StorageError>;

    async fn mark_notification_sent(&self, id: &str, sent_at: &str) -> Result<(), StorageError>;

    // ── Identifiers ───────────────────────────────────────────────────────────

    /// Allocate a fresh identifier `<code>_<n>`. Numbers are never reused.
    async fn allocate_identifier(&self, code: &str) -> Result<String, StorageError>;

    // ── Blobs, users, preferences ─────────────────────────────────────────────

    /// Store blob metadata. A blob with the same SHA-256 is returned
    /// instead of creating a duplicate.
    async fn put_blob(&self, record: BlobRecord) -> Result<BlobRecord, StorageError>;

    async fn get_blob(&self, uuid: &str) -> Result<BlobRecord, StorageError>;

    async fn list_blobs(&self) -> Result<Vec<BlobRecord>, StorageError>;

    async fn delete_blob(&self, uuid: &str) -> Result<(), StorageError>;

    async fn put_user(&self, record: UserRecord) -> Result<(), StorageError>;

    async fn get_user(&self, id: UserId) -> Result<Option<UserRecord>, StorageError>;

    async fn mail_preferences(&self, user_id: UserId)
        -> Result<Option<MailPreferences>, StorageError>;

    async fn put_mail_preferences(&self, record: MailPreferences) -> Result<(), StorageError>;
}
