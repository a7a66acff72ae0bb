//! Event Bus: workflow and membership events delivered to durable sinks.
//!
//! Events are published after the state change they describe has been
//! committed. A failing sink is logged and skipped; it never fails the
//! operation that produced the event.

use std::sync::Arc;

use async_trait::async_trait;
use qcat_storage::{
    AnswerStore, DocumentRecord, EventRecord, MembershipRecord, NotificationRecord, Role, UserId,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::QcatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Submitted,
    Reviewed,
    Published,
    Deleted,
    RejectedSubmitted,
    RejectedReviewed,
    Edited,
    CompilerAdded,
    CompilerRemoved,
    EditorAdded,
    EditorRemoved,
    ReviewerAdded,
    ReviewerRemoved,
    PublisherAdded,
    PublisherRemoved,
}

impl EventKind {
    pub const ALL: [EventKind; 15] = [
        EventKind::Submitted,
        EventKind::Reviewed,
        EventKind::Published,
        EventKind::Deleted,
        EventKind::RejectedSubmitted,
        EventKind::RejectedReviewed,
        EventKind::Edited,
        EventKind::CompilerAdded,
        EventKind::CompilerRemoved,
        EventKind::EditorAdded,
        EventKind::EditorRemoved,
        EventKind::ReviewerAdded,
        EventKind::ReviewerRemoved,
        EventKind::PublisherAdded,
        EventKind::PublisherRemoved,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Submitted => "submitted",
            EventKind::Reviewed => "reviewed",
            EventKind::Published => "published",
            EventKind::Deleted => "deleted",
            EventKind::RejectedSubmitted => "rejected_submitted",
            EventKind::RejectedReviewed => "rejected_reviewed",
            EventKind::Edited => "edited",
            EventKind::CompilerAdded => "compiler_added",
            EventKind::CompilerRemoved => "compiler_removed",
            EventKind::EditorAdded => "editor_added",
            EventKind::EditorRemoved => "editor_removed",
            EventKind::ReviewerAdded => "reviewer_added",
            EventKind::ReviewerRemoved => "reviewer_removed",
            EventKind::PublisherAdded => "publisher_added",
            EventKind::PublisherRemoved => "publisher_removed",
        }
    }

    pub fn parse(s: &str) -> Option<EventKind> {
        EventKind::ALL.into_iter().find(|k| k.as_str() == s)
    }

    /// Membership event for adding or removing `role`. Land users are not
    /// announced.
    pub fn membership(role: Role, added: bool) -> Option<EventKind> {
        Some(match (role, added) {
            (Role::Compiler, true) => EventKind::CompilerAdded,
            (Role::Compiler, false) => EventKind::CompilerRemoved,
            (Role::Editor, true) => EventKind::EditorAdded,
            (Role::Editor, false) => EventKind::EditorRemoved,
            (Role::Reviewer, true) => EventKind::ReviewerAdded,
            (Role::Reviewer, false) => EventKind::ReviewerRemoved,
            (Role::Publisher, true) => EventKind::PublisherAdded,
            (Role::Publisher, false) => EventKind::PublisherRemoved,
            (Role::LandUser, _) => return None,
        })
    }

    pub fn is_membership(self) -> bool {
        matches!(
            self,
            EventKind::CompilerAdded
                | EventKind::CompilerRemoved
                | EventKind::EditorAdded
                | EventKind::EditorRemoved
                | EventKind::ReviewerAdded
                | EventKind::ReviewerRemoved
                | EventKind::PublisherAdded
                | EventKind::PublisherRemoved
        )
    }

    /// Events that ask the recipient to do something.
    pub fn is_todo(self) -> bool {
        matches!(
            self,
            EventKind::Submitted
                | EventKind::Reviewed
                | EventKind::RejectedSubmitted
                | EventKind::RejectedReviewed
                | EventKind::CompilerAdded
                | EventKind::EditorAdded
                | EventKind::ReviewerAdded
                | EventKind::PublisherAdded
        )
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub id: String,
    pub kind: EventKind,
    pub document_id: String,
    pub identifier: String,
    pub configuration: String,
    pub actor: Option<UserId>,
    pub affected_user: Option<UserId>,
    pub role: Option<Role>,
    pub message: Option<String>,
    pub timestamp: String,
    pub recipients: Vec<UserId>,
}

impl Event {
    pub fn new(kind: EventKind, doc: &DocumentRecord, actor: Option<UserId>, timestamp: &str) -> Self {
        Event {
            id: Uuid::new_v4().to_string(),
            kind,
            document_id: doc.id.clone(),
            identifier: doc.identifier.clone(),
            configuration: doc.configuration.code.clone(),
            actor,
            affected_user: None,
            role: None,
            message: None,
            timestamp: timestamp.to_string(),
            recipients: Vec::new(),
        }
    }

    pub fn with_message(mut self, message: Option<&str>) -> Self {
        self.message = message
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string);
        self
    }

    pub fn affecting(mut self, user: UserId, role: Role) -> Self {
        self.affected_user = Some(user);
        self.role = Some(role);
        self
    }

    /// Fill `recipients` from the document's memberships.
    pub fn addressed(mut self, memberships: &[MembershipRecord]) -> Self {
        self.recipients = recipients(self.kind, self.actor, self.affected_user, memberships);
        self
    }

    pub fn to_record(&self) -> EventRecord {
        EventRecord {
            id: self.id.clone(),
            kind: self.kind.as_str().to_string(),
            document_id: self.document_id.clone(),
            identifier: self.identifier.clone(),
            actor: self.actor,
            affected_user: self.affected_user,
            role: self.role,
            message: self.message.clone(),
            timestamp: self.timestamp.clone(),
        }
    }
}

/// Who gets notified about an event.
///
/// Membership events go to the affected user. `Edited` goes to the
/// compilers. Status events go to every editorial member. The actor is
/// never notified about their own action.
pub fn recipients(
    kind: EventKind,
    actor: Option<UserId>,
    affected: Option<UserId>,
    memberships: &[MembershipRecord],
) -> Vec<UserId> {
    let mut out: Vec<UserId> = if kind.is_membership() {
        affected.into_iter().collect()
    } else if kind == EventKind::Edited {
        memberships
            .iter()
            .filter(|m| m.role == Role::Compiler)
            .map(|m| m.user_id)
            .collect()
    } else {
        memberships
            .iter()
            .filter(|m| m.role != Role::LandUser)
            .map(|m| m.user_id)
            .collect()
    };
    out.retain(|u| Some(*u) != actor);
    out.sort_unstable();
    out.dedup();
    out
}

#[async_trait]
pub trait EventSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, events: &[Event]) -> Result<(), QcatError>;
}

/// Appends events to the activity log of the store.
pub struct ActivityLogSink<S: AnswerStore> {
    store: Arc<S>,
}

impl<S: AnswerStore> ActivityLogSink<S> {
    pub fn new(store: Arc<S>) -> Self {
        ActivityLogSink { store }
    }
}

#[async_trait]
impl<S: AnswerStore> EventSink for ActivityLogSink<S> {
    fn name(&self) -> &'static str {
        "activity_log"
    }

    async fn deliver(&self, events: &[Event]) -> Result<(), QcatError> {
        let mut snapshot = self.store.begin_snapshot().await?;
        for event in events {
            self.store.insert_event(&mut snapshot, event.to_record()).await?;
        }
        self.store.commit_snapshot(snapshot).await?;
        Ok(())
    }
}

/// Queues one notification per recipient for the mail dispatcher.
pub struct NotificationQueueSink<S: AnswerStore> {
    store: Arc<S>,
}

impl<S: AnswerStore> NotificationQueueSink<S> {
    pub fn new(store: Arc<S>) -> Self {
        NotificationQueueSink { store }
    }
}

#[async_trait]
impl<S: AnswerStore> EventSink for NotificationQueueSink<S> {
    fn name(&self) -> &'static str {
        "notification_queue"
    }

    async fn deliver(&self, events: &[Event]) -> Result<(), QcatError> {
        let mut snapshot = self.store.begin_snapshot().await?;
        for event in events {
            for recipient in &event.recipients {
                let record = NotificationRecord {
                    id: Uuid::new_v4().to_string(),
                    event_id: event.id.clone(),
                    kind: event.kind.as_str().to_string(),
                    recipient: *recipient,
                    document_id: event.document_id.clone(),
                    identifier: event.identifier.clone(),
                    configuration: event.configuration.clone(),
                    actor: event.actor,
                    message: event.message.clone(),
                    created: event.timestamp.clone(),
                    sent_at: None,
                };
                self.store.enqueue_notification(&mut snapshot, record).await?;
            }
        }
        self.store.commit_snapshot(snapshot).await?;
        Ok(())
    }
}

/// In-process publisher fanning events out to its sinks in order.
#[derive(Clone, Default)]
pub struct EventBus {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus::default()
    }

    /// Activity log and notification queue, both backed by `store`.
    pub fn for_store<S: AnswerStore>(store: Arc<S>) -> Self {
        EventBus::new()
            .with_sink(Arc::new(ActivityLogSink::new(store.clone())))
            .with_sink(Arc::new(NotificationQueueSink::new(store)))
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub async fn publish(&self, events: &[Event]) {
        if events.is_empty() {
            return;
        }
        for sink in &self.sinks {
            match sink.deliver(events).await {
                Ok(()) => debug!(sink = sink.name(), count = events.len(), "events delivered"),
                Err(e) => warn!(sink = sink.name(), error = %e, "event sink failed; events dropped"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qcat_storage::conformance::make_document;
    use qcat_storage::MemoryStore;

    struct FailingSink;

    #[async_trait]
    impl EventSink for FailingSink {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn deliver(&self, _events: &[Event]) -> Result<(), QcatError> {
            Err(QcatError::ExternalUnavailable("mail relay down".to_string()))
        }
    }

    fn member(user: UserId, role: Role) -> MembershipRecord {
        MembershipRecord {
            document_id: "d1".to_string(),
            user_id: user,
            role,
        }
    }

    #[test]
    fn kinds_round_trip_through_their_names() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::membership(Role::LandUser, true), None);
    }

    #[test]
    fn recipient_rules() {
        let members = [
            member(1, Role::Compiler),
            member(2, Role::Editor),
            member(3, Role::Reviewer),
            member(4, Role::LandUser),
        ];
        assert_eq!(
            recipients(EventKind::Submitted, Some(1), None, &members),
            vec![2, 3]
        );
        assert_eq!(
            recipients(EventKind::EditorAdded, Some(1), Some(2), &members),
            vec![2]
        );
        assert_eq!(recipients(EventKind::Edited, Some(2), None, &members), vec![1]);
        assert!(recipients(EventKind::Edited, Some(1), None, &members).is_empty());
    }

    #[tokio::test]
    async fn failing_sink_does_not_stop_other_sinks() {
        let store = Arc::new(MemoryStore::new());
        let bus = EventBus::new()
            .with_sink(Arc::new(FailingSink))
            .with_sink(Arc::new(ActivityLogSink::new(store.clone())))
            .with_sink(Arc::new(NotificationQueueSink::new(store.clone())));
        let doc = make_document("d1", "sample_1", 1);
        let event = Event::new(EventKind::EditorAdded, &doc, Some(1), "2025-01-01T00:00:00.000000Z")
            .with_message(Some("please review"))
            .affecting(2, Role::Editor)
            .addressed(&[member(1, Role::Compiler)]);
        bus.publish(&[event]).await;

        let log = store.events(Some("d1")).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].kind, "editor_added");
        assert_eq!(log[0].message.as_deref(), Some("please review"));
        let queued = store.pending_notifications(0).await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].recipient, 2);
    }
}
