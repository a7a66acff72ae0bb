//! Notification dispatch: drains the notification queue into mails,
//! honouring each recipient's subscription and language.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use qcat_storage::{AnswerStore, MailPreferences, MailSubscription, NotificationRecord, UserId};
use serde::Serialize;
use tracing::{info, warn};

use crate::clock::{timestamp, Clock};
use crate::error::QcatError;
use crate::events::EventKind;
use crate::settings::EngineSettings;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingMail {
    pub recipient: UserId,
    pub to: String,
    pub language: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), QcatError>;
}

/// Writes mails to the log instead of sending them.
#[derive(Debug, Default)]
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), QcatError> {
        info!(to = %mail.to, subject = %mail.subject, "mail");
        Ok(())
    }
}

/// Keeps sent mails in memory.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    sent: Mutex<Vec<OutgoingMail>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        MemoryTransport::default()
    }

    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl MailTransport for MemoryTransport {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), QcatError> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(mail.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub sent: usize,
    /// Dropped because of the recipient's subscription or a missing address.
    pub skipped: usize,
    /// Left in the queue after a transport failure.
    pub failed: usize,
}

fn subject(kind: EventKind, identifier: &str, language: &str) -> String {
    let (en, es, fr) = match kind {
        EventKind::Submitted => ("was submitted for review", "fue enviado a revisión", "a été soumis pour révision"),
        EventKind::Reviewed => ("was reviewed", "fue revisado", "a été révisé"),
        EventKind::Published => ("was published", "fue publicado", "a été publié"),
        EventKind::Deleted => ("was deleted", "fue eliminado", "a été supprimé"),
        EventKind::RejectedSubmitted | EventKind::RejectedReviewed => (
            "was returned for revision",
            "fue devuelto para corrección",
            "a été renvoyé pour correction",
        ),
        EventKind::Edited => ("was edited", "fue editado", "a été modifié"),
        EventKind::CompilerAdded
        | EventKind::EditorAdded
        | EventKind::ReviewerAdded
        | EventKind::PublisherAdded => ("now lists you as a member", "le incluye como miembro", "vous compte comme membre"),
        EventKind::CompilerRemoved
        | EventKind::EditorRemoved
        | EventKind::ReviewerRemoved
        | EventKind::PublisherRemoved => (
            "no longer lists you as a member",
            "ya no le incluye como miembro",
            "ne vous compte plus comme membre",
        ),
    };
    let phrase = match language {
        "es" => es,
        "fr" => fr,
        _ => en,
    };
    format!("{} {}", identifier, phrase)
}

pub struct MailDispatcher<S: AnswerStore> {
    store: Arc<S>,
    transport: Arc<dyn MailTransport>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
}

impl<S: AnswerStore> MailDispatcher<S> {
    pub fn new(
        store: Arc<S>,
        transport: Arc<dyn MailTransport>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        MailDispatcher {
            store,
            transport,
            clock,
            settings,
        }
    }

    async fn preferences(&self, user: UserId) -> Result<MailPreferences, QcatError> {
        Ok(self
            .store
            .mail_preferences(user)
            .await?
            .unwrap_or_else(|| MailPreferences {
                user_id: user,
                subscription: MailSubscription::All,
                language: "en".to_string(),
            }))
    }

    /// Render the mail for one queued notification.
    pub async fn render(
        &self,
        notification: &NotificationRecord,
        language: &str,
    ) -> Result<Option<OutgoingMail>, QcatError> {
        let Some(kind) = EventKind::parse(&notification.kind) else {
            return Ok(None);
        };
        let Some(user) = self.store.get_user(notification.recipient).await? else {
            return Ok(None);
        };
        if user.email.trim().is_empty() {
            return Ok(None);
        }
        let actor = match notification.actor {
            Some(id) => self
                .store
                .get_user(id)
                .await?
                .map(|u| u.display_name())
                .unwrap_or_else(|| format!("user {}", id)),
            None => "QCAT".to_string(),
        };
        let url = self
            .settings
            .document_url(&notification.configuration, &notification.identifier);
        let mut body = format!(
            "Dear {},\n\n{} ({}): {}\n",
            user.display_name(),
            subject(kind, &notification.identifier, language),
            actor,
            kind
        );
        if let Some(message) = &notification.message {
            body.push_str(&format!("\n{}\n", message));
        }
        body.push_str(&format!("\n{}\n", url));
        Ok(Some(OutgoingMail {
            recipient: user.id,
            to: user.email,
            language: language.to_string(),
            subject: subject(kind, &notification.identifier, language),
            body,
        }))
    }

    /// Send up to `limit` queued notifications.
    pub async fn dispatch(&self, limit: usize) -> Result<DispatchReport, QcatError> {
        let mut report = DispatchReport::default();
        for notification in self.store.pending_notifications(limit).await? {
            let preferences = self.preferences(notification.recipient).await?;
            let wanted = match preferences.subscription {
                MailSubscription::All => true,
                MailSubscription::TodoOnly => {
                    EventKind::parse(&notification.kind).is_some_and(EventKind::is_todo)
                }
                MailSubscription::None => false,
            };
            let mail = if wanted {
                self.render(&notification, &preferences.language).await?
            } else {
                None
            };
            let now = timestamp(self.clock.now());
            match mail {
                None => {
                    report.skipped += 1;
                    self.store.mark_notification_sent(&notification.id, &now).await?;
                }
                Some(mail) => match self.transport.send(&mail).await {
                    Ok(()) => {
                        report.sent += 1;
                        self.store.mark_notification_sent(&notification.id, &now).await?;
                    }
                    Err(e) => {
                        warn!(notification = %notification.id, recipient = notification.recipient, error = %e, "mail not sent");
                        report.failed += 1;
                    }
                },
            }
        }
        if report != DispatchReport::default() {
            info!(sent = report.sent, skipped = report.skipped, failed = report.failed, "notifications dispatched");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use qcat_storage::{MemoryStore, UserRecord};

    fn notification(id: &str, kind: EventKind, recipient: UserId) -> NotificationRecord {
        NotificationRecord {
            id: id.to_string(),
            event_id: format!("e-{}", id),
            kind: kind.as_str().to_string(),
            recipient,
            document_id: "d1".to_string(),
            identifier: "sample_1".to_string(),
            configuration: "sample".to_string(),
            actor: Some(1),
            message: Some("please review".to_string()),
            created: "2025-01-01T00:00:00.000000Z".to_string(),
            sent_at: None,
        }
    }

    fn user(id: UserId) -> UserRecord {
        UserRecord {
            id,
            email: format!("user{}@example.org", id),
            first_name: format!("First{}", id),
            last_name: "Last".to_string(),
            permissions: Vec::new(),
            updated: "2025-01-01T00:00:00.000000Z".to_string(),
        }
    }

    #[tokio::test]
    async fn honours_subscriptions_and_drains_the_queue() {
        let store = Arc::new(MemoryStore::new());
        for id in [1, 2, 3] {
            store.put_user(user(id)).await.unwrap();
        }
        store
            .put_mail_preferences(MailPreferences {
                user_id: 3,
                subscription: MailSubscription::TodoOnly,
                language: "es".to_string(),
            })
            .await
            .unwrap();
        let mut snap = store.begin_snapshot().await.unwrap();
        store.enqueue_notification(&mut snap, notification("n1", EventKind::EditorAdded, 2)).await.unwrap();
        store.enqueue_notification(&mut snap, notification("n2", EventKind::Published, 3)).await.unwrap();
        store.enqueue_notification(&mut snap, notification("n3", EventKind::Submitted, 3)).await.unwrap();
        store.commit_snapshot(snap).await.unwrap();

        let transport = Arc::new(MemoryTransport::new());
        let dispatcher = MailDispatcher::new(
            store.clone(),
            transport.clone(),
            Arc::new(SystemClock),
            EngineSettings::default(),
        );
        let report = dispatcher.dispatch(100).await.unwrap();
        assert_eq!(report, DispatchReport { sent: 2, skipped: 1, failed: 0 });

        let sent = transport.sent();
        assert_eq!(sent[0].to, "user2@example.org");
        assert!(sent[0].body.contains("please review"));
        assert!(sent[0].body.contains("http://localhost:8000/sample/view/sample_1/"));
        assert_eq!(sent[1].subject, "sample_1 fue enviado a revisión");
        assert!(store.pending_notifications(100).await.unwrap().is_empty());
    }
}
