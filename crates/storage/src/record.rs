use qcat_interchange::ConfigurationRef;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Numeric user id as issued by the external directory.
pub type UserId = u64;

/// Review status of an answer document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Draft,
    Submitted,
    Reviewed,
    Public,
    Rejected,
    Inactive,
}

impl DocumentStatus {
    pub const ALL: [DocumentStatus; 6] = [
        DocumentStatus::Draft,
        DocumentStatus::Submitted,
        DocumentStatus::Reviewed,
        DocumentStatus::Public,
        DocumentStatus::Rejected,
        DocumentStatus::Inactive,
    ];

    /// Draft or one of the review states.
    pub fn is_editable_chain(self) -> bool {
        matches!(
            self,
            DocumentStatus::Draft | DocumentStatus::Submitted | DocumentStatus::Reviewed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::Submitted => "submitted",
            DocumentStatus::Reviewed => "reviewed",
            DocumentStatus::Public => "public",
            DocumentStatus::Rejected => "rejected",
            DocumentStatus::Inactive => "inactive",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Membership roles on a single document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Compiler,
    Editor,
    Reviewer,
    Publisher,
    LandUser,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Compiler => "compiler",
            Role::Editor => "editor",
            Role::Reviewer => "reviewer",
            Role::Publisher => "publisher",
            Role::LandUser => "land_user",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// "Carried-over field requires attention" marker left by an edition
/// migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldAnnotation {
    pub questiongroup: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    pub message: String,
}

/// One version of an answer document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Internal id (UUID string); also the search index document id.
    pub id: String,
    /// Stable code shared by all versions, e.g. `sample_3`.
    pub identifier: String,
    pub version: u32,
    pub status: DocumentStatus,
    pub configuration: ConfigurationRef,
    pub original_language: String,
    pub translation_languages: Vec<String>,
    /// RFC 3339 timestamp string.
    pub created: String,
    /// RFC 3339 timestamp string.
    pub updated: String,
    pub blocked_by: Option<UserId>,
    /// RFC 3339 timestamp string after which the edit lock is stale.
    pub blocked_until: Option<String>,
    /// OCC counter, bumped by every `update_document`.
    pub revision: i64,
    /// Questiongroup keyword → list of instances.
    pub payload: serde_json::Value,
    /// Document this version was forked from.
    pub previous_id: Option<String>,
    #[serde(default)]
    pub annotations: Vec<FieldAnnotation>,
    /// Identifiers the source version linked to when this one was forked.
    #[serde(default)]
    pub forked_links: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MembershipRecord {
    pub document_id: String,
    pub user_id: UserId,
    pub role: Role,
}

/// One directed half of a symmetric link.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkRecord {
    pub from_id: String,
    pub from_status: DocumentStatus,
    pub to_id: String,
    pub to_status: DocumentStatus,
}

impl LinkRecord {
    /// The counterpart edge with mirrored statuses.
    pub fn mirrored(&self) -> LinkRecord {
        LinkRecord {
            from_id: self.to_id.clone(),
            from_status: self.to_status,
            to_id: self.from_id.clone(),
            to_status: self.from_status,
        }
    }
}

/// Append-only activity log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub kind: String,
    pub document_id: String,
    pub identifier: String,
    pub actor: Option<UserId>,
    pub affected_user: Option<UserId>,
    pub role: Option<Role>,
    pub message: Option<String>,
    /// RFC 3339 timestamp string.
    pub timestamp: String,
}

/// Queued notification for one recipient, drained by the mail dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: String,
    pub event_id: String,
    pub kind: String,
    pub recipient: UserId,
    pub document_id: String,
    pub identifier: String,
    pub configuration: String,
    pub actor: Option<UserId>,
    pub message: Option<String>,
    /// RFC 3339 timestamp string.
    pub created: String,
    /// RFC 3339 timestamp string; `None` until dispatched.
    pub sent_at: Option<String>,
}

/// Content-addressed file or image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobRecord {
    pub uuid: String,
    /// Hex SHA-256 of the content.
    pub sha256: String,
    pub content_type: String,
    pub size: u64,
    pub path: String,
    /// Size tag → derived thumbnail path.
    pub thumbnails: BTreeMap<String, String>,
    pub created: String,
}

/// Cached copy of a directory user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// Global permissions (`review_any`, `publish_any`, ...).
    #[serde(default)]
    pub permissions: Vec<String>,
    pub updated: String,
}

impl UserRecord {
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if full.is_empty() {
            self.email.clone()
        } else {
            full.to_string()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailSubscription {
    #[default]
    All,
    /// Only notifications that require an action from the recipient.
    TodoOnly,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailPreferences {
    pub user_id: UserId,
    pub subscription: MailSubscription,
    pub language: String,
}

/// Query filter for `list_documents`. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
    pub configuration_code: Option<String>,
    pub identifier: Option<String>,
    pub statuses: Vec<DocumentStatus>,
    /// Only documents where this user holds any membership.
    pub member: Option<UserId>,
}

impl DocumentFilter {
    pub fn matches(&self, doc: &DocumentRecord) -> bool {
        self.configuration_code
            .as_ref()
            .map_or(true, |c| &doc.configuration.code == c)
            && self.identifier.as_ref().map_or(true, |i| &doc.identifier == i)
            && (self.statuses.is_empty() || self.statuses.contains(&doc.status))
    }
}
