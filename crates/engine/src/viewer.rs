use std::collections::BTreeSet;

use qcat_storage::{UserId, UserRecord};
use serde::{Deserialize, Serialize};

/// Global permissions granted by the directory, independent of any
/// document membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ReviewAny,
    PublishAny,
    AssignAny,
    Secretariat,
}

impl Permission {
    pub fn as_str(self) -> &'static str {
        match self {
            Permission::ReviewAny => "review_any",
            Permission::PublishAny => "publish_any",
            Permission::AssignAny => "assign_any",
            Permission::Secretariat => "secretariat",
        }
    }

    pub fn parse(s: &str) -> Option<Permission> {
        match s {
            "review_any" => Some(Permission::ReviewAny),
            "publish_any" => Some(Permission::PublishAny),
            "assign_any" => Some(Permission::AssignAny),
            "secretariat" => Some(Permission::Secretariat),
            _ => None,
        }
    }
}

/// Whoever is making a request. Anonymous viewers have no user id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewer {
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub permissions: BTreeSet<Permission>,
}

impl Viewer {
    pub fn anonymous() -> Self {
        Viewer::default()
    }

    pub fn user(id: UserId) -> Self {
        Viewer {
            user_id: Some(id),
            permissions: BTreeSet::new(),
        }
    }

    /// Viewer for a cached directory user; unknown permission names are
    /// ignored.
    pub fn from_record(record: &UserRecord) -> Self {
        Viewer {
            user_id: Some(record.id),
            permissions: record
                .permissions
                .iter()
                .filter_map(|p| Permission::parse(p))
                .collect(),
        }
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permissions.insert(permission);
        self
    }

    pub fn has(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_none()
    }
}
