//! Which versions of a document a viewer may see.

use std::collections::BTreeSet;

use qcat_storage::{DocumentRecord, DocumentStatus, Role};
use serde::{Deserialize, Serialize};

use crate::viewer::{Permission, Viewer};

/// Which version of an identifier to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "selector", content = "version")]
pub enum Selector {
    Public,
    LatestForUser,
    Version(u32),
}

pub fn can_view(status: DocumentStatus, roles: &BTreeSet<Role>, viewer: &Viewer) -> bool {
    let member = |needed: &[Role]| needed.iter().any(|r| roles.contains(r));
    match status {
        DocumentStatus::Public => true,
        DocumentStatus::Draft | DocumentStatus::Rejected => member(&[Role::Compiler, Role::Editor]),
        DocumentStatus::Submitted => {
            member(&[Role::Compiler, Role::Editor, Role::Reviewer])
                || viewer.has(Permission::ReviewAny)
        }
        DocumentStatus::Reviewed => {
            member(&[Role::Compiler, Role::Editor, Role::Publisher])
                || viewer.has(Permission::PublishAny)
        }
        DocumentStatus::Inactive => false,
    }
}

/// Whether the viewer may edit some version of the identifier, which
/// decides how links to it are resolved.
pub fn has_edit_privileges(roles: &BTreeSet<Role>) -> bool {
    roles.contains(&Role::Compiler) || roles.contains(&Role::Editor)
}

/// Pick a version out of `versions` (oldest first, each with the viewer's
/// roles on it).
pub fn select<'a>(
    versions: &'a [(DocumentRecord, BTreeSet<Role>)],
    selector: Selector,
    viewer: &Viewer,
) -> Option<&'a DocumentRecord> {
    let public = || {
        versions
            .iter()
            .map(|(doc, _)| doc)
            .find(|doc| doc.status == DocumentStatus::Public)
    };
    match selector {
        Selector::Public => public(),
        Selector::LatestForUser => versions
            .iter()
            .rev()
            .find(|(doc, roles)| {
                doc.status != DocumentStatus::Inactive && can_view(doc.status, roles, viewer)
            })
            .map(|(doc, _)| doc)
            .or_else(public),
        Selector::Version(v) => versions
            .iter()
            .find(|(doc, roles)| doc.version == v && can_view(doc.status, roles, viewer))
            .map(|(doc, _)| doc),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qcat_storage::conformance::make_document;

    fn version(v: u32, status: DocumentStatus, roles: &[Role]) -> (DocumentRecord, BTreeSet<Role>) {
        let mut doc = make_document(&format!("d{}", v), "sample_1", v);
        doc.status = status;
        (doc, roles.iter().copied().collect())
    }

    #[test]
    fn anonymous_viewers_only_see_public() {
        let versions = vec![
            version(1, DocumentStatus::Public, &[]),
            version(2, DocumentStatus::Draft, &[]),
        ];
        let viewer = Viewer::anonymous();
        assert_eq!(select(&versions, Selector::LatestForUser, &viewer).unwrap().version, 1);
        assert!(select(&versions, Selector::Version(2), &viewer).is_none());
    }

    #[test]
    fn members_see_their_newest_draft() {
        let versions = vec![
            version(1, DocumentStatus::Public, &[Role::Compiler]),
            version(2, DocumentStatus::Submitted, &[Role::Compiler]),
        ];
        let viewer = Viewer::user(1);
        assert_eq!(select(&versions, Selector::LatestForUser, &viewer).unwrap().version, 2);
        assert_eq!(select(&versions, Selector::Public, &viewer).unwrap().version, 1);
    }

    #[test]
    fn review_states_follow_global_permissions() {
        let none = BTreeSet::new();
        let reviewer = Viewer::user(3).with_permission(Permission::ReviewAny);
        assert!(can_view(DocumentStatus::Submitted, &none, &reviewer));
        assert!(!can_view(DocumentStatus::Reviewed, &none, &reviewer));
        assert!(!can_view(DocumentStatus::Inactive, &none, &reviewer));
    }
}
