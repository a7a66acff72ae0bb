//! The role-gate table: who may edit, transition, fork and manage
//! memberships of a document. Nothing below the boundary re-checks roles.

use std::collections::BTreeSet;

use qcat_storage::{DocumentStatus, MembershipRecord, Role, UserId};
use serde::{Deserialize, Serialize};

use crate::error::QcatError;
use crate::events::EventKind;
use crate::viewer::{Permission, Viewer};

/// Roles `user` holds on a document.
pub fn roles_of(user: Option<UserId>, memberships: &[MembershipRecord]) -> BTreeSet<Role> {
    match user {
        Some(user) => memberships
            .iter()
            .filter(|m| m.user_id == user)
            .map(|m| m.role)
            .collect(),
        None => BTreeSet::new(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Submit,
    Review,
    RejectSubmitted,
    Publish,
    RejectReviewed,
    Delete,
}

/// One row of the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRule {
    pub action: ReviewAction,
    /// Statuses the action starts from; empty means any status except
    /// the target.
    pub from: &'static [DocumentStatus],
    pub to: DocumentStatus,
    pub roles: &'static [Role],
    pub permission: Option<Permission>,
    pub event: EventKind,
    pub message_required: bool,
}

pub const TRANSITIONS: [TransitionRule; 6] = [
    TransitionRule {
        action: ReviewAction::Submit,
        from: &[DocumentStatus::Draft],
        to: DocumentStatus::Submitted,
        roles: &[Role::Compiler],
        permission: None,
        event: EventKind::Submitted,
        message_required: false,
    },
    TransitionRule {
        action: ReviewAction::Review,
        from: &[DocumentStatus::Submitted],
        to: DocumentStatus::Reviewed,
        roles: &[Role::Reviewer],
        permission: Some(Permission::ReviewAny),
        event: EventKind::Reviewed,
        message_required: false,
    },
    TransitionRule {
        action: ReviewAction::RejectSubmitted,
        from: &[DocumentStatus::Submitted],
        to: DocumentStatus::Draft,
        roles: &[Role::Reviewer],
        permission: Some(Permission::ReviewAny),
        event: EventKind::RejectedSubmitted,
        message_required: true,
    },
    TransitionRule {
        action: ReviewAction::Publish,
        from: &[DocumentStatus::Reviewed],
        to: DocumentStatus::Public,
        roles: &[Role::Publisher],
        permission: Some(Permission::PublishAny),
        event: EventKind::Published,
        message_required: false,
    },
    TransitionRule {
        action: ReviewAction::RejectReviewed,
        from: &[DocumentStatus::Reviewed],
        to: DocumentStatus::Draft,
        roles: &[Role::Publisher],
        permission: Some(Permission::PublishAny),
        event: EventKind::RejectedReviewed,
        message_required: true,
    },
    TransitionRule {
        action: ReviewAction::Delete,
        from: &[],
        to: DocumentStatus::Inactive,
        roles: &[Role::Publisher],
        permission: Some(Permission::PublishAny),
        event: EventKind::Deleted,
        message_required: false,
    },
];

impl ReviewAction {
    pub fn rule(self) -> &'static TransitionRule {
        let row = match self {
            ReviewAction::Submit => 0,
            ReviewAction::Review => 1,
            ReviewAction::RejectSubmitted => 2,
            ReviewAction::Publish => 3,
            ReviewAction::RejectReviewed => 4,
            ReviewAction::Delete => 5,
        };
        &TRANSITIONS[row]
    }
}

fn required(roles: &[Role], permission: Option<Permission>) -> String {
    let mut names: Vec<&str> = roles.iter().map(|r| r.as_str()).collect();
    names.extend(permission.map(Permission::as_str));
    names.join(" or ")
}

fn holds(
    roles: &BTreeSet<Role>,
    viewer: &Viewer,
    needed: &[Role],
    permission: Option<Permission>,
) -> bool {
    needed.iter().any(|r| roles.contains(r)) || permission.is_some_and(|p| viewer.has(p))
}

/// Check that `viewer` may apply `action` to a document in `status`.
pub fn check_transition(
    action: ReviewAction,
    status: DocumentStatus,
    roles: &BTreeSet<Role>,
    viewer: &Viewer,
    message: Option<&str>,
) -> Result<&'static TransitionRule, QcatError> {
    let rule = action.rule();
    if !holds(roles, viewer, rule.roles, rule.permission) {
        return Err(QcatError::denied(required(rule.roles, rule.permission)));
    }
    let legal = if rule.from.is_empty() {
        status != rule.to
    } else {
        rule.from.contains(&status)
    };
    if !legal {
        return Err(QcatError::IllegalTransition {
            from: status,
            to: rule.to,
        });
    }
    if rule.message_required && message.map_or(true, |m| m.trim().is_empty()) {
        return Err(QcatError::ValidationFailed(vec![
            crate::error::FieldDiagnostic::group("message", "a message is required"),
        ]));
    }
    Ok(rule)
}

/// Check that `viewer` may edit the categories of a document in `status`.
pub fn check_edit(
    status: DocumentStatus,
    roles: &BTreeSet<Role>,
    viewer: &Viewer,
) -> Result<(), QcatError> {
    let (needed, permission): (&[Role], Option<Permission>) = match status {
        DocumentStatus::Draft => (&[Role::Compiler, Role::Editor], None),
        DocumentStatus::Submitted => (&[Role::Reviewer], Some(Permission::ReviewAny)),
        DocumentStatus::Reviewed => (&[Role::Publisher], Some(Permission::PublishAny)),
        other => {
            return Err(QcatError::IllegalTransition {
                from: other,
                to: DocumentStatus::Draft,
            })
        }
    };
    if holds(roles, viewer, needed, permission) {
        Ok(())
    } else {
        Err(QcatError::denied(required(needed, permission)))
    }
}

/// Forking a Public document into a new draft.
pub fn check_fork(
    status: DocumentStatus,
    roles: &BTreeSet<Role>,
    viewer: &Viewer,
) -> Result<(), QcatError> {
    if !holds(roles, viewer, &[Role::Compiler, Role::Editor], None) {
        return Err(QcatError::denied("compiler or editor"));
    }
    if status != DocumentStatus::Public {
        return Err(QcatError::IllegalTransition {
            from: status,
            to: DocumentStatus::Draft,
        });
    }
    Ok(())
}

/// Adding or removing a member with `role`.
pub fn check_membership(
    role: Role,
    roles: &BTreeSet<Role>,
    viewer: &Viewer,
) -> Result<(), QcatError> {
    let (needed, permissions): (&[Role], &[Permission]) = match role {
        Role::Compiler => (
            &[Role::Publisher],
            &[Permission::PublishAny, Permission::Secretariat],
        ),
        Role::Editor | Role::LandUser => (&[Role::Compiler], &[Permission::AssignAny]),
        Role::Reviewer | Role::Publisher => (
            &[Role::Publisher],
            &[Permission::AssignAny, Permission::Secretariat],
        ),
    };
    if needed.iter().any(|r| roles.contains(r)) || permissions.iter().any(|p| viewer.has(*p)) {
        return Ok(());
    }
    let mut names: Vec<&str> = needed.iter().map(|r| r.as_str()).collect();
    names.extend(permissions.iter().map(|p| p.as_str()));
    Err(QcatError::denied(names.join(" or ")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles(list: &[Role]) -> BTreeSet<Role> {
        list.iter().copied().collect()
    }

    #[test]
    fn every_action_finds_its_row() {
        for rule in &TRANSITIONS {
            assert_eq!(rule.action.rule(), rule);
        }
    }

    #[test]
    fn editors_cannot_submit() {
        let viewer = Viewer::user(2);
        let err = check_transition(
            ReviewAction::Submit,
            DocumentStatus::Draft,
            &roles(&[Role::Editor]),
            &viewer,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, QcatError::PermissionDenied { ref required_role } if required_role == "compiler"));
        assert!(check_transition(
            ReviewAction::Submit,
            DocumentStatus::Draft,
            &roles(&[Role::Compiler]),
            &viewer,
            None
        )
        .is_ok());
    }

    #[test]
    fn global_permissions_stand_in_for_membership() {
        let reviewer = Viewer::user(9).with_permission(Permission::ReviewAny);
        let rule = check_transition(
            ReviewAction::Review,
            DocumentStatus::Submitted,
            &BTreeSet::new(),
            &reviewer,
            None,
        )
        .unwrap();
        assert_eq!(rule.to, DocumentStatus::Reviewed);
        assert!(check_edit(DocumentStatus::Submitted, &BTreeSet::new(), &reviewer).is_ok());
        assert!(check_edit(DocumentStatus::Reviewed, &BTreeSet::new(), &reviewer).is_err());
    }

    #[test]
    fn transitions_from_wrong_status_are_illegal() {
        let publisher = roles(&[Role::Publisher]);
        let err = check_transition(
            ReviewAction::Publish,
            DocumentStatus::Draft,
            &publisher,
            &Viewer::user(3),
            None,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            QcatError::IllegalTransition {
                from: DocumentStatus::Draft,
                to: DocumentStatus::Public
            }
        ));
        assert!(check_transition(
            ReviewAction::Delete,
            DocumentStatus::Inactive,
            &publisher,
            &Viewer::user(3),
            None
        )
        .is_err());
    }

    #[test]
    fn rejection_needs_a_message() {
        let reviewer = roles(&[Role::Reviewer]);
        let viewer = Viewer::user(4);
        assert!(check_transition(
            ReviewAction::RejectSubmitted,
            DocumentStatus::Submitted,
            &reviewer,
            &viewer,
            Some("  ")
        )
        .is_err());
        let rule = check_transition(
            ReviewAction::RejectSubmitted,
            DocumentStatus::Submitted,
            &reviewer,
            &viewer,
            Some("needs a location"),
        )
        .unwrap();
        assert_eq!(rule.event, EventKind::RejectedSubmitted);
    }

    #[test]
    fn compiler_change_needs_publisher_or_secretariat() {
        let viewer = Viewer::user(1);
        assert!(check_membership(Role::Compiler, &roles(&[Role::Compiler]), &viewer).is_err());
        assert!(check_membership(Role::Compiler, &roles(&[Role::Publisher]), &viewer).is_ok());
        let secretariat = Viewer::user(5).with_permission(Permission::Secretariat);
        assert!(check_membership(Role::Compiler, &BTreeSet::new(), &secretariat).is_ok());
        assert!(check_membership(Role::Editor, &roles(&[Role::Compiler]), &viewer).is_ok());
    }
}
