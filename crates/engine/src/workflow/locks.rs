//! Identifier-scoped serialisation and the per-document edit lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use qcat_storage::{DocumentRecord, DocumentStatus, UserId};
use time::OffsetDateTime;
use tokio::sync::OwnedMutexGuard;

use crate::clock::parse_timestamp;
use crate::error::QcatError;

/// Serialises transitions, link reconciliation and step commits per
/// identifier. Readers never take these locks.
#[derive(Default)]
pub struct IdentifierLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl IdentifierLocks {
    pub fn new() -> Self {
        IdentifierLocks::default()
    }

    pub async fn lock(&self, identifier: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            Arc::clone(
                locks
                    .entry(identifier.to_string())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };
        lock.lock_owned().await
    }
}

/// State of the edit lock across the versions of an identifier, as seen
/// by a user about to edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    Free,
    /// Already held by the same user.
    Held,
    /// Held by someone else whose lock has expired.
    Abandoned { previous: UserId },
}

fn held_until(doc: &DocumentRecord) -> Option<OffsetDateTime> {
    doc.blocked_until.as_deref().and_then(parse_timestamp)
}

/// Whether `doc` carries a lock that is still running at `now`.
pub fn is_locked(doc: &DocumentRecord, now: OffsetDateTime) -> bool {
    doc.blocked_by.is_some() && held_until(doc).is_some_and(|until| until > now)
}

/// Inspect every non-Public version of an identifier. A running lock of
/// another user fails with `LockedBy`.
pub fn check_lock(
    versions: &[DocumentRecord],
    user: UserId,
    now: OffsetDateTime,
) -> Result<LockState, QcatError> {
    let mut state = LockState::Free;
    for doc in versions
        .iter()
        .filter(|d| !matches!(d.status, DocumentStatus::Public | DocumentStatus::Inactive))
    {
        let Some(holder) = doc.blocked_by else {
            continue;
        };
        if holder == user {
            if is_locked(doc, now) {
                state = LockState::Held;
            }
            continue;
        }
        if is_locked(doc, now) {
            return Err(QcatError::LockedBy {
                user: holder,
                until: doc.blocked_until.clone().unwrap_or_default(),
            });
        }
        if state == LockState::Free {
            state = LockState::Abandoned { previous: holder };
        }
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::timestamp;
    use qcat_storage::conformance::make_document;
    use time::macros::datetime;
    use time::Duration;

    fn locked(by: UserId, until: OffsetDateTime) -> DocumentRecord {
        let mut doc = make_document("d1", "sample_7", 1);
        doc.blocked_by = Some(by);
        doc.blocked_until = Some(timestamp(until));
        doc
    }

    #[test]
    fn running_lock_of_other_user_is_refused() {
        let now = datetime!(2025-05-01 12:00 UTC);
        let doc = locked(1, now + Duration::minutes(5));
        let err = check_lock(&[doc.clone()], 2, now).unwrap_err();
        assert!(matches!(err, QcatError::LockedBy { user: 1, .. }));
        assert_eq!(check_lock(&[doc], 1, now).unwrap(), LockState::Held);
    }

    #[test]
    fn expired_lock_is_reported_as_abandoned() {
        let now = datetime!(2025-05-01 12:00 UTC);
        let doc = locked(1, now - Duration::seconds(1));
        assert_eq!(
            check_lock(&[doc], 2, now).unwrap(),
            LockState::Abandoned { previous: 1 }
        );
    }

    #[test]
    fn public_versions_never_block() {
        let now = datetime!(2025-05-01 12:00 UTC);
        let mut doc = locked(1, now + Duration::minutes(5));
        doc.status = DocumentStatus::Public;
        assert_eq!(check_lock(&[doc], 2, now).unwrap(), LockState::Free);
    }

    #[tokio::test]
    async fn identifier_lock_serialises_holders() {
        let locks = Arc::new(IdentifierLocks::new());
        let guard = locks.lock("sample_1").await;
        let other = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _g = locks.lock("sample_1").await;
            })
        };
        tokio::task::yield_now().await;
        assert!(!other.is_finished());
        drop(guard);
        other.await.unwrap();
        let _unrelated = locks.lock("sample_2").await;
    }
}
