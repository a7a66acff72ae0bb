//! Memberships, links, the activity log and the notification queue.

use std::future::Future;

use super::{make_document, make_event, make_notification, seed, TestResult};
use crate::record::{DocumentStatus, LinkRecord, MembershipRecord, Role};
use crate::AnswerStore;

pub(super) async fn run_relation_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: AnswerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "relations",
            "membership_put_is_idempotent",
            membership_put_is_idempotent(factory).await,
        ),
        TestResult::from_result(
            "relations",
            "membership_removal",
            membership_removal(factory).await,
        ),
        TestResult::from_result(
            "relations",
            "link_put_upserts_per_ordered_pair",
            link_put_upserts_per_ordered_pair(factory).await,
        ),
        TestResult::from_result(
            "relations",
            "events_filtered_by_document",
            events_filtered_by_document(factory).await,
        ),
        TestResult::from_result(
            "relations",
            "notifications_drain_once",
            notifications_drain_once(factory).await,
        ),
    ]
}

fn member(document_id: &str, user_id: u64, role: Role) -> MembershipRecord {
    MembershipRecord {
        document_id: document_id.to_string(),
        user_id,
        role,
    }
}

async fn membership_put_is_idempotent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: AnswerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    seed(&storage, vec![make_document("doc-1", "sample_1", 1)]).await?;
    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    for m in [
        member("doc-1", 1, Role::Compiler),
        member("doc-1", 1, Role::Compiler),
        member("doc-1", 2, Role::Editor),
    ] {
        storage
            .put_membership(&mut snap, m)
            .await
            .map_err(|e| format!("put: {e}"))?;
    }
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let members = storage
        .memberships("doc-1")
        .await
        .map_err(|e| format!("memberships: {e}"))?;
    if members.len() != 2 {
        return Err(format!("expected 2 memberships, got {}", members.len()));
    }
    let of_user = storage
        .memberships_of_user(2)
        .await
        .map_err(|e| format!("memberships_of_user: {e}"))?;
    if of_user != vec![member("doc-1", 2, Role::Editor)] {
        return Err(format!("unexpected memberships of user 2: {of_user:?}"));
    }
    Ok(())
}

async fn membership_removal<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: AnswerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    storage
        .put_membership(&mut snap, member("doc-1", 2, Role::Editor))
        .await
        .map_err(|e| format!("put: {e}"))?;
    storage
        .put_membership(&mut snap, member("doc-1", 2, Role::Reviewer))
        .await
        .map_err(|e| format!("put: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    storage
        .remove_membership(&mut snap, "doc-1", 2, Role::Editor)
        .await
        .map_err(|e| format!("remove: {e}"))?;
    // Absent membership: no-op.
    storage
        .remove_membership(&mut snap, "doc-1", 3, Role::Editor)
        .await
        .map_err(|e| format!("remove absent: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let members = storage
        .memberships("doc-1")
        .await
        .map_err(|e| format!("memberships: {e}"))?;
    if members != vec![member("doc-1", 2, Role::Reviewer)] {
        return Err(format!("unexpected memberships: {members:?}"));
    }
    Ok(())
}

async fn link_put_upserts_per_ordered_pair<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: AnswerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let edge = LinkRecord {
        from_id: "a".to_string(),
        from_status: DocumentStatus::Draft,
        to_id: "b".to_string(),
        to_status: DocumentStatus::Public,
    };
    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    storage
        .put_link(&mut snap, edge.clone())
        .await
        .map_err(|e| format!("put: {e}"))?;
    storage
        .put_link(&mut snap, edge.mirrored())
        .await
        .map_err(|e| format!("put mirror: {e}"))?;
    let restamped = LinkRecord {
        from_status: DocumentStatus::Submitted,
        ..edge.clone()
    };
    storage
        .put_link(&mut snap, restamped.clone())
        .await
        .map_err(|e| format!("restamp: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let from_a = storage
        .links_from("a")
        .await
        .map_err(|e| format!("links_from: {e}"))?;
    if from_a != vec![restamped] {
        return Err(format!("expected single restamped edge, got {from_a:?}"));
    }
    let to_a = storage
        .links_to("a")
        .await
        .map_err(|e| format!("links_to: {e}"))?;
    if to_a != vec![edge.mirrored()] {
        return Err(format!("expected mirrored edge, got {to_a:?}"));
    }

    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    storage
        .remove_link(&mut snap, "a", "b")
        .await
        .map_err(|e| format!("remove: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;
    let all = storage
        .list_links()
        .await
        .map_err(|e| format!("list_links: {e}"))?;
    if all.len() != 1 || all[0].from_id != "b" {
        return Err(format!("expected only b → a left, got {all:?}"));
    }
    Ok(())
}

async fn events_filtered_by_document<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: AnswerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    for (id, doc) in [("ev-1", "doc-1"), ("ev-2", "doc-2"), ("ev-3", "doc-1")] {
        storage
            .insert_event(&mut snap, make_event(id, doc, "edited"))
            .await
            .map_err(|e| format!("event {id}: {e}"))?;
    }
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let ids: Vec<String> = storage
        .events(Some("doc-1"))
        .await
        .map_err(|e| format!("events: {e}"))?
        .into_iter()
        .map(|e| e.id)
        .collect();
    if ids != vec!["ev-1", "ev-3"] {
        return Err(format!("expected [ev-1, ev-3], got {ids:?}"));
    }
    let all = storage
        .events(None)
        .await
        .map_err(|e| format!("events: {e}"))?;
    if all.len() != 3 {
        return Err(format!("expected 3 events, got {}", all.len()));
    }
    Ok(())
}

async fn notifications_drain_once<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: AnswerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    for (id, recipient) in [("n-1", 2), ("n-2", 3), ("n-3", 4)] {
        storage
            .enqueue_notification(&mut snap, make_notification(id, "ev-1", recipient))
            .await
            .map_err(|e| format!("enqueue {id}: {e}"))?;
    }
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let first = storage
        .pending_notifications(2)
        .await
        .map_err(|e| format!("pending: {e}"))?;
    if first.len() != 2 || first[0].id != "n-1" {
        return Err(format!("expected first two notifications, got {first:?}"));
    }
    for n in &first {
        storage
            .mark_notification_sent(&n.id, "2025-01-01T00:05:00Z")
            .await
            .map_err(|e| format!("mark {}: {e}", n.id))?;
    }
    let rest = storage
        .pending_notifications(0)
        .await
        .map_err(|e| format!("pending: {e}"))?;
    if rest.len() != 1 || rest[0].id != "n-3" {
        return Err(format!("expected only n-3 pending, got {rest:?}"));
    }
    Ok(())
}
