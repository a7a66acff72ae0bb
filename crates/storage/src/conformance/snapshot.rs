//! Snapshot isolation conformance tests.
//!
//! Uncommitted writes are invisible outside a snapshot, committed writes
//! are visible, and aborted or failed snapshots leave nothing behind.

use std::future::Future;

use super::{make_document, make_event, seed, TestResult};
use crate::record::{DocumentFilter, MembershipRecord, Role};
use crate::{AnswerStore, StorageError};

pub(super) async fn run_snapshot_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: AnswerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "snapshot",
            "uncommitted_insert_invisible",
            uncommitted_insert_invisible(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "staged_writes_visible_inside_snapshot",
            staged_writes_visible_inside_snapshot(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "abort_discards_everything",
            abort_discards_everything(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "failed_commit_is_all_or_nothing",
            failed_commit_is_all_or_nothing(factory).await,
        ),
    ]
}

async fn uncommitted_insert_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
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
        .insert_document(&mut snap, make_document("doc-1", "sample_1", 1))
        .await
        .map_err(|e| format!("insert: {e}"))?;

    if storage.get_document("doc-1").await.is_ok() {
        return Err("uncommitted document visible to get_document".to_string());
    }
    let listed = storage
        .list_documents(&DocumentFilter::default())
        .await
        .map_err(|e| format!("list: {e}"))?;
    if !listed.is_empty() {
        return Err("uncommitted document visible to list_documents".to_string());
    }

    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;
    storage
        .get_document("doc-1")
        .await
        .map_err(|e| format!("committed document not visible: {e}"))?;
    Ok(())
}

async fn staged_writes_visible_inside_snapshot<S, F, Fut>(factory: &F) -> Result<(), String>
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
    let mut doc = storage
        .get_document_for_update(&mut snap, "doc-1")
        .await
        .map_err(|e| format!("read: {e}"))?;
    doc.payload = serde_json::json!({"qg_1": [{"key_3": "x"}]});
    let revision = storage
        .update_document(&mut snap, doc, 0)
        .await
        .map_err(|e| format!("update: {e}"))?;

    let staged = storage
        .get_document_for_update(&mut snap, "doc-1")
        .await
        .map_err(|e| format!("re-read: {e}"))?;
    if staged.revision != revision || staged.payload["qg_1"][0]["key_3"] != "x" {
        return Err(format!("staged write not visible in snapshot: {staged:?}"));
    }
    let outside = storage
        .get_document("doc-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if outside.revision != 0 {
        return Err("staged update visible outside snapshot".to_string());
    }
    storage
        .abort_snapshot(snap)
        .await
        .map_err(|e| format!("abort: {e}"))
}

async fn abort_discards_everything<S, F, Fut>(factory: &F) -> Result<(), String>
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
        .insert_document(&mut snap, make_document("doc-1", "sample_1", 1))
        .await
        .map_err(|e| format!("insert: {e}"))?;
    storage
        .put_membership(
            &mut snap,
            MembershipRecord {
                document_id: "doc-1".to_string(),
                user_id: 1,
                role: Role::Compiler,
            },
        )
        .await
        .map_err(|e| format!("membership: {e}"))?;
    storage
        .insert_event(&mut snap, make_event("ev-1", "doc-1", "created"))
        .await
        .map_err(|e| format!("event: {e}"))?;
    storage
        .abort_snapshot(snap)
        .await
        .map_err(|e| format!("abort: {e}"))?;

    if storage.get_document("doc-1").await.is_ok() {
        return Err("aborted insert visible".to_string());
    }
    let members = storage
        .memberships("doc-1")
        .await
        .map_err(|e| format!("memberships: {e}"))?;
    let events = storage
        .events(None)
        .await
        .map_err(|e| format!("events: {e}"))?;
    if !members.is_empty() || !events.is_empty() {
        return Err("aborted relations visible".to_string());
    }
    Ok(())
}

/// A snapshot whose commit fails must not leave any of its writes behind.
async fn failed_commit_is_all_or_nothing<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: AnswerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    seed(&storage, vec![make_document("doc-1", "sample_1", 1)]).await?;

    // Stage an update from revision 0, then let another writer win.
    let mut loser = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    storage
        .insert_event(&mut loser, make_event("ev-loser", "doc-1", "edited"))
        .await
        .map_err(|e| format!("event: {e}"))?;
    let doc = storage
        .get_document_for_update(&mut loser, "doc-1")
        .await
        .map_err(|e| format!("read: {e}"))?;
    storage
        .update_document(&mut loser, doc.clone(), 0)
        .await
        .map_err(|e| format!("stage update: {e}"))?;

    let mut winner = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin winner: {e}"))?;
    storage
        .update_document(&mut winner, doc, 0)
        .await
        .map_err(|e| format!("winner update: {e}"))?;
    storage
        .commit_snapshot(winner)
        .await
        .map_err(|e| format!("winner commit: {e}"))?;

    match storage.commit_snapshot(loser).await {
        Err(StorageError::ConcurrentConflict { .. }) => {}
        Err(e) => return Err(format!("expected ConcurrentConflict, got {e}")),
        Ok(()) => return Err("stale commit succeeded".to_string()),
    }
    let events = storage
        .events(Some("doc-1"))
        .await
        .map_err(|e| format!("events: {e}"))?;
    if events.iter().any(|e| e.id == "ev-loser") {
        return Err("event from failed commit persisted".to_string());
    }
    let stored = storage
        .get_document("doc-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if stored.revision != 1 {
        return Err(format!("expected revision 1, got {}", stored.revision));
    }
    Ok(())
}
