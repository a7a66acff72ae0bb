//! Optimistic concurrency and configuration freeze conformance tests.

use std::future::Future;

use qcat_interchange::ConfigurationRef;

use super::{make_document, seed, TestResult};
use crate::record::DocumentStatus;
use crate::{AnswerStore, StorageError};

pub(super) async fn run_occ_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: AnswerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "occ",
            "update_bumps_revision",
            update_bumps_revision(factory).await,
        ),
        TestResult::from_result(
            "occ",
            "stale_revision_conflicts",
            stale_revision_conflicts(factory).await,
        ),
        TestResult::from_result(
            "occ",
            "update_missing_document_not_found",
            update_missing_document_not_found(factory).await,
        ),
        TestResult::from_result(
            "occ",
            "draft_may_change_configuration",
            draft_may_change_configuration(factory).await,
        ),
        TestResult::from_result(
            "occ",
            "configuration_frozen_after_draft",
            configuration_frozen_after_draft(factory).await,
        ),
    ]
}

async fn update_bumps_revision<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: AnswerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    seed(&storage, vec![make_document("doc-1", "sample_1", 1)]).await?;

    for expected in 0..3 {
        let mut snap = storage
            .begin_snapshot()
            .await
            .map_err(|e| format!("begin: {e}"))?;
        let doc = storage
            .get_document_for_update(&mut snap, "doc-1")
            .await
            .map_err(|e| format!("read: {e}"))?;
        let revision = storage
            .update_document(&mut snap, doc, expected)
            .await
            .map_err(|e| format!("update from {expected}: {e}"))?;
        if revision != expected + 1 {
            return Err(format!("expected revision {}, got {revision}", expected + 1));
        }
        storage
            .commit_snapshot(snap)
            .await
            .map_err(|e| format!("commit: {e}"))?;
    }
    let stored = storage
        .get_document("doc-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if stored.revision != 3 {
        return Err(format!("expected stored revision 3, got {}", stored.revision));
    }
    Ok(())
}

async fn stale_revision_conflicts<S, F, Fut>(factory: &F) -> Result<(), String>
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
    let doc = storage
        .get_document_for_update(&mut snap, "doc-1")
        .await
        .map_err(|e| format!("read: {e}"))?;
    match storage.update_document(&mut snap, doc, 5).await {
        Err(StorageError::ConcurrentConflict {
            expected_revision, ..
        }) if expected_revision == 5 => Ok(()),
        Err(e) => Err(format!("expected ConcurrentConflict, got {e}")),
        Ok(r) => Err(format!("stale update succeeded with revision {r}")),
    }
}

async fn update_missing_document_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
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
    match storage
        .update_document(&mut snap, make_document("ghost", "sample_9", 1), 0)
        .await
    {
        Err(StorageError::NotFound { .. }) => Ok(()),
        Err(e) => Err(format!("expected NotFound, got {e}")),
        Ok(_) => Err("update of missing document succeeded".to_string()),
    }
}

async fn draft_may_change_configuration<S, F, Fut>(factory: &F) -> Result<(), String>
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
    doc.configuration = ConfigurationRef::new("sample", "2018");
    storage
        .update_document(&mut snap, doc, 0)
        .await
        .map_err(|e| format!("update: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let stored = storage
        .get_document("doc-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if stored.configuration.edition != "2018" {
        return Err("draft configuration change not stored".to_string());
    }
    Ok(())
}

async fn configuration_frozen_after_draft<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: AnswerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let mut submitted = make_document("doc-1", "sample_1", 1);
    submitted.status = DocumentStatus::Submitted;
    seed(&storage, vec![submitted]).await?;

    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    let mut doc = storage
        .get_document_for_update(&mut snap, "doc-1")
        .await
        .map_err(|e| format!("read: {e}"))?;
    doc.configuration = ConfigurationRef::new("sample", "2018");
    let staged = storage.update_document(&mut snap, doc, 0).await;
    let result = match staged {
        Err(e) => Err(e),
        Ok(_) => storage.commit_snapshot(snap).await,
    };
    match result {
        Err(StorageError::ConfigurationFrozen { .. }) => Ok(()),
        Err(e) => Err(format!("expected ConfigurationFrozen, got {e}")),
        Ok(()) => Err("configuration of submitted document changed".to_string()),
    }
}
