use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use super::{make_document, seed, TestResult};
use crate::{AnswerStore, StorageError};

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: AnswerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "concurrent",
            "concurrent_updates_exactly_one_wins",
            concurrent_updates_exactly_one_wins(factory).await,
        ),
        TestResult::from_result(
            "concurrent",
            "concurrent_updates_different_documents_all_succeed",
            concurrent_updates_different_documents_all_succeed(factory).await,
        ),
        TestResult::from_result(
            "concurrent",
            "concurrent_identifier_allocation_unique",
            concurrent_identifier_allocation_unique(factory).await,
        ),
    ]
}

// ── Concurrent update: exactly one wins ─────────────────────────────────────

/// N tasks each open a snapshot and update the same document from revision
/// 0. Exactly one commit succeeds; the rest get ConcurrentConflict either
/// when staging the update or when committing.
async fn concurrent_updates_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: AnswerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    seed(storage.as_ref(), vec![make_document("doc-1", "sample_1", 1)]).await?;

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            let mut doc = s.get_document_for_update(&mut snap, "doc-1").await?;
            doc.payload = serde_json::json!({"qg_1": [{"key_3": format!("writer-{i}")}]});
            match s.update_document(&mut snap, doc, 0).await {
                Ok(_) => match s.commit_snapshot(snap).await {
                    Ok(()) => Ok(true),
                    Err(StorageError::ConcurrentConflict { .. }) => Ok(false),
                    Err(e) => Err(e),
                },
                Err(StorageError::ConcurrentConflict { .. }) => {
                    s.abort_snapshot(snap).await?;
                    Ok(false)
                }
                Err(e) => {
                    let _ = s.abort_snapshot(snap).await;
                    Err(e)
                }
            }
        }));
    }

    let mut winners = 0usize;
    let mut losers = 0usize;
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e: StorageError| format!("storage error: {e}"))?;
        if won {
            winners += 1;
        } else {
            losers += 1;
        }
    }

    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }
    if losers != N - 1 {
        return Err(format!("expected {} losers, got {losers}", N - 1));
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

// ── Concurrent updates to different documents: all succeed ──────────────────

async fn concurrent_updates_different_documents_all_succeed<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: AnswerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    let docs = (0..N)
        .map(|i| make_document(&format!("doc-{i}"), &format!("sample_{i}"), 1))
        .collect();
    seed(storage.as_ref(), docs).await?;

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let id = format!("doc-{i}");
            let mut snap = s.begin_snapshot().await?;
            let doc = s.get_document_for_update(&mut snap, &id).await?;
            s.update_document(&mut snap, doc, 0).await?;
            s.commit_snapshot(snap).await?;
            Ok::<(), StorageError>(())
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        handle
            .await
            .map_err(|e| format!("task {i} panic: {e}"))?
            .map_err(|e| format!("task {i} failed: {e}"))?;
    }

    for i in 0..N {
        let record = storage
            .get_document(&format!("doc-{i}"))
            .await
            .map_err(|e| format!("get doc-{i}: {e}"))?;
        if record.revision != 1 {
            return Err(format!(
                "doc-{i}: expected revision 1, got {}",
                record.revision
            ));
        }
    }
    Ok(())
}

async fn concurrent_identifier_allocation_unique<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: AnswerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    let mut handles = Vec::new();
    for _ in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(
            async move { s.allocate_identifier("sample").await },
        ));
    }
    let mut seen = HashSet::new();
    for handle in handles {
        let identifier = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("allocate: {e}"))?;
        if !seen.insert(identifier.clone()) {
            return Err(format!("identifier {identifier} allocated twice"));
        }
    }
    Ok(())
}
