//! Document insert and query conformance tests.

use std::future::Future;

use super::{make_document, seed, TestResult};
use crate::record::{DocumentFilter, DocumentStatus, MembershipRecord, Role};
use crate::{AnswerStore, StorageError};

pub(super) async fn run_document_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: AnswerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "documents",
            "inserted_document_readable_after_commit",
            inserted_document_readable_after_commit(factory).await,
        ),
        TestResult::from_result(
            "documents",
            "duplicate_insert_rejected",
            duplicate_insert_rejected(factory).await,
        ),
        TestResult::from_result(
            "documents",
            "get_missing_document_is_not_found",
            get_missing_document_is_not_found(factory).await,
        ),
        TestResult::from_result(
            "documents",
            "versions_listed_oldest_first",
            versions_listed_oldest_first(factory).await,
        ),
        TestResult::from_result(
            "documents",
            "filter_by_status_and_configuration",
            filter_by_status_and_configuration(factory).await,
        ),
        TestResult::from_result(
            "documents",
            "filter_by_member",
            filter_by_member(factory).await,
        ),
        TestResult::from_result(
            "documents",
            "allocated_identifiers_are_unique",
            allocated_identifiers_are_unique(factory).await,
        ),
    ]
}

async fn inserted_document_readable_after_commit<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: AnswerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let mut doc = make_document("doc-1", "sample_1", 1);
    doc.payload = serde_json::json!({"qg_1": [{"key_1": {"en": "Foo"}}]});
    seed(&storage, vec![doc.clone()]).await?;

    let stored = storage
        .get_document("doc-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if stored != doc {
        return Err(format!("stored document differs: {stored:?}"));
    }
    Ok(())
}

async fn duplicate_insert_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
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
    let staged = storage
        .insert_document(&mut snap, make_document("doc-1", "sample_1", 1))
        .await;
    let result = match staged {
        Err(e) => Err(e),
        Ok(()) => storage.commit_snapshot(snap).await,
    };
    match result {
        Err(StorageError::AlreadyExists { .. }) => Ok(()),
        Err(e) => Err(format!("expected AlreadyExists, got {e}")),
        Ok(()) => Err("duplicate insert succeeded".to_string()),
    }
}

async fn get_missing_document_is_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: AnswerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    match storage.get_document("nope").await {
        Err(StorageError::NotFound { .. }) => Ok(()),
        Err(e) => Err(format!("expected NotFound, got {e}")),
        Ok(_) => Err("missing document returned".to_string()),
    }
}

async fn versions_listed_oldest_first<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: AnswerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    seed(
        &storage,
        vec![
            make_document("doc-c", "sample_1", 3),
            make_document("doc-a", "sample_1", 1),
            make_document("doc-x", "sample_2", 1),
            make_document("doc-b", "sample_1", 2),
        ],
    )
    .await?;

    let versions = storage
        .list_versions("sample_1")
        .await
        .map_err(|e| format!("list_versions: {e}"))?;
    let numbers: Vec<u32> = versions.iter().map(|d| d.version).collect();
    if numbers != vec![1, 2, 3] {
        return Err(format!("expected versions [1, 2, 3], got {numbers:?}"));
    }
    Ok(())
}

async fn filter_by_status_and_configuration<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: AnswerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let mut public = make_document("doc-2", "sample_2", 1);
    public.status = DocumentStatus::Public;
    let mut other = make_document("doc-3", "technologies_1", 1);
    other.configuration = qcat_interchange::ConfigurationRef::new("technologies", "2015");
    other.status = DocumentStatus::Public;
    seed(
        &storage,
        vec![make_document("doc-1", "sample_1", 1), public, other],
    )
    .await?;

    let found = storage
        .list_documents(&DocumentFilter {
            configuration_code: Some("sample".to_string()),
            statuses: vec![DocumentStatus::Public],
            ..DocumentFilter::default()
        })
        .await
        .map_err(|e| format!("list: {e}"))?;
    let ids: Vec<&str> = found.iter().map(|d| d.id.as_str()).collect();
    if ids != vec!["doc-2"] {
        return Err(format!("expected [doc-2], got {ids:?}"));
    }

    let all = storage
        .list_documents(&DocumentFilter::default())
        .await
        .map_err(|e| format!("list all: {e}"))?;
    if all.len() != 3 {
        return Err(format!("expected 3 documents, got {}", all.len()));
    }
    Ok(())
}

async fn filter_by_member<S, F, Fut>(factory: &F) -> Result<(), String>
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
    for (id, identifier) in [("doc-1", "sample_1"), ("doc-2", "sample_2")] {
        storage
            .insert_document(&mut snap, make_document(id, identifier, 1))
            .await
            .map_err(|e| format!("insert {id}: {e}"))?;
    }
    storage
        .put_membership(
            &mut snap,
            MembershipRecord {
                document_id: "doc-2".to_string(),
                user_id: 7,
                role: Role::Editor,
            },
        )
        .await
        .map_err(|e| format!("membership: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let found = storage
        .list_documents(&DocumentFilter {
            member: Some(7),
            ..DocumentFilter::default()
        })
        .await
        .map_err(|e| format!("list: {e}"))?;
    let ids: Vec<&str> = found.iter().map(|d| d.id.as_str()).collect();
    if ids != vec!["doc-2"] {
        return Err(format!("expected [doc-2], got {ids:?}"));
    }
    Ok(())
}

async fn allocated_identifiers_are_unique<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: AnswerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let mut seen = std::collections::HashSet::new();
    for code in ["sample", "sample", "technologies", "sample"] {
        let identifier = storage
            .allocate_identifier(code)
            .await
            .map_err(|e| format!("allocate: {e}"))?;
        if !identifier.starts_with(&format!("{code}_")) {
            return Err(format!("identifier {identifier} lacks prefix {code}_"));
        }
        let number = &identifier[code.len() + 1..];
        if number.parse::<u64>().is_err() {
            return Err(format!("identifier {identifier} has no numeric suffix"));
        }
        if !seen.insert(identifier.clone()) {
            return Err(format!("identifier {identifier} allocated twice"));
        }
    }
    Ok(())
}
