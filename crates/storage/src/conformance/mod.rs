//! Conformance test suite for `AnswerStore` implementations.
//!
//! A backend-agnostic suite that any `AnswerStore` can run to verify
//! correctness. The suite covers:
//!
//! - **Documents**: insert, duplicate detection, version listing, filters
//! - **Snapshot isolation**: uncommitted writes invisible, aborts discarded
//! - **OCC**: revision checks and the configuration freeze
//! - **Relations**: memberships, links, events, notification queue
//! - **Concurrency**: racing updates, identifier allocation
//!
//! # Usage
//!
//! ```ignore
//! use qcat_storage::conformance::run_conformance_suite;
//! use qcat_storage::MemoryStore;
//!
//! #[tokio::test]
//! async fn memory_conformance() {
//!     let report = run_conformance_suite(|| async { MemoryStore::new() }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod concurrent;
mod documents;
mod occ;
mod relations;
mod snapshot;

use std::fmt;
use std::future::Future;

use qcat_interchange::ConfigurationRef;

use crate::record::{DocumentRecord, DocumentStatus, EventRecord, NotificationRecord};
use crate::AnswerStore;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "documents", "snapshot", "occ").
    pub category: String,
    pub name: String,
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn pass(category: &str, name: &str) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: true,
            message: None,
        }
    }

    fn fail(category: &str, name: &str, msg: String) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: false,
            message: Some(msg),
        }
    }

    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::pass(category, name),
            Err(msg) => Self::fail(category, name, msg),
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a storage backend.
///
/// `factory` is called once per test to create a fresh, empty store.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: AnswerStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(documents::run_document_tests(&factory).await);
    results.extend(snapshot::run_snapshot_tests(&factory).await);
    results.extend(occ::run_occ_tests(&factory).await);
    results.extend(relations::run_relation_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers: record constructors with sensible defaults ──────────────────────

/// A Draft `sample/2015` document at revision 0 with an empty payload.
pub fn make_document(id: &str, identifier: &str, version: u32) -> DocumentRecord {
    DocumentRecord {
        id: id.to_string(),
        identifier: identifier.to_string(),
        version,
        status: DocumentStatus::Draft,
        configuration: ConfigurationRef::new("sample", "2015"),
        original_language: "en".to_string(),
        translation_languages: Vec::new(),
        created: "2025-01-01T00:00:00Z".to_string(),
        updated: "2025-01-01T00:00:00Z".to_string(),
        blocked_by: None,
        blocked_until: None,
        revision: 0,
        payload: serde_json::json!({}),
        previous_id: None,
        annotations: Vec::new(),
        forked_links: Vec::new(),
    }
}

fn make_event(id: &str, document_id: &str, kind: &str) -> EventRecord {
    EventRecord {
        id: id.to_string(),
        kind: kind.to_string(),
        document_id: document_id.to_string(),
        identifier: "sample_1".to_string(),
        actor: Some(1),
        affected_user: None,
        role: None,
        message: None,
        timestamp: "2025-01-01T00:00:00Z".to_string(),
    }
}

fn make_notification(id: &str, event_id: &str, recipient: u64) -> NotificationRecord {
    NotificationRecord {
        id: id.to_string(),
        event_id: event_id.to_string(),
        kind: "status_changed".to_string(),
        recipient,
        document_id: "doc-1".to_string(),
        identifier: "sample_1".to_string(),
        configuration: "sample".to_string(),
        actor: Some(1),
        message: None,
        created: "2025-01-01T00:00:00Z".to_string(),
        sent_at: None,
    }
}

/// Insert `docs` in a single committed snapshot.
async fn seed<S: AnswerStore>(storage: &S, docs: Vec<DocumentRecord>) -> Result<(), String> {
    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    for doc in docs {
        let id = doc.id.clone();
        storage
            .insert_document(&mut snap, doc)
            .await
            .map_err(|e| format!("insert {id}: {e}"))?;
    }
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit seed: {e}"))
}
