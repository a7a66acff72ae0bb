use qcat_storage::conformance::run_conformance_suite;
use qcat_storage::MemoryStore;

#[tokio::test]
async fn memory_store_conformance() {
    let report = run_conformance_suite(|| async { MemoryStore::new() }).await;
    assert_eq!(report.failed, 0, "{report}");
    assert!(report.total > 20);
}

#[tokio::test]
async fn file_backed_store_conformance() {
    let dir = tempfile::tempdir().unwrap();
    let counter = std::sync::atomic::AtomicUsize::new(0);
    let report = run_conformance_suite(|| {
        let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let path = dir.path().join(format!("store-{n}.json"));
        async move { MemoryStore::open(path).await.unwrap() }
    })
    .await;
    assert_eq!(report.failed, 0, "{report}");
}
