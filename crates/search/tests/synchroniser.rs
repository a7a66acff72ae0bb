use std::path::Path;
use std::sync::Arc;

use qcat_core::Registry;
use qcat_search::{
    CancellationFlag, IndexSettings, ListQuery, MemorySearchBackend, QueryService, SearchError,
    SearchIndexer,
};
use serde_json::{json, Value};

fn registry() -> Arc<Registry> {
    let registry = Registry::default();
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../configurations");
    let report = registry.load_dir(&dir).unwrap();
    assert!(report.invalid.is_empty());
    Arc::new(registry)
}

fn settings() -> IndexSettings {
    IndexSettings {
        prefix: "test_".to_string(),
        batch_size: 2,
        ..IndexSettings::default()
    }
}

fn projection(identifier: &str, code: &str, country: &str, name: &str, updated: &str) -> Value {
    json!({
        "id": format!("id-{identifier}"),
        "identifier": identifier,
        "code": identifier,
        "status": "public",
        "configurations": [code],
        "editions": ["2015"],
        "created": "2025-01-01T00:00:00Z",
        "updated": updated,
        "translations": [],
        "original_locale": "en",
        "authors": [{"id": 1, "name": "Ada Lovelace"}],
        "name": {"en": name, "original": name},
        "country": [country],
        "search_text": {"en": name, "original": name},
        "data": {},
    })
}

async fn seeded() -> (Arc<Registry>, Arc<MemorySearchBackend>, SearchIndexer<MemorySearchBackend>) {
    let registry = registry();
    let backend = Arc::new(MemorySearchBackend::new());
    let indexer = SearchIndexer::new(backend.clone(), settings());
    let docs = [
        ("technologies_1", "technologies", "country_CHE", "Stone walls", "2025-02-01T00:00:00Z"),
        ("technologies_2", "technologies", "country_KEN", "Zai pits", "2025-02-02T00:00:00Z"),
        ("unccd_1", "unccd", "country_CHE", "Alpine pastures", "2025-02-03T00:00:00Z"),
        ("unccd_2", "unccd", "country_KEN", "Grass strips", "2025-02-04T00:00:00Z"),
    ];
    for code in ["technologies", "unccd"] {
        let config = registry.active(code).unwrap();
        indexer.create_or_update(&config).await.unwrap();
    }
    for (identifier, code, country, name, updated) in docs {
        let doc = projection(identifier, code, country, name, updated);
        indexer
            .put(code, &[(format!("id-{identifier}"), doc)])
            .await
            .unwrap();
    }
    (registry, backend, indexer)
}

#[tokio::test]
async fn wocat_country_filter_returns_one_swiss_document_per_configuration() {
    let (registry, backend, _indexer) = seeded().await;
    let service = QueryService::new(backend, registry, "test_");
    let page = service
        .list(&ListQuery {
            configurations: vec!["wocat".to_string()],
            country: Some("Switzerland".to_string()),
            ..ListQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(page.total, 2);
    let mut found: Vec<(String, String)> = page
        .items
        .iter()
        .map(|i| (i.configuration.clone(), i.identifier.clone()))
        .collect();
    found.sort();
    assert_eq!(
        found,
        vec![
            ("technologies".to_string(), "technologies_1".to_string()),
            ("unccd".to_string(), "unccd_1".to_string()),
        ]
    );
    assert_eq!(page.items[0].country, vec!["Switzerland".to_string()]);
}

#[tokio::test]
async fn unknown_configuration_falls_back_to_default_set() {
    let (registry, backend, _indexer) = seeded().await;
    let service = QueryService::new(backend, registry, "test_");
    let page = service
        .list(&ListQuery {
            configurations: vec!["does-not-exist".to_string()],
            ..ListQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(page.total, 4);
    // Most recently updated first without a text query.
    assert_eq!(page.items[0].identifier, "unccd_2");
}

#[tokio::test]
async fn free_text_and_pagination() {
    let (registry, backend, _indexer) = seeded().await;
    let service = QueryService::new(backend, registry, "test_");
    let page = service
        .list(&ListQuery {
            text: Some("pits".to_string()),
            ..ListQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].name, "Zai pits");

    let second = service
        .list(&ListQuery {
            page: 2,
            page_size: 3,
            ..ListQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(second.total, 4);
    assert_eq!(second.items.len(), 1);
}

#[tokio::test]
async fn update_moves_alias_to_next_index_and_keeps_documents() {
    let (registry, backend, indexer) = seeded().await;
    let config = registry.active("technologies").unwrap();
    let index = indexer.create_or_update(&config).await.unwrap();
    assert_eq!(index, "test_technologies_2");
    let ids = backend.document_ids("test_technologies").await;
    assert_eq!(ids.len(), 2);
    assert!(backend.mapping("test_technologies_1").await.is_none());
}

#[tokio::test]
async fn rebuild_swaps_alias_and_cancel_keeps_previous_index() {
    let (registry, backend, indexer) = seeded().await;
    let config = registry.active("unccd").unwrap();
    let documents = vec![(
        "id-unccd_1".to_string(),
        projection("unccd_1", "unccd", "country_CHE", "Alpine pastures", "2025-03-01T00:00:00Z"),
    )];

    let cancel = CancellationFlag::new();
    cancel.cancel();
    let err = indexer.rebuild(&config, &documents, &cancel).await.unwrap_err();
    assert!(matches!(err, SearchError::Cancelled));
    assert_eq!(
        backend.document_ids("test_unccd").await.len(),
        2,
        "alias still points at the previous index"
    );

    let report = indexer
        .rebuild(&config, &documents, &CancellationFlag::new())
        .await
        .unwrap();
    assert_eq!(report.documents, 1);
    assert_eq!(report.batches, 1);
    assert_eq!(
        backend.document_ids("test_unccd").await,
        vec!["id-unccd_1".to_string()]
    );
}

#[tokio::test]
async fn failed_puts_are_queued_and_replayed() {
    let (_registry, backend, indexer) = seeded().await;
    backend.set_unavailable(true);
    let doc = projection("unccd_3", "unccd", "country_CHE", "Check dams", "2025-04-01T00:00:00Z");
    assert!(!indexer.put_or_enqueue("unccd", "id-unccd_3", doc).await);
    assert_eq!(indexer.retry_queue().len(), 1);

    backend.set_unavailable(false);
    let report = indexer.retry_pending().await;
    assert_eq!(report.succeeded, 1);
    assert!(indexer.retry_queue().is_empty());
    assert!(backend
        .document_ids("test_unccd")
        .await
        .contains(&"id-unccd_3".to_string()));
}

#[tokio::test]
async fn delete_all_drops_prefixed_indices() {
    let (_registry, backend, indexer) = seeded().await;
    let deleted = indexer.delete_all().await.unwrap();
    assert_eq!(deleted.len(), 2);
    assert!(backend.document_ids("test_unccd").await.is_empty());
}
