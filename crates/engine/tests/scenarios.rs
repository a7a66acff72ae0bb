//! End-to-end scenarios through the access boundary, against the
//! in-memory store, search backend and directory.

use std::path::PathBuf;
use std::sync::Arc;

use qcat_core::{DomainTables, FeatureToggles, Registry};
use qcat_engine::{
    AccessBoundary, BoundaryParts, EngineSettings, EventKind, ManualClock, MembershipChange,
    MemoryTransport, Permission, QcatError, ReviewAction, Selector, StaticDirectory, StepInput,
    Viewer,
};
use qcat_interchange::ConfigurationRef;
use qcat_search::{IndexSettings, ListQuery, MemorySearchBackend, SearchBackend};
use qcat_storage::{
    AnswerStore, DocumentFilter, DocumentRecord, DocumentStatus, MemoryStore, Role, UserId,
    UserRecord,
};
use serde_json::{json, Value as Json};
use time::{Duration, OffsetDateTime};

const COMPILER: UserId = 1;
const EDITOR: UserId = 2;
const STAFF: UserId = 3;

fn configurations() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../configurations")
}

fn load(registry: &Registry, name: &str) {
    let text = std::fs::read_to_string(configurations().join(format!("{}.json", name))).unwrap();
    registry
        .load(&qcat_interchange::from_str(&text).unwrap())
        .unwrap();
}

fn user(id: UserId, first: &str) -> UserRecord {
    UserRecord {
        id,
        email: format!("{}@example.org", first.to_lowercase()),
        first_name: first.to_string(),
        last_name: "Tester".to_string(),
        permissions: Vec::new(),
        updated: "2025-01-01T00:00:00.000000Z".to_string(),
    }
}

fn compiler() -> Viewer {
    Viewer::user(COMPILER)
}

fn staff() -> Viewer {
    Viewer::user(STAFF)
        .with_permission(Permission::ReviewAny)
        .with_permission(Permission::PublishAny)
}

struct Harness {
    store: Arc<MemoryStore>,
    search: Arc<MemorySearchBackend>,
    clock: Arc<ManualClock>,
    qcat: AccessBoundary<MemoryStore, MemorySearchBackend>,
}

impl Harness {
    fn new(files: &[&str]) -> Self {
        let registry = Registry::new(DomainTables::bundled(), FeatureToggles::default());
        for name in files {
            load(&registry, name);
        }
        let store = Arc::new(MemoryStore::new());
        let search = Arc::new(MemorySearchBackend::new());
        let clock = Arc::new(ManualClock::new(
            OffsetDateTime::from_unix_timestamp(1_735_725_600).unwrap(),
        ));
        let directory = StaticDirectory::new()
            .with_user(user(COMPILER, "Ada"))
            .with_user(user(EDITOR, "Ben"))
            .with_user(user(STAFF, "Cleo"));
        let qcat = AccessBoundary::new(BoundaryParts {
            store: store.clone(),
            registry: Arc::new(registry),
            search: search.clone(),
            index: IndexSettings::default(),
            directory: Arc::new(directory),
            clock: clock.clone(),
            settings: EngineSettings::default(),
            blob_root: None,
        });
        Harness {
            store,
            search,
            clock,
            qcat,
        }
    }

    /// A draft by the compiler with the given steps committed in English.
    async fn draft(&self, code: &str, steps: &[(&str, Json)]) -> DocumentRecord {
        let doc = self.qcat.create_draft(code, "en", &compiler()).await.unwrap();
        for (category, payload) in steps {
            self.clock.advance(Duration::seconds(1));
            self.qcat
                .step_commit(
                    &doc.id,
                    StepInput {
                        category,
                        payload,
                        language: "en",
                        confirm_translation: false,
                    },
                    &compiler(),
                )
                .await
                .unwrap();
        }
        self.store.get_document(&doc.id).await.unwrap()
    }

    async fn publish(&self, document_id: &str) -> DocumentRecord {
        self.qcat
            .review_action(document_id, ReviewAction::Submit, &compiler(), None)
            .await
            .unwrap();
        self.qcat
            .review_action(document_id, ReviewAction::Review, &staff(), Some("fine"))
            .await
            .unwrap();
        self.qcat
            .review_action(document_id, ReviewAction::Publish, &staff(), None)
            .await
            .unwrap()
    }

    async fn public(&self) -> Vec<DocumentRecord> {
        self.store
            .list_documents(&DocumentFilter {
                statuses: vec![DocumentStatus::Public],
                ..DocumentFilter::default()
            })
            .await
            .unwrap()
    }
}

fn named(name: &str) -> Json {
    json!({"qg_name": [{"name": name}]})
}

#[tokio::test]
async fn draft_is_reviewed_and_published() {
    let h = Harness::new(&["sample_2015", "samplemulti_2015"]);
    let doc = h
        .draft("sample", &[("cat_1", json!({"qg_1": [{"key_1": {"en": "Foo"}, "key_3": "Bar"}]}))])
        .await;
    assert_eq!(doc.configuration, ConfigurationRef::new("sample", "2015"));
    let published = h.publish(&doc.id).await;

    let public = h.public().await;
    assert_eq!(public.len(), 1);
    assert_eq!(public[0].id, published.id);
    let suffix = published.identifier.strip_prefix("sample_").unwrap();
    assert!(suffix.parse::<u64>().is_ok());
    assert_eq!(public[0].payload["qg_1"][0]["key_1"]["en"], "Foo");

    let kinds: Vec<String> = h
        .store
        .events(Some(&doc.id))
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.kind)
        .filter(|k| k != EventKind::Edited.as_str())
        .collect();
    assert_eq!(kinds, vec!["submitted", "reviewed", "published"]);

    assert_eq!(h.search.document_ids("qcat_sample").await, vec![doc.id.clone()]);
}

#[tokio::test]
async fn deleting_a_linked_document_removes_both_edges() {
    let h = Harness::new(&["sample_2015", "samplemulti_2015"]);
    let multi = h.draft("samplemulti", &[("cat_0", named("Multi"))]).await;
    h.publish(&multi.id).await;
    let sample = h
        .draft(
            "sample",
            &[
                ("cat_0", named("Sample")),
                ("cat_5", json!({"qg_links": [{"link_id": {"link_identifier": multi.identifier}}]})),
            ],
        )
        .await;
    h.publish(&sample.id).await;

    let view = h
        .qcat
        .detail(&sample.identifier, &Viewer::anonymous(), Selector::Public, "en")
        .await
        .unwrap();
    assert_eq!(view.linked.len(), 1);
    assert_eq!(view.linked[0].identifier, multi.identifier);
    assert_eq!(h.store.links_to(&sample.id).await.unwrap().len(), 1);

    h.qcat
        .review_action(&multi.id, ReviewAction::Delete, &staff(), Some("duplicate"))
        .await
        .unwrap();

    let view = h
        .qcat
        .detail(&sample.identifier, &Viewer::anonymous(), Selector::Public, "en")
        .await
        .unwrap();
    assert!(view.linked.is_empty());
    assert!(h.store.links_to(&sample.id).await.unwrap().is_empty());
    assert!(h.store.links_from(&sample.id).await.unwrap().is_empty());

    let form = h
        .qcat
        .step_render(&sample.id, "cat_5", &compiler(), "en")
        .await
        .unwrap();
    let links = form.groups.iter().find(|g| g.keyword == "qg_links").unwrap();
    assert!(links
        .instances
        .iter()
        .flat_map(|i| i.fields.iter())
        .all(|f| f.value.is_null()));
    assert!(h.search.document_ids("qcat_samplemulti").await.is_empty());
}

#[tokio::test]
async fn second_editor_is_locked_out_until_the_lock_expires() {
    let h = Harness::new(&["sample_2015", "samplemulti_2015"]);
    let doc = h.draft("sample", &[]).await;
    h.qcat
        .set_membership(
            &doc.id,
            &MembershipChange {
                user: EDITOR,
                role: Role::Editor,
                add: true,
                message: None,
                retain_previous: false,
            },
            &compiler(),
        )
        .await
        .unwrap();

    let first = h.qcat.step_render(&doc.id, "cat_5", &compiler(), "en").await.unwrap();
    assert!(!first.read_only);

    let editor = Viewer::user(EDITOR);
    let second = h.qcat.step_render(&doc.id, "cat_5", &editor, "en").await.unwrap();
    assert!(second.read_only);
    assert_eq!(second.locked_by, Some(COMPILER));
    let refused = h
        .qcat
        .step_commit(
            &doc.id,
            StepInput {
                category: "cat_0",
                payload: &named("Mine"),
                language: "en",
                confirm_translation: false,
            },
            &editor,
        )
        .await;
    assert!(matches!(refused, Err(QcatError::LockedBy { user: COMPILER, .. })));

    h.clock.advance(Duration::minutes(11));
    let recovered = h.qcat.step_render(&doc.id, "cat_5", &editor, "en").await.unwrap();
    assert!(!recovered.read_only);
    assert!(recovered.notice.unwrap().contains("abandoned"));

    let back = h.qcat.step_render(&doc.id, "cat_5", &compiler(), "en").await.unwrap();
    assert!(back.read_only);
    assert_eq!(back.locked_by, Some(EDITOR));
}

#[tokio::test]
async fn fork_migrates_to_the_new_edition() {
    let h = Harness::new(&["sample_2015", "samplemulti_2015"]);
    let doc = h
        .draft(
            "sample",
            &[
                ("cat_0", named("Terraces")),
                (
                    "cat_1",
                    json!({"qg_1": [{"key_1": "Foo"}], "qg_2": [{"key_2": "Long answer"}]}),
                ),
                ("cat_2", json!({"qg_5": [{"key_7": 5}]})),
            ],
        )
        .await;
    let public = h.publish(&doc.id).await;
    assert!(public.payload.get("qg_5").is_some());

    load(h.qcat.registry(), "sample_2018");
    let fork_id = h.qcat.fork_new_version(&public.id, &compiler()).await.unwrap();
    let fork = h.store.get_document(&fork_id).await.unwrap();
    assert_eq!(fork.configuration, ConfigurationRef::new("sample", "2018"));
    assert_eq!(fork.status, DocumentStatus::Draft);
    assert_eq!(fork.version, 2);
    assert_eq!(fork.previous_id.as_deref(), Some(public.id.as_str()));
    assert_eq!(fork.payload["qg_2"][0]["key_2a"], public.payload["qg_2"][0]["key_2"]);
    assert!(fork.payload["qg_2"][0].get("key_2").is_none());
    assert!(fork.payload.get("qg_5").is_none());
    assert_eq!(fork.payload["qg_1"], public.payload["qg_1"]);

    let form = h.qcat.step_render(&fork.id, "cat_1", &compiler(), "en").await.unwrap();
    let key_1 = form
        .groups
        .iter()
        .flat_map(|g| g.instances.iter())
        .flat_map(|i| i.fields.iter())
        .find(|f| f.keyword == "key_1")
        .unwrap();
    assert_eq!(key_1.label, "Key 1 (edition 2018)");

    let again = h.qcat.fork_new_version(&public.id, &compiler()).await.unwrap();
    assert_eq!(again, fork_id);

    h.publish(&fork.id).await;
    let public_now = h.public().await;
    assert_eq!(public_now.len(), 1);
    assert_eq!(public_now[0].id, fork.id);
    assert_eq!(
        h.store.get_document(&public.id).await.unwrap().status,
        DocumentStatus::Inactive
    );
    assert_eq!(h.search.document_ids("qcat_sample").await, vec![fork.id.clone()]);
}

#[tokio::test]
async fn country_filter_selects_across_configurations() {
    let h = Harness::new(&["technologies_2015", "unccd_2015"]);
    for (code, country) in [
        ("technologies", "country_CHE"),
        ("technologies", "country_DEU"),
        ("unccd", "country_CHE"),
        ("unccd", "country_FRA"),
    ] {
        let doc = h
            .draft(
                code,
                &[(
                    "cat_0",
                    json!({
                        "qg_name": [{"name": format!("{} {}", code, country)}],
                        "qg_location": [{"country": country}],
                    }),
                )],
            )
            .await;
        h.publish(&doc.id).await;
    }

    for configurations in [vec!["wocat".to_string()], Vec::new()] {
        let page = h
            .qcat
            .list(&ListQuery {
                configurations,
                country: Some("Switzerland".to_string()),
                ..ListQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        let mut codes: Vec<&str> = page.items.iter().map(|i| i.configuration.as_str()).collect();
        codes.sort_unstable();
        assert_eq!(codes, vec!["technologies", "unccd"]);
    }
}

#[tokio::test]
async fn invited_editor_is_notified_with_the_message() {
    let h = Harness::new(&["sample_2015", "samplemulti_2015"]);
    let doc = h.draft("sample", &[]).await;
    let events = h
        .qcat
        .set_membership(
            &doc.id,
            &MembershipChange {
                user: EDITOR,
                role: Role::Editor,
                add: true,
                message: Some("please review".to_string()),
                retain_previous: false,
            },
            &compiler(),
        )
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::EditorAdded);

    let view = h
        .qcat
        .detail(&doc.identifier, &compiler(), Selector::LatestForUser, "en")
        .await
        .unwrap();
    assert!(view
        .members
        .iter()
        .any(|m| m.user_id == EDITOR && m.role == Role::Editor && m.name == "Ben Tester"));

    let logged = h.store.events(Some(&doc.id)).await.unwrap();
    let added = logged.last().unwrap();
    assert_eq!(added.kind, "editor_added");
    assert_eq!(added.message.as_deref(), Some("please review"));

    let queued = h.store.pending_notifications(0).await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].recipient, EDITOR);

    let transport = Arc::new(MemoryTransport::new());
    let report = h.qcat.send_notifications(transport.clone(), 0).await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(transport.sent()[0].to, "ben@example.org");
}

#[tokio::test]
async fn unknown_users_cannot_be_invited() {
    let h = Harness::new(&["sample_2015"]);
    let doc = h.draft("sample", &[]).await;
    let err = h
        .qcat
        .set_membership(
            &doc.id,
            &MembershipChange {
                user: 99,
                role: Role::Editor,
                add: true,
                message: None,
                retain_previous: false,
            },
            &compiler(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, QcatError::NotFound { .. }));
}

#[tokio::test]
async fn submit_requires_every_required_answer() {
    let h = Harness::new(&["sample_2015"]);
    let doc = h
        .draft("sample", &[("cat_1", json!({"qg_1": [{"key_3": "Bar"}]}))])
        .await;
    let err = h
        .qcat
        .review_action(&doc.id, ReviewAction::Submit, &compiler(), None)
        .await
        .unwrap_err();
    match err {
        QcatError::IncompleteForSubmit { missing } => {
            assert_eq!(missing, vec!["qg_1[0].key_1".to_string()])
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(
        h.store.get_document(&doc.id).await.unwrap().status,
        DocumentStatus::Draft
    );
}

#[tokio::test]
async fn queues_list_the_latest_visible_version() {
    let h = Harness::new(&["sample_2015"]);
    let doc = h.draft("sample", &[("cat_0", named("Queued"))]).await;
    assert!(h.qcat.pending_review(&staff(), "en").await.unwrap().is_empty());

    h.qcat
        .review_action(&doc.id, ReviewAction::Submit, &compiler(), None)
        .await
        .unwrap();
    let review = h.qcat.pending_review(&staff(), "en").await.unwrap();
    assert_eq!(review.len(), 1);
    assert_eq!(review[0].name, "Queued");
    assert!(h.qcat.pending_review(&Viewer::user(EDITOR), "en").await.unwrap().is_empty());

    h.qcat
        .review_action(&doc.id, ReviewAction::Review, &staff(), None)
        .await
        .unwrap();
    assert!(h.qcat.pending_review(&staff(), "en").await.unwrap().is_empty());
    assert_eq!(h.qcat.pending_publish(&staff(), "en").await.unwrap().len(), 1);

    let mine = h.qcat.my_data(&compiler(), "en").await.unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].status, DocumentStatus::Reviewed);
    assert_eq!(mine[0].roles, vec![Role::Compiler]);
    assert!(h.qcat.my_data(&Viewer::anonymous(), "en").await.unwrap().is_empty());
}

#[tokio::test]
async fn drafts_stay_out_of_public_views() {
    let h = Harness::new(&["sample_2015"]);
    let doc = h.draft("sample", &[("cat_0", named("Hidden"))]).await;
    let err = h
        .qcat
        .detail(&doc.identifier, &Viewer::anonymous(), Selector::LatestForUser, "en")
        .await
        .unwrap_err();
    assert!(matches!(err, QcatError::NotFound { .. }));
    let own = h
        .qcat
        .detail(&doc.identifier, &compiler(), Selector::LatestForUser, "en")
        .await
        .unwrap();
    assert!(own.can_edit);
    assert!(own.actions.contains(&ReviewAction::Submit));
    assert!(h.search.document_ids("qcat_sample").await.is_empty());
}

#[tokio::test]
async fn index_repair_restores_the_public_set() {
    let h = Harness::new(&["sample_2015"]);
    let mut ids = Vec::new();
    for name in ["One", "Two"] {
        let doc = h.draft("sample", &[("cat_0", named(name))]).await;
        ids.push(h.publish(&doc.id).await.id);
    }
    ids.sort();
    h.search.delete_document("qcat_sample", &ids[0]).await.unwrap();

    let repair = h.qcat.retry_index().await.unwrap();
    assert_eq!(repair.repaired, 1);
    let mut indexed = h.search.document_ids("qcat_sample").await;
    indexed.sort();
    assert_eq!(indexed, ids);

    let report = h
        .qcat
        .rebuild_index("sample", &qcat_search::CancellationFlag::new())
        .await
        .unwrap();
    assert_eq!(report.documents, 2);
    assert!(h.qcat.check_data().await.unwrap().is_empty());
}

async fn linked_pair(h: &Harness) -> (DocumentRecord, DocumentRecord) {
    let multi = h.draft("samplemulti", &[("cat_0", named("Multi"))]).await;
    let multi = h.publish(&multi.id).await;
    let sample = h
        .draft(
            "sample",
            &[
                ("cat_0", named("Sample")),
                ("cat_5", json!({"qg_links": [{"link_id": {"link_identifier": multi.identifier}}]})),
            ],
        )
        .await;
    (sample, multi)
}

#[tokio::test]
async fn links_carry_the_status_of_both_ends() {
    let h = Harness::new(&["sample_2015", "samplemulti_2015"]);
    let (sample, multi) = linked_pair(&h).await;
    let edge = &h.store.links_from(&sample.id).await.unwrap()[0];
    assert_eq!(edge.from_status, DocumentStatus::Draft);
    assert_eq!(edge.to_status, DocumentStatus::Public);

    let sample = h.publish(&sample.id).await;
    let from_sample = h.store.links_from(&sample.id).await.unwrap();
    assert_eq!(from_sample.len(), 1);
    assert_eq!(from_sample[0].from_status, DocumentStatus::Public);
    assert_eq!(from_sample[0].to_status, DocumentStatus::Public);
    let from_multi = h.store.links_from(&multi.id).await.unwrap();
    assert_eq!(from_multi.len(), 1);
    assert_eq!(from_multi[0].to_id, sample.id);
    assert_eq!(from_multi[0].from_status, DocumentStatus::Public);
    assert_eq!(from_multi[0].to_status, DocumentStatus::Public);
}

#[tokio::test]
async fn link_removed_in_a_new_version_stays_removed_after_publishing() {
    let h = Harness::new(&["sample_2015", "samplemulti_2015"]);
    let (sample, multi) = linked_pair(&h).await;
    let public = h.publish(&sample.id).await;

    let fork_id = h.qcat.fork_new_version(&public.id, &compiler()).await.unwrap();
    assert_eq!(h.store.links_from(&fork_id).await.unwrap().len(), 1);
    h.qcat
        .step_commit(
            &fork_id,
            StepInput {
                category: "cat_5",
                payload: &json!({"qg_links": []}),
                language: "en",
                confirm_translation: false,
            },
            &compiler(),
        )
        .await
        .unwrap();
    assert!(h.store.links_from(&fork_id).await.unwrap().is_empty());

    h.publish(&fork_id).await;
    assert!(h.store.links_from(&fork_id).await.unwrap().is_empty());
    assert!(h.store.links_to(&fork_id).await.unwrap().is_empty());
    assert!(h.store.links_from(&public.id).await.unwrap().is_empty());
    assert!(h.store.links_from(&multi.id).await.unwrap().is_empty());
    let view = h
        .qcat
        .detail(&sample.identifier, &Viewer::anonymous(), Selector::Public, "en")
        .await
        .unwrap();
    assert!(view.linked.is_empty());
}

#[tokio::test]
async fn kept_links_follow_the_new_public_version() {
    let h = Harness::new(&["sample_2015", "samplemulti_2015"]);
    let (sample, multi) = linked_pair(&h).await;
    let public = h.publish(&sample.id).await;

    let fork_id = h.qcat.fork_new_version(&public.id, &compiler()).await.unwrap();
    h.publish(&fork_id).await;
    assert!(h.store.links_from(&public.id).await.unwrap().is_empty());
    let from_multi = h.store.links_from(&multi.id).await.unwrap();
    assert_eq!(from_multi.len(), 1);
    assert_eq!(from_multi[0].to_id, fork_id);
    let view = h
        .qcat
        .detail(&multi.identifier, &Viewer::anonymous(), Selector::Public, "en")
        .await
        .unwrap();
    assert_eq!(view.linked.len(), 1);
    assert_eq!(view.linked[0].document_id, fork_id);
}

#[tokio::test]
async fn staff_replace_the_compiler_and_keep_them_as_editor() {
    let h = Harness::new(&["sample_2015"]);
    let doc = h.draft("sample", &[]).await;
    let events = h
        .qcat
        .set_membership(
            &doc.id,
            &MembershipChange {
                user: EDITOR,
                role: Role::Compiler,
                add: true,
                message: Some("handing over".to_string()),
                retain_previous: true,
            },
            &staff(),
        )
        .await
        .unwrap();
    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::CompilerRemoved,
            EventKind::CompilerAdded,
            EventKind::EditorAdded
        ]
    );

    let mut members: Vec<(UserId, Role)> = h
        .store
        .memberships(&doc.id)
        .await
        .unwrap()
        .into_iter()
        .map(|m| (m.user_id, m.role))
        .collect();
    members.sort();
    let mut expected = vec![(EDITOR, Role::Compiler), (COMPILER, Role::Editor)];
    expected.sort();
    assert_eq!(members, expected);

    let mut queued: Vec<(String, UserId)> = h
        .store
        .pending_notifications(0)
        .await
        .unwrap()
        .into_iter()
        .map(|n| (n.kind, n.recipient))
        .collect();
    queued.sort();
    assert_eq!(
        queued,
        vec![
            ("compiler_added".to_string(), EDITOR),
            ("compiler_removed".to_string(), COMPILER),
            ("editor_added".to_string(), COMPILER),
        ]
    );

    let old = Viewer::user(COMPILER);
    let refused = h
        .qcat
        .review_action(&doc.id, ReviewAction::Submit, &old, None)
        .await;
    assert!(matches!(refused, Err(QcatError::PermissionDenied { .. })));
}
