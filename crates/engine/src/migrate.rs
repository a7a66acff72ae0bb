//! Edition Migrator: carries an answer payload from one edition of a
//! configuration to a later one by applying the declared deltas in order.
//!
//! A delta keyword names a questiongroup when the payload has a top-level
//! entry of that name and a question otherwise. Every delta item is
//! idempotent, so applying a path twice equals applying it once.

use qcat_core::{Configuration, DeltaItem, Registry};
use qcat_storage::FieldAnnotation;
use serde::Serialize;
use serde_json::{Map, Value as Json};
use tracing::debug;

use crate::error::QcatError;
use crate::form::validate_payload;

/// Outcome of migrating one payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Migration {
    pub from_edition: String,
    pub to_edition: String,
    pub payload: Json,
    /// Editions whose deltas were applied, oldest first.
    pub applied: Vec<String>,
    /// Carried-over values the new edition does not accept.
    pub annotations: Vec<FieldAnnotation>,
}

/// Migrate `payload` from `from_edition` to the edition of `target`.
pub fn migrate(
    registry: &Registry,
    payload: &Json,
    from_edition: &str,
    target: &Configuration,
) -> Result<Migration, QcatError> {
    let mut migrated = payload.clone();
    let mut applied = Vec::new();
    if from_edition != target.edition {
        for (edition, delta) in registry.edition_path(&target.code, from_edition, &target.edition)? {
            apply_delta(&mut migrated, &delta);
            applied.push(edition);
        }
    }
    let annotations = validate_payload(target, &migrated)
        .into_iter()
        .map(|d| FieldAnnotation {
            questiongroup: d.questiongroup,
            question: d.question,
            message: format!("carried-over field requires attention: {}", d.message),
        })
        .collect::<Vec<_>>();
    debug!(
        code = %target.code,
        from = from_edition,
        to = %target.edition,
        steps = applied.len(),
        annotations = annotations.len(),
        "payload migrated"
    );
    Ok(Migration {
        from_edition: from_edition.to_string(),
        to_edition: target.edition.clone(),
        payload: migrated,
        applied,
        annotations,
    })
}

/// Apply one edition's delta to `payload` in declaration order.
pub fn apply_delta(payload: &mut Json, delta: &[DeltaItem]) {
    if !payload.is_object() {
        *payload = Json::Object(Map::new());
    }
    let Json::Object(root) = payload else {
        return;
    };
    for item in delta {
        match item {
            DeltaItem::Rename { from, to } => rename(root, from, to),
            DeltaItem::Move {
                keyword,
                to_questiongroup,
            } => move_question(root, keyword, to_questiongroup),
            DeltaItem::Drop(keyword) => drop_keyword(root, keyword),
            DeltaItem::Relabel { .. } => {}
            DeltaItem::Transform { keyword, mapping } => {
                for_each_value(root, keyword, |value| transform(value, mapping));
            }
        }
    }
    root.retain(|_, instances| instances.as_array().map_or(true, |a| !a.is_empty()));
}

fn instances_mut(root: &mut Map<String, Json>) -> impl Iterator<Item = &mut Map<String, Json>> {
    root.values_mut()
        .filter_map(Json::as_array_mut)
        .flatten()
        .filter_map(Json::as_object_mut)
}

fn for_each_value(root: &mut Map<String, Json>, question: &str, mut f: impl FnMut(&mut Json)) {
    for instance in instances_mut(root) {
        if let Some(value) = instance.get_mut(question) {
            f(value);
        }
    }
}

fn rename(root: &mut Map<String, Json>, from: &str, to: &str) {
    if let Some(group) = root.remove(from) {
        root.entry(to.to_string()).or_insert(group);
        return;
    }
    for instance in instances_mut(root) {
        if let Some(value) = instance.remove(from) {
            instance.entry(to.to_string()).or_insert(value);
        }
    }
}

fn move_question(root: &mut Map<String, Json>, question: &str, target: &str) {
    let mut carried: Vec<(usize, Json)> = Vec::new();
    for (keyword, instances) in root.iter_mut() {
        if keyword == target {
            continue;
        }
        let Some(list) = instances.as_array_mut() else {
            continue;
        };
        for (index, instance) in list.iter_mut().enumerate() {
            if let Some(value) = instance.as_object_mut().and_then(|i| i.remove(question)) {
                carried.push((index, value));
            }
        }
        list.retain(|i| i.as_object().map_or(true, |o| !o.is_empty()));
    }
    if carried.is_empty() {
        return;
    }
    let list = root
        .entry(target.to_string())
        .or_insert_with(|| Json::Array(Vec::new()));
    if !list.is_array() {
        *list = Json::Array(Vec::new());
    }
    let Json::Array(list) = list else {
        return;
    };
    for (index, value) in carried {
        while list.len() <= index {
            list.push(Json::Object(Map::new()));
        }
        if let Some(instance) = list[index].as_object_mut() {
            instance.entry(question.to_string()).or_insert(value);
        }
    }
}

fn drop_keyword(root: &mut Map<String, Json>, keyword: &str) {
    if root.remove(keyword).is_some() {
        return;
    }
    for list in root.values_mut().filter_map(Json::as_array_mut) {
        for instance in list.iter_mut().filter_map(Json::as_object_mut) {
            instance.remove(keyword);
        }
        list.retain(|i| i.as_object().map_or(true, |o| !o.is_empty()));
    }
}

fn transform(value: &mut Json, mapping: &std::collections::BTreeMap<String, String>) {
    match value {
        Json::String(s) => {
            if let Some(mapped) = mapping.get(s.as_str()) {
                *s = mapped.clone();
            }
        }
        Json::Array(items) => items.iter_mut().for_each(|v| transform(v, mapping)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qcat_core::{DomainTables, FeatureToggles};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::path::Path;

    fn registry() -> Registry {
        let registry = Registry::new(DomainTables::bundled(), FeatureToggles::default());
        registry
            .load_dir(&Path::new(env!("CARGO_MANIFEST_DIR")).join("../../configurations"))
            .unwrap();
        registry
    }

    #[test]
    fn sample_2015_to_2018_renames_and_drops() {
        let registry = registry();
        let target = registry.resolve("sample", "2018").unwrap();
        let payload = json!({
            "qg_1": [{"key_1": {"en": "Foo"}}],
            "qg_2": [{"key_2": {"en": "Carried"}}],
            "qg_5": [{"key_7": 3}],
        });
        let migration = migrate(&registry, &payload, "2015", &target).unwrap();
        assert_eq!(migration.applied, vec!["2018".to_string()]);
        assert_eq!(migration.payload["qg_2"][0]["key_2a"], json!({"en": "Carried"}));
        assert!(migration.payload["qg_2"][0].get("key_2").is_none());
        assert!(migration.payload.get("qg_5").is_none());
        assert_eq!(migration.payload["qg_1"], payload["qg_1"]);
    }

    #[test]
    fn same_edition_keeps_the_payload() {
        let registry = registry();
        let target = registry.resolve("sample", "2015").unwrap();
        let payload = json!({"qg_1": [{"key_1": {"en": "Foo"}, "key_3": {"en": "Bar"}}]});
        let migration = migrate(&registry, &payload, "2015", &target).unwrap();
        assert_eq!(migration.payload, payload);
        assert!(migration.applied.is_empty());
        assert!(migration.annotations.is_empty());
    }

    #[test]
    fn applying_a_delta_twice_changes_nothing() {
        let delta = vec![
            DeltaItem::Rename {
                from: "key_2".to_string(),
                to: "key_2a".to_string(),
            },
            DeltaItem::Move {
                keyword: "key_9".to_string(),
                to_questiongroup: "qg_3".to_string(),
            },
            DeltaItem::Drop("qg_5".to_string()),
            DeltaItem::Transform {
                keyword: "key_4".to_string(),
                mapping: BTreeMap::from([("old".to_string(), "new".to_string())]),
            },
        ];
        let mut payload = json!({
            "qg_2": [{"key_2": "x"}],
            "qg_3": [{"key_4": "old"}],
            "qg_5": [{"key_7": 1}],
            "qg_6": [{"key_9": "yes"}],
        });
        apply_delta(&mut payload, &delta);
        let once = payload.clone();
        apply_delta(&mut payload, &delta);
        assert_eq!(payload, once);
        assert_eq!(
            once,
            json!({
                "qg_2": [{"key_2a": "x"}],
                "qg_3": [{"key_4": "new", "key_9": "yes"}],
            })
        );
    }

    #[test]
    fn unknown_carried_values_become_annotations() {
        let registry = registry();
        let target = registry.resolve("sample", "2018").unwrap();
        let payload = json!({"qg_1": [{"key_1": {"en": "Foo"}, "legacy": "x"}]});
        let migration = migrate(&registry, &payload, "2015", &target).unwrap();
        assert_eq!(migration.annotations.len(), 1);
        assert_eq!(migration.annotations[0].questiongroup, "qg_1");
        assert!(migration.annotations[0].message.starts_with("carried-over field requires attention"));
    }
}
