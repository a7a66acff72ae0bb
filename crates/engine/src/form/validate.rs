//! Validate-and-bind: turn a submitted step into payload questiongroups,
//! or into per-field diagnostics without touching the document.

use std::collections::BTreeMap;

use qcat_core::{Configuration, Questiongroup, QuestionType};
use serde::Serialize;
use serde_json::{Map, Value as Json};

use super::conditions::{field_state, group_active, instances, within_allowed};
use crate::error::{FieldDiagnostic, QcatError};
use crate::value::{is_present, AnswerValue};

/// An upload referenced by a bound step, checked against the blob store
/// before commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlobRef {
    pub questiongroup: String,
    pub index: usize,
    pub question: String,
    pub uuid: String,
}

/// A linked questionnaire named by a bound step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkRef {
    pub questiongroup: String,
    pub index: usize,
    pub question: String,
    pub identifier: String,
}

/// A validated step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bound {
    pub category: String,
    /// Every questiongroup of the category; empty lists clear the group.
    pub groups: BTreeMap<String, Vec<Json>>,
    pub blobs: Vec<BlobRef>,
    pub links: Vec<LinkRef>,
}

impl Bound {
    /// `payload` with the category's questiongroups replaced.
    pub fn merge_into(&self, payload: &Json) -> Json {
        let mut merged = payload.as_object().cloned().unwrap_or_default();
        for (keyword, instances) in &self.groups {
            if instances.is_empty() {
                merged.remove(keyword);
            } else {
                merged.insert(keyword.clone(), Json::Array(instances.clone()));
            }
        }
        Json::Object(merged)
    }
}

/// Parse the instances submitted for one questiongroup. Empty values and
/// empty instances are dropped; text is merged into `previous` by index.
fn bind_group(
    group: &Questiongroup,
    submitted: Option<&Json>,
    previous: &[Json],
    language: &str,
    diagnostics: &mut Vec<FieldDiagnostic>,
) -> Vec<Json> {
    let raw_instances: Vec<&Json> = match submitted {
        None | Some(Json::Null) => Vec::new(),
        Some(Json::Array(items)) => items.iter().collect(),
        Some(single @ Json::Object(_)) => vec![single],
        Some(_) => {
            diagnostics.push(FieldDiagnostic::group(
                &group.keyword,
                "expected a list of entries",
            ));
            return Vec::new();
        }
    };
    let mut bound = Vec::new();
    for (index, raw) in raw_instances.into_iter().enumerate() {
        let Some(fields) = raw.as_object() else {
            diagnostics.push(FieldDiagnostic {
                questiongroup: group.keyword.clone(),
                index: Some(index),
                question: None,
                message: "expected an object of answers".to_string(),
            });
            continue;
        };
        for keyword in fields.keys() {
            if group.get_question(keyword).is_none() {
                diagnostics.push(FieldDiagnostic::field(
                    &group.keyword,
                    index,
                    keyword,
                    "unknown question",
                ));
            }
        }
        let prior = previous.get(index);
        let mut instance = Map::new();
        for question in &group.questions {
            let Some(raw) = fields.get(&question.keyword) else {
                continue;
            };
            let old = prior.and_then(|p| p.get(&question.keyword));
            match AnswerValue::parse(question, raw, language, old) {
                Ok(Some(value)) => {
                    instance.insert(question.keyword.clone(), value.to_json());
                }
                Ok(None) => {}
                Err(e) => diagnostics.push(FieldDiagnostic::field(
                    &group.keyword,
                    index,
                    &question.keyword,
                    e.to_string(),
                )),
            }
        }
        clear_unselected_other(group, &mut instance);
        if !instance.is_empty() {
            bound.push(Json::Object(instance));
        }
    }
    let count = bound.len();
    if count > group.max as usize {
        diagnostics.push(FieldDiagnostic::group(
            &group.keyword,
            format!("at most {} entries allowed, got {}", group.max, count),
        ));
    } else if count > 0 && count < group.min as usize {
        diagnostics.push(FieldDiagnostic::group(
            &group.keyword,
            format!("at least {} entries required, got {}", group.min, count),
        ));
    }
    bound
}

/// The "other" escape only survives while its choice is selected.
fn clear_unselected_other(group: &Questiongroup, instance: &mut Map<String, Json>) {
    for question in &group.questions {
        let Some(other) = &question.other else {
            continue;
        };
        let selected = match instance.get(&question.keyword) {
            Some(Json::String(s)) => *s == other.value,
            Some(Json::Array(items)) => items.iter().any(|v| v.as_str() == Some(&other.value)),
            _ => false,
        };
        if !selected {
            instance.remove(&other.question);
        }
    }
}

/// Validate the submitted step for `category` against the committed
/// `payload`. Conditions are evaluated on the committed payload with this
/// step applied.
pub fn bind(
    config: &Configuration,
    payload: &Json,
    category: &str,
    submitted: &Json,
    language: &str,
) -> Result<Bound, QcatError> {
    let groups = config.category_questiongroups(category)?;
    let empty = Map::new();
    let submitted = match submitted {
        Json::Object(map) => map,
        Json::Null => &empty,
        _ => {
            return Err(QcatError::ValidationFailed(vec![FieldDiagnostic::group(
                category,
                "expected an object keyed by questiongroup",
            )]))
        }
    };

    let mut diagnostics = Vec::new();
    for keyword in submitted.keys() {
        if !groups.iter().any(|g| g.keyword == *keyword) {
            diagnostics.push(FieldDiagnostic::group(
                keyword,
                format!("not part of step {}", category),
            ));
        }
    }
    let mut bound = Bound {
        category: category.to_string(),
        ..Bound::default()
    };
    for group in &groups {
        let instances = bind_group(
            group,
            submitted.get(&group.keyword),
            instances(payload, &group.keyword),
            language,
            &mut diagnostics,
        );
        bound.groups.insert(group.keyword.clone(), instances);
    }
    if !diagnostics.is_empty() {
        return Err(QcatError::ValidationFailed(diagnostics));
    }

    let effective = bound.merge_into(payload);
    for group in &groups {
        let stored = &bound.groups[&group.keyword];
        if !stored.is_empty() && !group_active(config, &effective, group) {
            diagnostics.push(FieldDiagnostic::group(
                &group.keyword,
                "questiongroup is inactive and must be empty",
            ));
            continue;
        }
        for (index, instance) in stored.iter().enumerate() {
            for question in &group.questions {
                let Some(raw) = instance.get(&question.keyword) else {
                    continue;
                };
                let state = field_state(config, &effective, question, Some((&group.keyword, index)));
                let message = if !state.visible {
                    Some("hidden by a condition and must be empty".to_string())
                } else if !state.enabled {
                    Some("disabled by a condition and must be empty".to_string())
                } else {
                    state.allowed.as_ref().and_then(|allowed| {
                        let value = AnswerValue::parse(question, raw, language, None).ok().flatten()?;
                        (!within_allowed(&value, allowed)).then(|| {
                            format!("only {} may be chosen", allowed.join(", "))
                        })
                    })
                };
                if let Some(message) = message {
                    diagnostics.push(FieldDiagnostic::field(
                        &group.keyword,
                        index,
                        &question.keyword,
                        message,
                    ));
                    continue;
                }
                match question.kind {
                    QuestionType::Image | QuestionType::File => {
                        if let Some(uuid) = raw.as_str() {
                            bound.blobs.push(BlobRef {
                                questiongroup: group.keyword.clone(),
                                index,
                                question: question.keyword.clone(),
                                uuid: uuid.to_string(),
                            });
                        }
                    }
                    QuestionType::Link => {
                        if let Some(identifier) = raw.get("link_identifier").and_then(Json::as_str) {
                            bound.links.push(LinkRef {
                                questiongroup: group.keyword.clone(),
                                index,
                                question: question.keyword.clone(),
                                identifier: identifier.to_string(),
                            });
                        }
                    }
                    _ => {}
                }
            }
        }
    }
    if diagnostics.is_empty() {
        Ok(bound)
    } else {
        Err(QcatError::ValidationFailed(diagnostics))
    }
}

/// Remove answers that conditions no longer allow: inactive groups,
/// hidden or disabled fields and choices outside a populated list.
/// Returns the `qg[i].question` paths that were cleared.
pub fn prune_hidden(config: &Configuration, payload: &mut Json) -> Vec<String> {
    let mut cleared = Vec::new();
    // Clearing a trigger can hide further fields; chains are short.
    for _ in 0..8 {
        let snapshot = payload.clone();
        let mut removals: Vec<(String, Option<(usize, String, Option<Vec<String>>)>)> = Vec::new();
        for group in config.questiongroups() {
            let stored = instances(&snapshot, &group.keyword);
            if stored.is_empty() {
                continue;
            }
            if !group_active(config, &snapshot, group) {
                removals.push((group.keyword.clone(), None));
                continue;
            }
            for (index, instance) in stored.iter().enumerate() {
                for question in &group.questions {
                    let Some(raw) = instance.get(&question.keyword) else {
                        continue;
                    };
                    let state = field_state(config, &snapshot, question, Some((&group.keyword, index)));
                    if !state.accepts_values() {
                        removals.push((group.keyword.clone(), Some((index, question.keyword.clone(), None))));
                    } else if let Some(allowed) = state.allowed {
                        let fits = AnswerValue::parse(question, raw, "", None)
                            .ok()
                            .flatten()
                            .map_or(true, |v| within_allowed(&v, &allowed));
                        if !fits {
                            removals.push((
                                group.keyword.clone(),
                                Some((index, question.keyword.clone(), Some(allowed))),
                            ));
                        }
                    }
                }
            }
        }
        if removals.is_empty() {
            break;
        }
        let Some(root) = payload.as_object_mut() else {
            break;
        };
        for (group, field) in removals {
            match field {
                None => {
                    root.remove(&group);
                    cleared.push(group);
                }
                Some((index, question, allowed)) => {
                    let Some(instance) = root
                        .get_mut(&group)
                        .and_then(Json::as_array_mut)
                        .and_then(|list| list.get_mut(index))
                        .and_then(Json::as_object_mut)
                    else {
                        continue;
                    };
                    match (allowed, instance.get_mut(&question)) {
                        (Some(allowed), Some(Json::Array(items))) => {
                            items.retain(|v| v.as_str().is_some_and(|s| allowed.iter().any(|a| a == s)));
                            if items.is_empty() {
                                instance.remove(&question);
                            }
                        }
                        _ => {
                            instance.remove(&question);
                        }
                    }
                    cleared.push(format!("{}[{}].{}", group, index, question));
                }
            }
        }
        for list in root.values_mut().filter_map(Json::as_array_mut) {
            list.retain(|i| i.as_object().map_or(true, |o| !o.is_empty()));
        }
        root.retain(|_, v| v.as_array().map_or(true, |a| !a.is_empty()));
    }
    cleared
}

/// Required answers missing before a document may be submitted.
///
/// Groups with `min >= 1` need entries; required questions must be
/// answered in every entry of an active group where they are visible.
pub fn missing_for_submit(config: &Configuration, payload: &Json) -> Vec<String> {
    let mut missing = Vec::new();
    for group in config.questiongroups() {
        if !group_active(config, payload, group) {
            continue;
        }
        let stored = instances(payload, &group.keyword);
        if stored.len() < group.min as usize {
            missing.push(format!("{} (at least {} entries)", group.keyword, group.min));
        }
        for (index, instance) in stored.iter().enumerate() {
            for question in group.questions.iter().filter(|q| q.constraints.required) {
                if !field_state(config, payload, question, Some((&group.keyword, index))).visible {
                    continue;
                }
                let present = instance
                    .get(&question.keyword)
                    .is_some_and(|raw| is_present(question, raw));
                if !present {
                    missing.push(format!("{}[{}].{}", group.keyword, index, question.keyword));
                }
            }
        }
    }
    missing
}

/// Check a stored payload against `config`, as done after migrations and
/// by the data check.
pub fn validate_payload(config: &Configuration, payload: &Json) -> Vec<FieldDiagnostic> {
    let mut diagnostics = Vec::new();
    let Some(root) = payload.as_object() else {
        return vec![FieldDiagnostic::group("payload", "expected an object")];
    };
    for (keyword, value) in root {
        let Ok(group) = config.get_questiongroup(keyword) else {
            diagnostics.push(FieldDiagnostic::group(keyword, "unknown questiongroup"));
            continue;
        };
        let before = diagnostics.len();
        let bound = bind_group(group, Some(value), &[], "", &mut diagnostics);
        if diagnostics.len() == before && bound.len() != value.as_array().map_or(1, Vec::len) {
            diagnostics.push(FieldDiagnostic::group(keyword, "contains empty entries"));
        }
    }
    diagnostics
}

#[cfg(test)]
mod tests {
    use super::*;
    use qcat_core::{build_configuration, DomainTables};
    use serde_json::json;

    fn sample() -> Configuration {
        let doc = qcat_interchange::from_str(include_str!(
            "../../../../configurations/sample_2015.json"
        ))
        .unwrap();
        build_configuration(&doc, &DomainTables::bundled()).configuration
    }

    #[test]
    fn binds_a_step_and_drops_empty_entries() {
        let config = sample();
        let submitted = json!({"qg_1": [{"key_1": "Foo", "key_3": ""}, {}], "qg_2": []});
        let bound = bind(&config, &json!({}), "cat_1", &submitted, "en").unwrap();
        assert_eq!(bound.groups["qg_1"], vec![json!({"key_1": {"en": "Foo"}})]);
        assert!(bound.groups["qg_2"].is_empty());
        let merged = bound.merge_into(&json!({"qg_2": [{"key_2": {"en": "old"}}], "qg_3": [{"key_4": "yes"}]}));
        assert_eq!(merged, json!({"qg_1": [{"key_1": {"en": "Foo"}}], "qg_3": [{"key_4": "yes"}]}));
    }

    #[test]
    fn diagnostics_address_fields() {
        let config = sample();
        let submitted = json!({"qg_1": [{"key_1": "x".repeat(501), "bogus": 1}], "qg_9": []});
        let err = bind(&config, &json!({}), "cat_1", &submitted, "en").unwrap_err();
        let fields: Vec<String> = err.diagnostics().iter().map(|d| d.to_string()).collect();
        assert!(fields.iter().any(|f| f.starts_with("qg_9: not part of step cat_1")));
        assert!(fields.iter().any(|f| f.starts_with("qg_1[0].bogus")));
        assert!(fields.iter().any(|f| f.starts_with("qg_1[0].key_1")));
    }

    #[test]
    fn repetition_bounds_are_enforced() {
        let config = sample();
        let entries: Vec<Json> = (0..4).map(|n| json!({"key_7": n})).collect();
        let err = bind(&config, &json!({}), "cat_2", &json!({"qg_5": entries}), "en").unwrap_err();
        assert!(err.diagnostics()[0].message.contains("at most 3"));
    }

    #[test]
    fn other_escape_is_cleared_when_other_is_not_selected() {
        let config = sample();
        let submitted = json!({"qg_4": [{"key_5": ["a"], "key_6": "something else"}]});
        let bound = bind(&config, &json!({}), "cat_2", &submitted, "en").unwrap();
        assert_eq!(bound.groups["qg_4"], vec![json!({"key_5": ["a"]})]);
        let kept = json!({"qg_4": [{"key_5": ["other"], "key_6": "something else"}]});
        let bound = bind(&config, &json!({}), "cat_2", &kept, "en").unwrap();
        assert_eq!(bound.groups["qg_4"][0]["key_6"], json!({"en": "something else"}));
    }

    #[test]
    fn hidden_fields_must_be_empty() {
        let config = sample();
        let submitted = json!({"qg_6": [{"key_9": "no", "key_10": "visible?"}]});
        let err = bind(&config, &json!({}), "cat_3", &submitted, "en").unwrap_err();
        assert_eq!(err.diagnostics()[0].question.as_deref(), Some("key_10"));
        // qg_7 depends on key_8 from the committed cat_2.
        let err = bind(&config, &json!({}), "cat_3", &json!({"qg_7": [{"key_11": "2020-01-01"}]}), "en")
            .unwrap_err();
        assert!(err.diagnostics()[0].message.contains("inactive"));
        let committed = json!({"qg_3": [{"key_8": "medium"}]});
        assert!(bind(&config, &committed, "cat_3", &json!({"qg_7": [{"key_11": "2020-01-01"}]}), "en").is_ok());
    }

    #[test]
    fn populated_choices_come_from_the_committed_trigger() {
        let config = sample();
        let committed = json!({"qg_4": [{"key_5": ["a"]}]});
        assert!(bind(&config, &committed, "cat_4", &json!({"qg_8": [{"key_12": ["a"]}]}), "en").is_ok());
        let err = bind(&config, &committed, "cat_4", &json!({"qg_8": [{"key_12": ["b"]}]}), "en").unwrap_err();
        assert!(err.diagnostics()[0].message.contains("only a"));
    }

    #[test]
    fn pruning_cascades_to_dependent_steps() {
        let config = sample();
        let mut payload = json!({
            "qg_3": [{"key_8": "none"}],
            "qg_7": [{"key_11": "2020-01-01"}],
            "qg_6": [{"key_9": "no", "key_10": {"en": "left over"}}],
        });
        let cleared = prune_hidden(&config, &mut payload);
        assert_eq!(payload, json!({"qg_3": [{"key_8": "none"}], "qg_6": [{"key_9": "no"}]}));
        assert_eq!(cleared.len(), 2);
        assert!(prune_hidden(&config, &mut payload).is_empty());
    }

    #[test]
    fn required_answers_are_checked_per_entry() {
        let config = sample();
        assert!(missing_for_submit(&config, &json!({"qg_1": [{"key_1": {"en": "Foo"}}]})).is_empty());
        let missing = missing_for_submit(&config, &json!({"qg_1": [{"key_3": {"en": "Bar"}}]}));
        assert_eq!(missing, vec!["qg_1[0].key_1".to_string()]);
    }

    #[test]
    fn stored_payloads_are_checked() {
        let config = sample();
        let problems = validate_payload(&config, &json!({"qg_1": [{"key_1": 5}], "qg_99": []}));
        assert_eq!(problems.len(), 2);
        assert!(validate_payload(&config, &json!({"qg_1": [{"key_1": {"en": "ok"}}]})).is_empty());
    }
}
