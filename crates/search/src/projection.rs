//! Projection of an answer document into its search index document.

use qcat_core::{Configuration, Labels};
use qcat_storage::{DocumentRecord, Role, UserId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub id: UserId,
    pub name: String,
    pub role: Role,
}

/// A linked document as shown next to the projected one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedSummary {
    pub identifier: String,
    pub configuration: String,
    pub name: Labels,
}

/// A text value as a language map. Plain strings belong to `fallback`.
fn language_map(value: &Value, fallback: &str) -> Map<String, Value> {
    match value {
        Value::Object(map) => map
            .iter()
            .filter(|(_, v)| v.as_str().is_some_and(|s| !s.trim().is_empty()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        Value::String(s) if !s.trim().is_empty() => {
            let mut map = Map::new();
            map.insert(fallback.to_string(), json!(s));
            map
        }
        _ => Map::new(),
    }
}

fn instances<'a>(payload: &'a Value, questiongroup: &str) -> impl Iterator<Item = &'a Value> {
    payload
        .get(questiongroup)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

/// Language map of the first instance of `(questiongroup, question)` with
/// an `original` entry in the document's original language.
fn list_text(doc: &DocumentRecord, field: &(String, String)) -> Value {
    let mut map = instances(&doc.payload, &field.0)
        .find_map(|instance| {
            let m = language_map(instance.get(&field.1)?, &doc.original_language);
            (!m.is_empty()).then_some(m)
        })
        .unwrap_or_default();
    if let Some(original) = map
        .get(&doc.original_language)
        .or_else(|| map.values().next())
        .cloned()
    {
        map.insert("original".to_string(), original);
    }
    Value::Object(map)
}

fn countries(doc: &DocumentRecord, field: &(String, String)) -> Vec<String> {
    let mut out = Vec::new();
    for instance in instances(&doc.payload, &field.0) {
        match instance.get(&field.1) {
            Some(Value::String(s)) => out.push(s.clone()),
            Some(Value::Array(items)) => out.extend(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string),
            ),
            _ => {}
        }
    }
    out.sort();
    out.dedup();
    out
}

/// Concatenated text values per language plus an `original` entry.
fn search_text(doc: &DocumentRecord, config: &Configuration) -> Value {
    let mut per_language: Map<String, Value> = Map::new();
    let mut push = |language: &str, text: &str| {
        let entry = per_language
            .entry(language.to_string())
            .or_insert_with(|| Value::String(String::new()));
        if let Value::String(s) = entry {
            if !s.is_empty() {
                s.push(' ');
            }
            s.push_str(text);
        }
    };
    for question in config.text_questions() {
        for instance in instances(&doc.payload, &question.questiongroup) {
            let Some(value) = instance.get(&question.keyword) else { continue };
            let map = language_map(value, &doc.original_language);
            for (language, text) in &map {
                if let Some(text) = text.as_str() {
                    push(language, text);
                }
            }
            let original = map
                .get(&doc.original_language)
                .or_else(|| map.values().next())
                .and_then(Value::as_str);
            if let Some(text) = original {
                push("original", text);
            }
        }
    }
    Value::Object(per_language)
}

fn people(authors: &[Author], role: Option<Role>) -> Value {
    Value::Array(
        authors
            .iter()
            .filter(|a| role.map_or(true, |r| a.role == r))
            .map(|a| json!({"id": a.id, "name": a.name}))
            .collect(),
    )
}

/// Index document for `doc`. Questiongroups unknown to `config` are not
/// projected.
pub fn project(
    doc: &DocumentRecord,
    config: &Configuration,
    authors: &[Author],
    links: &[LinkedSummary],
) -> Value {
    let mut data = Map::new();
    if let Some(payload) = doc.payload.as_object() {
        for (qg, value) in payload {
            if config.has_questiongroup(qg) {
                data.insert(qg.clone(), value.clone());
            }
        }
    }
    let mut author_list: Vec<Author> = authors
        .iter()
        .filter(|a| matches!(a.role, Role::Compiler | Role::Editor))
        .cloned()
        .collect();
    author_list.dedup_by_key(|a| a.id);

    let definition = match &config.list.definition {
        Some(field) => list_text(doc, field),
        None => json!({}),
    };

    json!({
        "id": doc.id,
        "identifier": doc.identifier,
        "code": doc.identifier,
        "version": doc.version,
        "status": doc.status.as_str(),
        "configurations": [config.code],
        "editions": [config.edition],
        "created": doc.created,
        "updated": doc.updated,
        "translations": doc.translation_languages,
        "original_locale": doc.original_language,
        "authors": people(&author_list, None),
        "compilers": people(authors, Some(Role::Compiler)),
        "editors": people(authors, Some(Role::Editor)),
        "name": list_text(doc, &config.list.name),
        "definition": definition,
        "country": countries(doc, &config.list.country),
        "search_text": search_text(doc, config),
        "links": links,
        "data": data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use qcat_core::{build_configuration, ConfigurationRef, DomainTables};
    use qcat_storage::DocumentStatus;

    fn sample() -> Configuration {
        let doc = qcat_interchange::from_str(include_str!(
            "../../../configurations/sample_2015.json"
        ))
        .unwrap();
        build_configuration(&doc, &DomainTables::bundled()).configuration
    }

    fn document(payload: Value) -> DocumentRecord {
        DocumentRecord {
            id: "doc-1".to_string(),
            identifier: "sample_1".to_string(),
            version: 1,
            status: DocumentStatus::Public,
            configuration: ConfigurationRef::new("sample", "2015"),
            original_language: "en".to_string(),
            translation_languages: vec!["es".to_string()],
            created: "2025-01-01T00:00:00Z".to_string(),
            updated: "2025-01-02T00:00:00Z".to_string(),
            blocked_by: None,
            blocked_until: None,
            revision: 3,
            payload,
            previous_id: None,
            annotations: Vec::new(),
            forked_links: Vec::new(),
        }
    }

    #[test]
    fn list_fields_and_search_text_are_projected() {
        let doc = document(json!({
            "qg_name": [{"name": {"en": "Terraces", "es": "Terrazas"}}],
            "qg_location": [{"country": "country_CHE"}],
            "qg_1": [{"key_1": {"en": "Foo"}, "key_3": "Bar"}],
            "qg_unknown": [{"x": 1}],
        }));
        let authors = vec![
            Author { id: 1, name: "Ada".to_string(), role: Role::Compiler },
            Author { id: 2, name: "Bo".to_string(), role: Role::Editor },
            Author { id: 3, name: "Cy".to_string(), role: Role::Reviewer },
        ];
        let projected = project(&doc, &sample(), &authors, &[]);
        assert_eq!(projected["code"], "sample_1");
        assert_eq!(projected["name"]["es"], "Terrazas");
        assert_eq!(projected["name"]["original"], "Terraces");
        assert_eq!(projected["country"], json!(["country_CHE"]));
        assert_eq!(projected["authors"].as_array().unwrap().len(), 2);
        assert_eq!(projected["compilers"][0]["name"], "Ada");
        assert!(projected["data"].get("qg_unknown").is_none());
        let english = projected["search_text"]["en"].as_str().unwrap();
        assert!(english.contains("Foo") && english.contains("Bar"));
        assert_eq!(projected["search_text"]["es"], "Terrazas");
    }
}
