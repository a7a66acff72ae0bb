//! Index mapping derived from a configuration.

use std::collections::BTreeMap;

use qcat_core::{Configuration, Question, QuestionType};
use serde_json::{json, Map, Value};

/// Language → analyzer table with `standard` as fallback.
#[derive(Debug, Clone, Default)]
pub struct Analyzers {
    by_language: BTreeMap<String, String>,
}

impl Analyzers {
    pub fn new(by_language: BTreeMap<String, String>) -> Self {
        Analyzers { by_language }
    }

    /// The analyzers Elasticsearch ships for the languages QCAT supports.
    pub fn builtin() -> Self {
        let pairs = [
            ("en", "english"),
            ("es", "spanish"),
            ("fr", "french"),
            ("pt", "portuguese"),
            ("ru", "russian"),
            ("ar", "arabic"),
            ("de", "german"),
        ];
        Analyzers::new(
            pairs
                .into_iter()
                .map(|(l, a)| (l.to_string(), a.to_string()))
                .collect(),
        )
    }

    pub fn for_language(&self, language: &str) -> &str {
        self.by_language
            .get(language)
            .map(String::as_str)
            .unwrap_or("standard")
    }
}

fn multilingual(languages: &[String], analyzers: &Analyzers, with_original: bool) -> Value {
    let mut properties = Map::new();
    for language in languages {
        properties.insert(
            language.clone(),
            json!({"type": "text", "analyzer": analyzers.for_language(language)}),
        );
    }
    if with_original {
        properties.insert("original".to_string(), json!({"type": "text"}));
    }
    json!({"type": "object", "properties": properties})
}

fn question_mapping(question: &Question, languages: &[String], analyzers: &Analyzers) -> Value {
    match question.kind {
        QuestionType::Char | QuestionType::Text => multilingual(languages, analyzers, false),
        QuestionType::Int => json!({"type": "long"}),
        QuestionType::Float => json!({"type": "double"}),
        QuestionType::Date => json!({"type": "date", "format": "yyyy-MM-dd||strict_date_optional_time"}),
        QuestionType::Select
        | QuestionType::Radio
        | QuestionType::Bool
        | QuestionType::Checkbox
        | QuestionType::ImageCheckbox
        | QuestionType::Measure
        | QuestionType::Image
        | QuestionType::File => json!({"type": "keyword"}),
        QuestionType::User => json!({"type": "object", "properties": {
            "mode": {"type": "keyword"},
            "user_id": {"type": "long"},
            "display_name": {"type": "text"},
        }}),
        QuestionType::Link => json!({"type": "object", "properties": {
            "identifier": {"type": "keyword"},
        }}),
        QuestionType::Table => json!({"type": "object", "enabled": false}),
    }
}

/// Full index body (`settings` + `mappings`) for one configuration.
///
/// `languages` is the union of the configuration's languages and the
/// process-wide language list.
pub fn build_mapping(
    config: &Configuration,
    languages: &[String],
    analyzers: &Analyzers,
) -> Value {
    let mut all_languages: Vec<String> = languages.to_vec();
    for language in &config.languages {
        if !all_languages.contains(language) {
            all_languages.push(language.clone());
        }
    }

    let mut data = Map::new();
    for qg in config.questiongroups() {
        let mut properties = Map::new();
        for question in &qg.questions {
            properties.insert(
                question.keyword.clone(),
                question_mapping(question, &all_languages, analyzers),
            );
        }
        data.insert(
            qg.keyword.clone(),
            json!({"type": "nested", "properties": properties}),
        );
    }
    // Projected into every list view, even when a configuration omits them.
    for global in [&config.list.name.0, &config.list.country.0] {
        data.entry(global.clone())
            .or_insert_with(|| json!({"type": "nested", "dynamic": true}));
    }

    let person = json!({"type": "object", "properties": {
        "id": {"type": "long"},
        "name": {"type": "text", "fields": {"raw": {"type": "keyword"}}},
    }});

    json!({
        "settings": {"index": {"number_of_shards": 1, "max_result_window": 10000}},
        "mappings": {
            "dynamic": false,
            "properties": {
                "id": {"type": "keyword"},
                "identifier": {"type": "keyword"},
                "code": {"type": "keyword"},
                "version": {"type": "integer"},
                "status": {"type": "keyword"},
                "configurations": {"type": "keyword"},
                "editions": {"type": "keyword"},
                "created": {"type": "date"},
                "updated": {"type": "date"},
                "translations": {"type": "keyword"},
                "original_locale": {"type": "keyword"},
                "authors": person.clone(),
                "compilers": person.clone(),
                "editors": person,
                "name": multilingual(&all_languages, analyzers, true),
                "definition": multilingual(&all_languages, analyzers, true),
                "country": {"type": "keyword"},
                "search_text": multilingual(&all_languages, analyzers, true),
                "links": {"type": "object", "properties": {
                    "identifier": {"type": "keyword"},
                    "configuration": {"type": "keyword"},
                    "name": {"type": "object", "dynamic": true},
                }},
                "data": {"type": "object", "properties": data},
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use qcat_core::{build_configuration, DomainTables};

    fn sample() -> Configuration {
        let doc = qcat_interchange::from_str(include_str!(
            "../../../configurations/sample_2015.json"
        ))
        .unwrap();
        build_configuration(&doc, &DomainTables::bundled()).configuration
    }

    #[test]
    fn text_questions_get_per_language_analyzers() {
        let mapping = build_mapping(&sample(), &["en".to_string()], &Analyzers::builtin());
        let key_1 = &mapping["mappings"]["properties"]["data"]["properties"]["qg_1"]["properties"]
            ["key_1"]["properties"];
        assert_eq!(key_1["en"]["analyzer"], "english");
        assert_eq!(key_1["es"]["analyzer"], "spanish");
        assert_eq!(key_1["fr"]["analyzer"], "french");
    }

    #[test]
    fn questiongroups_are_nested_and_types_are_natural() {
        let mapping = build_mapping(&sample(), &[], &Analyzers::builtin());
        let data = &mapping["mappings"]["properties"]["data"]["properties"];
        assert_eq!(data["qg_5"]["type"], "nested");
        assert_eq!(data["qg_5"]["properties"]["key_7"]["type"], "long");
        assert_eq!(data["qg_9"]["properties"]["key_14"]["type"], "double");
        assert_eq!(data["qg_3"]["properties"]["key_4"]["type"], "keyword");
        assert_eq!(data["qg_location"]["properties"]["country"]["type"], "keyword");
        for top in ["code", "created", "updated", "configurations", "translations", "authors"] {
            assert!(mapping["mappings"]["properties"].get(top).is_some(), "{top}");
        }
    }

    #[test]
    fn unknown_language_falls_back_to_standard() {
        assert_eq!(Analyzers::builtin().for_language("km"), "standard");
    }
}
