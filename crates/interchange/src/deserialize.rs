//! Deserialization of configuration documents.
//!
//! The main entry point is [`from_document`], which takes a
//! `&serde_json::Value` and produces a [`ConfigurationDocument`].

use crate::types::*;
use std::fmt;

/// Errors during configuration document deserialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterchangeError {
    /// The document root is not a JSON object.
    NotAnObject,
    /// A required top-level field is absent or has the wrong JSON type.
    MissingField { field: String },
    /// A section of the document does not match the expected shape.
    Malformed { path: String, message: String },
}

impl fmt::Display for InterchangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterchangeError::NotAnObject => {
                write!(f, "configuration document must be a JSON object")
            }
            InterchangeError::MissingField { field } => {
                write!(f, "document missing required field: '{}'", field)
            }
            InterchangeError::Malformed { path, message } => {
                write!(f, "{}: {}", path, message)
            }
        }
    }
}

impl std::error::Error for InterchangeError {}

/// Deserialize a configuration document.
///
/// Checks the required top-level fields first so that the common mistakes
/// produce a precise message, then hands each part to serde with the
/// failing path attached to the error.
pub fn from_document(doc: &serde_json::Value) -> Result<ConfigurationDocument, InterchangeError> {
    let obj = doc.as_object().ok_or(InterchangeError::NotAnObject)?;

    for field in ["code", "edition"] {
        if !obj.get(field).is_some_and(|v| v.is_string()) {
            return Err(InterchangeError::MissingField {
                field: field.to_string(),
            });
        }
    }
    let sections = obj
        .get("sections")
        .and_then(|s| s.as_array())
        .ok_or_else(|| InterchangeError::MissingField {
            field: "sections".to_string(),
        })?;

    // Parse sections one by one so that the error names the culprit.
    for (i, section) in sections.iter().enumerate() {
        let keyword = section
            .get("keyword")
            .and_then(|k| k.as_str())
            .unwrap_or("?");
        serde_json::from_value::<SectionDecl>(section.clone()).map_err(|e| {
            InterchangeError::Malformed {
                path: format!("sections[{}] ({})", i, keyword),
                message: e.to_string(),
            }
        })?;
    }

    serde_json::from_value(doc.clone()).map_err(|e| InterchangeError::Malformed {
        path: "document".to_string(),
        message: e.to_string(),
    })
}

/// Parse a configuration document from JSON text.
pub fn from_str(text: &str) -> Result<ConfigurationDocument, InterchangeError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| InterchangeError::Malformed {
            path: "document".to_string(),
            message: e.to_string(),
        })?;
    from_document(&value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal() -> serde_json::Value {
        json!({
            "code": "sample",
            "edition": "2015",
            "sections": [{
                "keyword": "section_1",
                "label": {"en": "Section 1"},
                "categories": [{
                    "keyword": "cat_1",
                    "subcategories": [{
                        "keyword": "subcat_1_1",
                        "questiongroups": [{
                            "keyword": "qg_1",
                            "questions": [
                                {"keyword": "key_1", "type": "char", "label": {"en": "Key 1"}},
                                {"keyword": "key_4", "type": "select", "choices_ref": "yes_no"}
                            ]
                        }]
                    }]
                }]
            }]
        })
    }

    #[test]
    fn minimal_document_applies_defaults() {
        let doc = from_document(&minimal()).unwrap();
        assert_eq!(doc.code, "sample");
        assert!(doc.active);
        assert!(!doc.module);
        assert_eq!(doc.list.name, ("qg_name".to_string(), "name".to_string()));
        let qg = &doc.sections[0].categories[0].subcategories[0].questiongroups[0];
        assert_eq!(qg.min, 0);
        assert_eq!(qg.max, 1);
        assert_eq!(qg.questions[1].kind, QuestionType::Select);
        assert!(!qg.questions[0].constraints.required);
    }

    #[test]
    fn missing_sections_is_reported() {
        let err = from_document(&json!({"code": "x", "edition": "1"})).unwrap_err();
        assert_eq!(
            err,
            InterchangeError::MissingField {
                field: "sections".to_string()
            }
        );
    }

    #[test]
    fn non_string_code_is_missing() {
        let err = from_document(&json!({"code": 3, "edition": "1", "sections": []})).unwrap_err();
        assert!(matches!(err, InterchangeError::MissingField { field } if field == "code"));
    }

    #[test]
    fn root_must_be_object() {
        assert_eq!(
            from_document(&json!([])).unwrap_err(),
            InterchangeError::NotAnObject
        );
    }

    #[test]
    fn malformed_section_names_the_section() {
        let mut doc = minimal();
        doc["sections"][0]["categories"][0]["subcategories"][0]["questiongroups"][0]["questions"]
            [0]["type"] = json!("hologram");
        let err = from_document(&doc).unwrap_err();
        match err {
            InterchangeError::Malformed { path, .. } => {
                assert!(path.contains("section_1"), "path was {}", path)
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn edition_delta_items_parse() {
        let mut doc = minimal();
        doc["edition"] = json!("2018");
        doc["editions"] = json!({
            "edition": "2018",
            "predecessor": "2015",
            "delta": [
                {"rename": {"from": "key_2", "to": "key_2a"}},
                {"drop": "qg_5"},
                {"move": {"keyword": "key_9", "to_questiongroup": "qg_3"}},
                {"relabel": {"keyword": "key_1", "label": {"en": "Key 1 (edition 2018)"}}},
                {"transform": {"keyword": "key_4", "mapping": {"y": "yes"}}}
            ]
        });
        let parsed = from_document(&doc).unwrap();
        let editions = parsed.editions.unwrap();
        assert_eq!(editions.predecessor.as_deref(), Some("2015"));
        assert_eq!(editions.delta.len(), 5);
        assert_eq!(editions.delta[1], DeltaItem::Drop("qg_5".to_string()));
        assert_eq!(editions.delta[0].keyword(), "key_2");
        assert_eq!(editions.delta[2].keyword(), "key_9");
    }

    #[test]
    fn condition_aliases_are_accepted() {
        let cond: ConditionDecl = serde_json::from_value(json!({
            "depends-on": "key_9",
            "operator": "any-of",
            "values": ["a", "b"],
            "effect": "populate-from"
        }))
        .unwrap();
        assert_eq!(cond.operator, ConditionOperator::AnyOf);
        assert_eq!(cond.effect, ConditionEffect::PopulateFrom);
    }

    #[test]
    fn condition_effect_defaults_to_show() {
        let cond: ConditionDecl = serde_json::from_value(json!({
            "depends_on": "key_9",
            "operator": "selected"
        }))
        .unwrap();
        assert_eq!(cond.effect, ConditionEffect::Show);
        assert!(cond.values.is_empty());
    }

    #[test]
    fn from_str_reports_bad_json() {
        assert!(matches!(
            from_str("{not json"),
            Err(InterchangeError::Malformed { .. })
        ));
    }
}
