//! Build pipeline from a configuration document to a [`Configuration`].
//!
//! Every pass records issues instead of stopping at the first one, so a
//! broken configuration still yields a best-effort model that can render
//! stored documents read-only.

use crate::error::ConfigIssue;
use crate::model::Configuration;
use crate::pass1_tree::build_tree;
use crate::pass2_index::build_indexes;
use crate::pass3_references::validate_references;
use crate::pass4_editions::apply_edition;
use crate::tables::DomainTables;
use qcat_interchange::ConfigurationDocument;

pub struct Built {
    pub configuration: Configuration,
    pub issues: Vec<ConfigIssue>,
}

impl Built {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

pub fn build_configuration(doc: &ConfigurationDocument, tables: &DomainTables) -> Built {
    let mut issues = Vec::new();

    let tree = build_tree(doc, tables, &mut issues);
    let indexes = build_indexes(&tree.sections, &tree.questiongroups, &mut issues);

    let mut configuration = Configuration {
        code: doc.code.clone(),
        edition: doc.edition.clone(),
        active: doc.active,
        module: doc.module,
        languages: doc.languages.clone(),
        list: doc.list.clone(),
        links_allowed: doc.links.as_ref().map(|l| l.allowed.clone()),
        sections: tree.sections,
        predecessor: None,
        delta: Vec::new(),
        questiongroups: tree.questiongroups,
        questiongroup_index: indexes.questiongroups,
        question_index: indexes.questions,
        category_index: indexes.categories,
    };

    validate_references(&configuration, &mut issues);
    if let Some(editions) = &doc.editions {
        apply_edition(&mut configuration, editions, &mut issues);
    }

    Built {
        configuration,
        issues,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConditionEffect, QuestionType};
    use serde_json::json;

    fn sample(edition: &str) -> ConfigurationDocument {
        let text = match edition {
            "2015" => include_str!("../../../configurations/sample_2015.json"),
            _ => include_str!("../../../configurations/sample_2018.json"),
        };
        qcat_interchange::from_str(text).unwrap()
    }

    #[test]
    fn sample_configuration_builds_cleanly() {
        let built = build_configuration(&sample("2015"), &DomainTables::bundled());
        assert!(built.is_valid(), "issues: {:?}", built.issues);
        let config = built.configuration;
        assert_eq!(config.code, "sample");
        assert!(config.get_category("cat_1").is_ok());
        assert!(config.get_category("cat_9").is_err());

        let key_1 = config.get_question("key_1").unwrap();
        assert_eq!(key_1.questiongroup, "qg_1");
        assert!(key_1.is_text());
        assert!(key_1.constraints.required);

        let country = config.get_question("country").unwrap();
        assert!(country.choice("country_CHE").is_some());

        let key_9 = config.get_question("key_9").unwrap();
        assert_eq!(key_9.kind, QuestionType::Bool);
        assert_eq!(key_9.choices.len(), 2);

        let key_12 = config.get_question("key_12").unwrap();
        assert_eq!(
            key_12
                .conditions_with(ConditionEffect::PopulateFrom)
                .count(),
            1
        );
    }

    #[test]
    fn questiongroups_iterate_in_document_order_and_restart() {
        let config = build_configuration(&sample("2015"), &DomainTables::bundled()).configuration;
        let first: Vec<_> = config.questiongroups().map(|qg| qg.keyword.clone()).collect();
        let second: Vec<_> = config.questiongroups().map(|qg| qg.keyword.clone()).collect();
        assert_eq!(first, second);
        assert_eq!(first[0], "qg_name");
        assert_eq!(first[2], "qg_1");
        let cat_2: Vec<_> = config
            .category_questiongroups("cat_2")
            .unwrap()
            .into_iter()
            .map(|qg| qg.keyword.as_str())
            .collect();
        assert_eq!(cat_2, vec!["qg_3", "qg_4", "qg_5"]);
    }

    #[test]
    fn edition_relabel_is_applied() {
        let built = build_configuration(&sample("2018"), &DomainTables::bundled());
        assert!(built.is_valid(), "issues: {:?}", built.issues);
        let config = built.configuration;
        assert_eq!(config.predecessor.as_deref(), Some("2015"));
        assert_eq!(config.delta.len(), 3);
        let key_1 = config.get_question("key_1").unwrap();
        assert_eq!(key_1.label("en"), "Key 1 (edition 2018)");
        assert_eq!(key_1.label("es"), "Clave 1 (edición 2018)");
        assert!(!config.has_questiongroup("qg_5"));
        assert!(config.has_question("key_2a"));
    }

    #[test]
    fn structural_problems_are_all_recorded() {
        let doc = qcat_interchange::from_document(&json!({
            "code": "broken",
            "edition": "1",
            "sections": [{
                "keyword": "s",
                "categories": [{
                    "keyword": "c",
                    "subcategories": [{
                        "keyword": "sc",
                        "questiongroups": [
                            {"keyword": "qg_a", "min": 3, "max": 2, "questions": [
                                {"keyword": "k1", "type": "select", "choices_ref": "missing"},
                                {"keyword": "k2", "type": "char", "conditions": [
                                    {"depends_on": "nope", "operator": "equals", "values": ["x"]}
                                ]}
                            ]},
                            {"keyword": "qg_a", "questions": []},
                            {"keyword": "qg_b", "questions": [
                                {"keyword": "k1", "type": "char"}
                            ]}
                        ]
                    }]
                }]
            }]
        }))
        .unwrap();
        let built = build_configuration(&doc, &DomainTables::bundled());
        let messages: Vec<String> = built.issues.iter().map(|i| i.to_string()).collect();
        assert!(messages.iter().any(|m| m.contains("unknown choice set 'missing'")));
        assert!(messages.iter().any(|m| m.contains("duplicate questiongroup keyword")));
        assert!(messages.iter().any(|m| m.contains("duplicate question keyword")));
        assert!(messages.iter().any(|m| m.contains("min 3 exceeds max 2")));
        assert!(messages.iter().any(|m| m.contains("unknown trigger question 'nope'")));
        // The first declaration wins lookups.
        assert_eq!(
            built.configuration.questiongroup_of("k1").unwrap().keyword,
            "qg_a"
        );
    }

    #[test]
    fn transform_mapping_must_not_chain() {
        let mut doc = sample("2018");
        if let Some(editions) = doc.editions.as_mut() {
            editions.delta.push(qcat_interchange::DeltaItem::Transform {
                keyword: "key_4".to_string(),
                mapping: [("y", "yes"), ("yes", "ja")]
                    .into_iter()
                    .map(|(a, b)| (a.to_string(), b.to_string()))
                    .collect(),
            });
        }
        let built = build_configuration(&doc, &DomainTables::bundled());
        assert!(built
            .issues
            .iter()
            .any(|i| i.message.contains("both a source and a target")));
    }
}
