//! Pass 1: Tree construction -- lower the document declarations into the
//! traversal model, resolving choice sets and numeric bounds.

use crate::error::ConfigIssue;
use crate::model::*;
use crate::tables::DomainTables;
use qcat_interchange::{
    ChoiceDecl, ConfigurationDocument, ConstraintsDecl, QuestionDecl, QuestiongroupDecl,
    SubcategoryDecl,
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;

const PASS: u8 = 1;

/// Output of pass 1: the section tree and the flat questiongroup list.
pub struct Tree {
    pub sections: Vec<Section>,
    pub questiongroups: Vec<Questiongroup>,
}

struct Lowering<'a> {
    choice_sets: HashMap<&'a str, Vec<Choice>>,
    questiongroups: Vec<Questiongroup>,
    issues: &'a mut Vec<ConfigIssue>,
}

pub fn build_tree(
    doc: &ConfigurationDocument,
    tables: &DomainTables,
    issues: &mut Vec<ConfigIssue>,
) -> Tree {
    let mut choice_sets = HashMap::new();
    for set in &doc.choice_sets {
        let choices = match &set.source {
            Some(source) => match tables.get(source) {
                Some(choices) => choices.to_vec(),
                None => {
                    issues.push(ConfigIssue::new(
                        PASS,
                        "choice_set",
                        Some(&set.keyword),
                        Some("source"),
                        format!("unknown domain table '{}'", source),
                    ));
                    Vec::new()
                }
            },
            None => lower_choices(&set.choices),
        };
        if choice_sets.insert(set.keyword.as_str(), choices).is_some() {
            issues.push(ConfigIssue::new(
                PASS,
                "choice_set",
                Some(&set.keyword),
                None,
                "duplicate choice set keyword",
            ));
        }
    }

    let mut lowering = Lowering {
        choice_sets,
        questiongroups: Vec::new(),
        issues,
    };

    let sections = doc
        .sections
        .iter()
        .map(|section| Section {
            keyword: section.keyword.clone(),
            label: section.label.clone(),
            categories: section
                .categories
                .iter()
                .map(|cat| Category {
                    keyword: cat.keyword.clone(),
                    section: section.keyword.clone(),
                    label: cat.label.clone(),
                    view_options: cat.view_options.clone(),
                    subcategories: cat
                        .subcategories
                        .iter()
                        .map(|sub| lowering.subcategory(sub, &cat.keyword))
                        .collect(),
                })
                .collect(),
        })
        .collect();

    Tree {
        sections,
        questiongroups: lowering.questiongroups,
    }
}

impl Lowering<'_> {
    fn subcategory(&mut self, decl: &SubcategoryDecl, category: &str) -> Subcategory {
        if !decl.questiongroups.is_empty() && !decl.subcategories.is_empty() {
            self.issues.push(ConfigIssue::new(
                PASS,
                "subcategory",
                Some(&decl.keyword),
                None,
                "subcategory holds both questiongroups and nested subcategories",
            ));
        }
        let mut keywords = Vec::with_capacity(decl.questiongroups.len());
        for qg in &decl.questiongroups {
            keywords.push(qg.keyword.clone());
            let lowered = self.questiongroup(qg, category);
            self.questiongroups.push(lowered);
        }
        Subcategory {
            keyword: decl.keyword.clone(),
            label: decl.label.clone(),
            questiongroups: keywords,
            subcategories: decl
                .subcategories
                .iter()
                .map(|s| self.subcategory(s, category))
                .collect(),
        }
    }

    fn questiongroup(&mut self, decl: &QuestiongroupDecl, category: &str) -> Questiongroup {
        Questiongroup {
            keyword: decl.keyword.clone(),
            category: category.to_string(),
            questions: decl
                .questions
                .iter()
                .map(|q| self.question(q, &decl.keyword))
                .collect(),
            min: decl.min,
            max: decl.max,
            numbered: decl.numbered,
            plus_group: decl.plus_group,
            conditional: decl.conditional.as_ref().map(|c| GroupCondition {
                trigger_question: c.trigger_question.clone(),
                operator: c.operator,
                values: c.values.clone(),
            }),
            helptext: decl.helptext.clone(),
            view_template: decl.view_template.clone(),
        }
    }

    fn question(&mut self, decl: &QuestionDecl, questiongroup: &str) -> Question {
        let choices = self.choices_for(decl);
        let table = decl.table.as_ref().map(|t| TableLayout {
            rows: t
                .rows
                .iter()
                .map(|r| TableRow {
                    keyword: r.keyword.clone(),
                    label: r.label.clone(),
                })
                .collect(),
            columns: t.columns.iter().map(|c| self.question(c, "")).collect(),
            min: t.min,
            max: t.max,
        });
        if decl.kind == QuestionType::Table && table.is_none() {
            self.issues.push(ConfigIssue::new(
                PASS,
                "question",
                Some(&decl.keyword),
                Some("table"),
                "table question without a table layout",
            ));
        }
        Question {
            keyword: decl.keyword.clone(),
            questiongroup: questiongroup.to_string(),
            kind: decl.kind,
            label: decl.label.clone(),
            helptext: decl.helptext.clone(),
            constraints: self.constraints(&decl.keyword, &decl.constraints),
            choices,
            other: decl.other.as_ref().map(|o| OtherEscape {
                value: o.value.clone(),
                question: o.question.clone(),
            }),
            link_configuration: decl.link_configuration.clone(),
            table,
            conditions: decl
                .conditions
                .iter()
                .map(|c| Condition {
                    depends_on: c.depends_on.clone(),
                    operator: c.operator,
                    values: c.values.clone(),
                    effect: c.effect,
                })
                .collect(),
        }
    }

    fn choices_for(&mut self, decl: &QuestionDecl) -> Vec<Choice> {
        if let Some(inline) = &decl.choices {
            return lower_choices(inline);
        }
        if let Some(reference) = &decl.choices_ref {
            return match self.choice_sets.get(reference.as_str()) {
                Some(choices) => choices.clone(),
                None => {
                    self.issues.push(ConfigIssue::new(
                        PASS,
                        "question",
                        Some(&decl.keyword),
                        Some("choices_ref"),
                        format!("unknown choice set '{}'", reference),
                    ));
                    Vec::new()
                }
            };
        }
        match decl.kind {
            QuestionType::Bool => implicit_choices(&[("yes", "Yes"), ("no", "No")]),
            QuestionType::Measure => implicit_choices(&[
                ("none", "None"),
                ("low", "Low"),
                ("medium", "Medium"),
                ("high", "High"),
            ]),
            _ => Vec::new(),
        }
    }

    fn constraints(&mut self, keyword: &str, decl: &ConstraintsDecl) -> Constraints {
        Constraints {
            max_length: decl.max_length,
            rows: decl.rows,
            required: decl.required,
            max_file_size: decl.max_file_size,
            allowed_mime: decl.allowed_mime.clone(),
            min: self.bound(keyword, "min", decl.min.as_ref()),
            max: self.bound(keyword, "max", decl.max.as_ref()),
        }
    }

    fn bound(
        &mut self,
        keyword: &str,
        field: &str,
        raw: Option<&serde_json::Value>,
    ) -> Option<Decimal> {
        let raw = raw?;
        let parsed = match raw {
            serde_json::Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
            serde_json::Value::String(s) => Decimal::from_str(s).ok(),
            _ => None,
        };
        if parsed.is_none() {
            self.issues.push(ConfigIssue::new(
                PASS,
                "question",
                Some(keyword),
                Some(field),
                format!("bound {} is not a number", raw),
            ));
        }
        parsed
    }
}

fn lower_choices(decls: &[ChoiceDecl]) -> Vec<Choice> {
    decls
        .iter()
        .map(|c| Choice {
            value: c.value.clone(),
            label: c.label.clone(),
            image: c.image.clone(),
        })
        .collect()
}

fn implicit_choices(pairs: &[(&str, &str)]) -> Vec<Choice> {
    pairs
        .iter()
        .map(|(value, en)| {
            let mut label = Labels::new();
            label.insert("en".to_string(), en.to_string());
            Choice {
                value: value.to_string(),
                label,
                image: None,
            }
        })
        .collect()
}
