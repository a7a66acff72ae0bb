//! Traversal model for one configuration at one edition.
//!
//! Built once per `(code, edition)` by [`crate::build::build_configuration`]
//! and then shared read-only behind an `Arc`. Questiongroups are owned in
//! document order by the [`Configuration`]; the section tree refers to them
//! by keyword. HashMap indexes give O(1) lookup by keyword.

use crate::error::ConfigurationError;
use rust_decimal::Decimal;
use std::collections::HashMap;

pub use qcat_interchange::{
    ConditionEffect, ConditionOperator, ConfigurationRef, DeltaItem, Labels, ListFields,
    QuestionType,
};

/// Pick the label for `language`, falling back to English, then to any
/// available language.
pub fn localized(labels: &Labels, language: &str) -> String {
    labels
        .get(language)
        .or_else(|| labels.get("en"))
        .or_else(|| labels.values().next())
        .cloned()
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Choice {
    pub value: String,
    pub label: Labels,
    pub image: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Constraints {
    pub max_length: Option<u32>,
    pub rows: Option<u32>,
    pub required: bool,
    pub max_file_size: Option<u64>,
    pub allowed_mime: Vec<String>,
    pub min: Option<Decimal>,
    pub max: Option<Decimal>,
}

/// A question-level condition. The owning question is the dependent.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub depends_on: String,
    pub operator: ConditionOperator,
    pub values: Vec<serde_json::Value>,
    pub effect: ConditionEffect,
}

/// Activation rule for a whole questiongroup.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupCondition {
    pub trigger_question: String,
    pub operator: ConditionOperator,
    pub values: Vec<serde_json::Value>,
}

/// The free-text question that accompanies an "other" choice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtherEscape {
    pub value: String,
    pub question: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub keyword: String,
    pub label: Labels,
}

/// Fixed row layout of a table question. Every row holds a list of
/// cell instances whose shape is given by `columns`.
#[derive(Debug, Clone, PartialEq)]
pub struct TableLayout {
    pub rows: Vec<TableRow>,
    pub columns: Vec<Question>,
    pub min: u32,
    pub max: u32,
}

impl TableLayout {
    pub fn column(&self, keyword: &str) -> Option<&Question> {
        self.columns.iter().find(|c| c.keyword == keyword)
    }

    pub fn row(&self, keyword: &str) -> Option<&TableRow> {
        self.rows.iter().find(|r| r.keyword == keyword)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Question {
    pub keyword: String,
    /// Keyword of the owning questiongroup (empty for table columns).
    pub questiongroup: String,
    pub kind: QuestionType,
    pub label: Labels,
    pub helptext: Option<Labels>,
    pub constraints: Constraints,
    pub choices: Vec<Choice>,
    pub other: Option<OtherEscape>,
    pub link_configuration: Option<String>,
    pub table: Option<TableLayout>,
    pub conditions: Vec<Condition>,
}

impl Question {
    /// Text-valued questions carry a language overlay.
    pub fn is_text(&self) -> bool {
        matches!(self.kind, QuestionType::Char | QuestionType::Text)
    }

    pub fn is_choice(&self) -> bool {
        matches!(
            self.kind,
            QuestionType::Select
                | QuestionType::Radio
                | QuestionType::Bool
                | QuestionType::Checkbox
                | QuestionType::ImageCheckbox
                | QuestionType::Measure
        )
    }

    pub fn is_multi_choice(&self) -> bool {
        matches!(
            self.kind,
            QuestionType::Checkbox | QuestionType::ImageCheckbox
        )
    }

    pub fn choice(&self, value: &str) -> Option<&Choice> {
        self.choices.iter().find(|c| c.value == value)
    }

    pub fn label(&self, language: &str) -> String {
        localized(&self.label, language)
    }

    /// Conditions with the given effect.
    pub fn conditions_with(&self, effect: ConditionEffect) -> impl Iterator<Item = &Condition> {
        self.conditions.iter().filter(move |c| c.effect == effect)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Questiongroup {
    pub keyword: String,
    pub category: String,
    pub questions: Vec<Question>,
    pub min: u32,
    pub max: u32,
    pub numbered: bool,
    pub plus_group: bool,
    pub conditional: Option<GroupCondition>,
    pub helptext: Option<Labels>,
    pub view_template: Option<String>,
}

impl Questiongroup {
    pub fn get_question(&self, keyword: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.keyword == keyword)
    }

    pub fn question_keywords(&self) -> impl Iterator<Item = &str> {
        self.questions.iter().map(|q| q.keyword.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subcategory {
    pub keyword: String,
    pub label: Labels,
    pub questiongroups: Vec<String>,
    pub subcategories: Vec<Subcategory>,
}

impl Subcategory {
    /// Questiongroup keywords of this subcategory and its descendants, in
    /// document order.
    pub fn all_questiongroups(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a str>) {
        out.extend(self.questiongroups.iter().map(String::as_str));
        for sub in &self.subcategories {
            sub.collect(out);
        }
    }
}

/// One editing step.
#[derive(Debug, Clone, PartialEq)]
pub struct Category {
    pub keyword: String,
    pub section: String,
    pub label: Labels,
    pub view_options: Option<serde_json::Value>,
    pub subcategories: Vec<Subcategory>,
}

impl Category {
    pub fn questiongroup_keywords(&self) -> Vec<&str> {
        self.subcategories
            .iter()
            .flat_map(|s| s.all_questiongroups())
            .collect()
    }

    pub fn label(&self, language: &str) -> String {
        localized(&self.label, language)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub keyword: String,
    pub label: Labels,
    pub categories: Vec<Category>,
}

/// The validated, indexed configuration. Obtained from the
/// [`crate::Registry`] as an `Arc<Configuration>` handle.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub code: String,
    pub edition: String,
    pub active: bool,
    pub module: bool,
    pub languages: Vec<String>,
    pub list: ListFields,
    /// Configuration codes links may point to; `None` accepts any.
    pub links_allowed: Option<Vec<String>>,
    pub sections: Vec<Section>,
    pub predecessor: Option<String>,
    pub delta: Vec<DeltaItem>,
    pub(crate) questiongroups: Vec<Questiongroup>,
    pub(crate) questiongroup_index: HashMap<String, usize>,
    /// question keyword → (questiongroup position, question position)
    pub(crate) question_index: HashMap<String, (usize, usize)>,
    /// category keyword → (section position, category position)
    pub(crate) category_index: HashMap<String, (usize, usize)>,
}

impl Configuration {
    pub fn key(&self) -> ConfigurationRef {
        ConfigurationRef::new(&self.code, &self.edition)
    }

    /// All questiongroups in document order. Call again to restart.
    pub fn questiongroups(&self) -> impl Iterator<Item = &Questiongroup> {
        self.questiongroups.iter()
    }

    pub fn categories(&self) -> impl Iterator<Item = &Category> {
        self.sections.iter().flat_map(|s| s.categories.iter())
    }

    pub fn questions(&self) -> impl Iterator<Item = &Question> {
        self.questiongroups.iter().flat_map(|qg| qg.questions.iter())
    }

    pub fn get_questiongroup(&self, keyword: &str) -> Result<&Questiongroup, ConfigurationError> {
        self.questiongroup_index
            .get(keyword)
            .map(|&i| &self.questiongroups[i])
            .ok_or_else(|| ConfigurationError::not_found("questiongroup", keyword))
    }

    pub fn get_question(&self, keyword: &str) -> Result<&Question, ConfigurationError> {
        self.question_index
            .get(keyword)
            .map(|&(g, q)| &self.questiongroups[g].questions[q])
            .ok_or_else(|| ConfigurationError::not_found("question", keyword))
    }

    pub fn get_category(&self, keyword: &str) -> Result<&Category, ConfigurationError> {
        self.category_index
            .get(keyword)
            .map(|&(s, c)| &self.sections[s].categories[c])
            .ok_or_else(|| ConfigurationError::not_found("category", keyword))
    }

    pub fn has_questiongroup(&self, keyword: &str) -> bool {
        self.questiongroup_index.contains_key(keyword)
    }

    pub fn has_question(&self, keyword: &str) -> bool {
        self.question_index.contains_key(keyword)
    }

    /// Questiongroup owning the question `keyword`.
    pub fn questiongroup_of(&self, keyword: &str) -> Option<&Questiongroup> {
        self.question_index
            .get(keyword)
            .map(|&(g, _)| &self.questiongroups[g])
    }

    /// Questiongroups edited in the given step, in document order.
    pub fn category_questiongroups(
        &self,
        category: &str,
    ) -> Result<Vec<&Questiongroup>, ConfigurationError> {
        let cat = self.get_category(category)?;
        cat.questiongroup_keywords()
            .into_iter()
            .map(|kw| self.get_questiongroup(kw))
            .collect()
    }

    pub fn links_to(&self, code: &str) -> bool {
        match &self.links_allowed {
            Some(allowed) => allowed.iter().any(|c| c == code),
            None => true,
        }
    }

    /// Questions whose values are language maps, with their questiongroup.
    pub fn text_questions(&self) -> impl Iterator<Item = &Question> {
        self.questions().filter(|q| q.is_text())
    }
}
