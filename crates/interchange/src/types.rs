//! Typed structs for the configuration document JSON.
//!
//! Field names follow the on-disk format. Defaults are applied by serde so
//! that a minimal document only needs `code`, `edition` and `sections`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Language code → text. Used for labels and help texts.
pub type Labels = BTreeMap<String, String>;

/// `(questiongroup, question)` pair addressing a single question.
pub type FieldPath = (String, String);

fn default_true() -> bool {
    true
}

fn default_one() -> u32 {
    1
}

/// Identity of a configuration at one edition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConfigurationRef {
    pub code: String,
    pub edition: String,
}

impl ConfigurationRef {
    pub fn new(code: impl Into<String>, edition: impl Into<String>) -> Self {
        ConfigurationRef {
            code: code.into(),
            edition: edition.into(),
        }
    }
}

impl std::fmt::Display for ConfigurationRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.code, self.edition)
    }
}

/// Top-level configuration document for one `(code, edition)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigurationDocument {
    pub code: String,
    pub edition: String,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Module configurations hang off a parent questionnaire.
    #[serde(default)]
    pub module: bool,
    /// Languages the configuration carries labels for.
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub list: ListFields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<LinkPolicy>,
    #[serde(default)]
    pub choice_sets: Vec<ChoiceSetDecl>,
    pub sections: Vec<SectionDecl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editions: Option<EditionDecl>,
}

impl ConfigurationDocument {
    pub fn key(&self) -> ConfigurationRef {
        ConfigurationRef::new(&self.code, &self.edition)
    }
}

/// Questions projected into list views and search results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListFields {
    #[serde(default = "default_name_field")]
    pub name: FieldPath,
    #[serde(default = "default_country_field")]
    pub country: FieldPath,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<FieldPath>,
}

fn default_name_field() -> FieldPath {
    ("qg_name".to_string(), "name".to_string())
}

fn default_country_field() -> FieldPath {
    ("qg_location".to_string(), "country".to_string())
}

impl Default for ListFields {
    fn default() -> Self {
        ListFields {
            name: default_name_field(),
            country: default_country_field(),
            definition: None,
        }
    }
}

/// Configurations this one may link to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkPolicy {
    pub allowed: Vec<String>,
}

// ── Containers ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SectionDecl {
    pub keyword: String,
    #[serde(default)]
    pub label: Labels,
    #[serde(default)]
    pub categories: Vec<CategoryDecl>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryDecl {
    pub keyword: String,
    #[serde(default)]
    pub label: Labels,
    #[serde(default)]
    pub subcategories: Vec<SubcategoryDecl>,
    /// Free-form presentation hints, passed through to form descriptors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_options: Option<serde_json::Value>,
}

/// A subcategory holds either questiongroups or nested subcategories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubcategoryDecl {
    pub keyword: String,
    #[serde(default)]
    pub label: Labels,
    #[serde(default)]
    pub questiongroups: Vec<QuestiongroupDecl>,
    #[serde(default)]
    pub subcategories: Vec<SubcategoryDecl>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestiongroupDecl {
    pub keyword: String,
    pub questions: Vec<QuestionDecl>,
    #[serde(default)]
    pub min: u32,
    #[serde(default = "default_one")]
    pub max: u32,
    #[serde(default)]
    pub numbered: bool,
    /// Questions sit behind a disclosure toggle.
    #[serde(default)]
    pub plus_group: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditional: Option<QuestiongroupConditionDecl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helptext: Option<Labels>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_template: Option<String>,
}

/// Activation rule for a whole questiongroup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestiongroupConditionDecl {
    pub trigger_question: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub values: Vec<serde_json::Value>,
}

// ── Questions ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    /// Single-line text.
    Char,
    /// Multi-line text.
    Text,
    Int,
    Float,
    Date,
    Select,
    Radio,
    Bool,
    Checkbox,
    ImageCheckbox,
    Measure,
    Image,
    File,
    User,
    Link,
    Table,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionDecl {
    pub keyword: String,
    #[serde(rename = "type")]
    pub kind: QuestionType,
    #[serde(default)]
    pub label: Labels,
    #[serde(default)]
    pub constraints: ConstraintsDecl,
    /// Inline choices.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<ChoiceDecl>>,
    /// Reference to a document-level choice set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other: Option<OtherDecl>,
    /// Configuration code linked documents must belong to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_configuration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<TableDecl>,
    #[serde(default)]
    pub conditions: Vec<ConditionDecl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helptext: Option<Labels>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConstraintsDecl {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<u32>,
    #[serde(default)]
    pub required: bool,
    /// Bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_file_size: Option<u64>,
    #[serde(default)]
    pub allowed_mime: Vec<String>,
    /// Numeric lower bound, written as a JSON number or string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChoiceDecl {
    pub value: String,
    #[serde(default)]
    pub label: Labels,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// A named choice set, either literal or derived from a domain table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChoiceSetDecl {
    pub keyword: String,
    #[serde(default)]
    pub choices: Vec<ChoiceDecl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Free-text escape paired with an "other" choice value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OtherDecl {
    pub value: String,
    pub question: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableDecl {
    pub rows: Vec<TableRowDecl>,
    pub columns: Vec<QuestionDecl>,
    #[serde(default)]
    pub min: u32,
    #[serde(default = "default_one")]
    pub max: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableRowDecl {
    pub keyword: String,
    #[serde(default)]
    pub label: Labels,
}

// ── Conditions ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    Contains,
    #[serde(alias = "any-of")]
    AnyOf,
    Selected,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConditionEffect {
    #[default]
    Show,
    Enable,
    #[serde(alias = "populate-from")]
    PopulateFrom,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConditionDecl {
    #[serde(alias = "depends-on")]
    pub depends_on: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub values: Vec<serde_json::Value>,
    #[serde(default)]
    pub effect: ConditionEffect,
}

// ── Editions ────────────────────────────────────────────────────────

/// Edition declaration: this document's edition and how it differs from
/// its predecessor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EditionDecl {
    pub edition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predecessor: Option<String>,
    #[serde(default)]
    pub delta: Vec<DeltaItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum DeltaItem {
    Rename {
        from: String,
        to: String,
    },
    Move {
        keyword: String,
        to_questiongroup: String,
    },
    Drop(String),
    Relabel {
        keyword: String,
        label: Labels,
    },
    Transform {
        keyword: String,
        mapping: BTreeMap<String, String>,
    },
}

impl DeltaItem {
    /// Keyword the item acts on (the source keyword for renames).
    pub fn keyword(&self) -> &str {
        match self {
            DeltaItem::Rename { from, .. } => from,
            DeltaItem::Move { keyword, .. } => keyword,
            DeltaItem::Drop(keyword) => keyword,
            DeltaItem::Relabel { keyword, .. } => keyword,
            DeltaItem::Transform { keyword, .. } => keyword,
        }
    }
}
