//! Value Model: typed answers for every question type.
//!
//! The answer payload stores plain JSON. Each question type parses that
//! JSON into an [`AnswerValue`], validates it against the question's
//! constraints, serialises it back and projects it for display. Empty
//! input (`null`, `""`, `[]`, `{}`) parses to `None`, so a parsed value is
//! always "present".

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use qcat_core::{localized, Question, QuestionType, TableLayout};
use qcat_storage::UserId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as Json};
use time::macros::format_description;
use time::Date;

use crate::blobs::thumbnail_url;

/// Language code → text.
pub type LanguageMap = BTreeMap<String, String>;

/// Table answers: row keyword → cell instances (column keyword → value).
pub type TableValue = BTreeMap<String, Vec<BTreeMap<String, AnswerValue>>>;

/// Measure level that switches dependent questions off.
pub const MEASURE_NONE: &str = "none";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum UserReference {
    Known { user_id: UserId },
    Anonymous { display_name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkReference {
    pub link_identifier: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnswerValue {
    Text(LanguageMap),
    Int(i64),
    Float(Decimal),
    Date(Date),
    Choice(String),
    Choices(Vec<String>),
    /// Blob uuid of an uploaded image.
    Image(String),
    /// Blob uuid of an uploaded file.
    File(String),
    User(UserReference),
    Link(LinkReference),
    Table(TableValue),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    WrongType {
        expected: &'static str,
    },
    TooLong {
        language: String,
        max: u32,
        actual: usize,
    },
    UnknownChoice(String),
    OutOfRange {
        value: String,
    },
    InvalidDate(String),
    InvalidUserReference(String),
    UnknownTableRow(String),
    UnknownTableColumn {
        row: String,
        column: String,
    },
    TableRowCount {
        row: String,
        count: usize,
        min: u32,
        max: u32,
    },
    Cell {
        row: String,
        index: usize,
        column: String,
        error: Box<ValueError>,
    },
}

impl fmt::Display for ValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueError::WrongType { expected } => write!(f, "expected {}", expected),
            ValueError::TooLong {
                language,
                max,
                actual,
            } => write!(
                f,
                "text in '{}' is {} characters long, at most {} allowed",
                language, actual, max
            ),
            ValueError::UnknownChoice(value) => write!(f, "'{}' is not a valid choice", value),
            ValueError::OutOfRange { value } => write!(f, "{} is out of range", value),
            ValueError::InvalidDate(value) => {
                write!(f, "'{}' is not a date (expected YYYY-MM-DD)", value)
            }
            ValueError::InvalidUserReference(message) => {
                write!(f, "invalid user reference: {}", message)
            }
            ValueError::UnknownTableRow(row) => write!(f, "unknown table row '{}'", row),
            ValueError::UnknownTableColumn { row, column } => {
                write!(f, "unknown column '{}' in table row '{}'", column, row)
            }
            ValueError::TableRowCount {
                row,
                count,
                min,
                max,
            } => write!(
                f,
                "table row '{}' has {} entries, expected between {} and {}",
                row, count, min, max
            ),
            ValueError::Cell {
                row,
                index,
                column,
                error,
            } => write!(f, "{}[{}].{}: {}", row, index, column, error),
        }
    }
}

impl std::error::Error for ValueError {}

fn is_empty_json(raw: &Json) -> bool {
    match raw {
        Json::Null => true,
        Json::String(s) => s.trim().is_empty(),
        Json::Array(a) => a.is_empty(),
        Json::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn language_map(raw: &Json) -> Option<LanguageMap> {
    raw.as_object().map(|m| {
        m.iter()
            .filter_map(|(k, v)| {
                let text = v.as_str()?.trim();
                (!text.is_empty()).then(|| (k.clone(), text.to_string()))
            })
            .collect()
    })
}

fn decimal_of(raw: &Json) -> Option<Decimal> {
    match raw {
        Json::Number(n) => Decimal::from_str(&n.to_string())
            .ok()
            .or_else(|| n.as_f64().and_then(|f| Decimal::try_from(f).ok())),
        Json::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

fn check_range(question: &Question, value: Decimal) -> Result<(), ValueError> {
    let c = &question.constraints;
    if c.min.is_some_and(|min| value < min) || c.max.is_some_and(|max| value > max) {
        return Err(ValueError::OutOfRange {
            value: value.to_string(),
        });
    }
    Ok(())
}

fn check_choice(question: &Question, value: &str) -> Result<(), ValueError> {
    if question.choice(value).is_some() {
        Ok(())
    } else {
        Err(ValueError::UnknownChoice(value.to_string()))
    }
}

impl AnswerValue {
    /// Parse submitted or stored JSON for `question`.
    ///
    /// A plain string submitted for a text question is the text in
    /// `language`; it is merged into `previous` so that other languages
    /// of the same answer survive.
    pub fn parse(
        question: &Question,
        raw: &Json,
        language: &str,
        previous: Option<&Json>,
    ) -> Result<Option<AnswerValue>, ValueError> {
        if is_empty_json(raw) && !question.is_text() {
            return Ok(None);
        }
        let value = match question.kind {
            QuestionType::Char | QuestionType::Text => {
                return Self::parse_text(question, raw, language, previous)
            }
            QuestionType::Int => {
                let n = decimal_of(raw).ok_or(ValueError::WrongType {
                    expected: "an integer",
                })?;
                if !n.fract().is_zero() {
                    return Err(ValueError::WrongType {
                        expected: "an integer",
                    });
                }
                check_range(question, n)?;
                let int = i64::try_from(n).map_err(|_| ValueError::OutOfRange {
                    value: n.to_string(),
                })?;
                AnswerValue::Int(int)
            }
            QuestionType::Float => {
                let n = decimal_of(raw).ok_or(ValueError::WrongType {
                    expected: "a number",
                })?;
                check_range(question, n)?;
                AnswerValue::Float(n.normalize())
            }
            QuestionType::Date => {
                let text = raw.as_str().ok_or(ValueError::WrongType { expected: "a date" })?;
                let date = Date::parse(text.trim(), format_description!("[year]-[month]-[day]"))
                    .map_err(|_| ValueError::InvalidDate(text.to_string()))?;
                AnswerValue::Date(date)
            }
            QuestionType::Bool => {
                let choice = match raw {
                    Json::Bool(true) => "yes".to_string(),
                    Json::Bool(false) => "no".to_string(),
                    Json::String(s) => s.trim().to_string(),
                    _ => return Err(ValueError::WrongType { expected: "yes or no" }),
                };
                check_choice(question, &choice)?;
                AnswerValue::Choice(choice)
            }
            QuestionType::Select | QuestionType::Radio | QuestionType::Measure => {
                let choice = raw
                    .as_str()
                    .ok_or(ValueError::WrongType { expected: "a choice" })?
                    .trim()
                    .to_string();
                check_choice(question, &choice)?;
                AnswerValue::Choice(choice)
            }
            QuestionType::Checkbox | QuestionType::ImageCheckbox => {
                let items: Vec<&Json> = match raw {
                    Json::Array(items) => items.iter().collect(),
                    single @ Json::String(_) => vec![single],
                    _ => return Err(ValueError::WrongType { expected: "a list of choices" }),
                };
                let mut chosen: Vec<String> = Vec::new();
                for item in items {
                    let value = item
                        .as_str()
                        .ok_or(ValueError::WrongType { expected: "a list of choices" })?
                        .trim();
                    if value.is_empty() || chosen.iter().any(|c| c == value) {
                        continue;
                    }
                    check_choice(question, value)?;
                    chosen.push(value.to_string());
                }
                if chosen.is_empty() {
                    return Ok(None);
                }
                AnswerValue::Choices(chosen)
            }
            QuestionType::Image | QuestionType::File => {
                let uuid = match raw {
                    Json::String(s) => s.trim().to_string(),
                    Json::Object(o) => o
                        .get("uuid")
                        .and_then(Json::as_str)
                        .map(|s| s.trim().to_string())
                        .ok_or(ValueError::WrongType { expected: "an upload id" })?,
                    _ => return Err(ValueError::WrongType { expected: "an upload id" }),
                };
                if question.kind == QuestionType::Image {
                    AnswerValue::Image(uuid)
                } else {
                    AnswerValue::File(uuid)
                }
            }
            QuestionType::User => AnswerValue::User(parse_user(raw)?),
            QuestionType::Link => {
                let identifier = match raw {
                    Json::String(s) => s.trim().to_string(),
                    Json::Object(o) => o
                        .get("link_identifier")
                        .and_then(Json::as_str)
                        .map(|s| s.trim().to_string())
                        .ok_or(ValueError::WrongType {
                            expected: "a linked questionnaire identifier",
                        })?,
                    _ => {
                        return Err(ValueError::WrongType {
                            expected: "a linked questionnaire identifier",
                        })
                    }
                };
                AnswerValue::Link(LinkReference {
                    link_identifier: identifier,
                })
            }
            QuestionType::Table => match &question.table {
                Some(layout) => match parse_table(layout, raw, language)? {
                    Some(table) => AnswerValue::Table(table),
                    None => return Ok(None),
                },
                None => return Err(ValueError::WrongType { expected: "a table" }),
            },
        };
        Ok(Some(value))
    }

    fn parse_text(
        question: &Question,
        raw: &Json,
        language: &str,
        previous: Option<&Json>,
    ) -> Result<Option<AnswerValue>, ValueError> {
        let map = match raw {
            Json::Null => LanguageMap::new(),
            Json::String(s) => {
                let mut map = previous
                    .and_then(|p| match p {
                        Json::String(old) if !old.trim().is_empty() => {
                            // A bare stored string belongs to the edited language.
                            Some(LanguageMap::from([(language.to_string(), old.clone())]))
                        }
                        other => language_map(other),
                    })
                    .unwrap_or_default();
                if s.trim().is_empty() {
                    map.remove(language);
                } else {
                    map.insert(language.to_string(), s.trim().to_string());
                }
                map
            }
            Json::Object(_) => language_map(raw).unwrap_or_default(),
            _ => return Err(ValueError::WrongType { expected: "text" }),
        };
        if let Some(max) = question.constraints.max_length {
            for (lang, text) in &map {
                let actual = text.chars().count();
                if actual > max as usize {
                    return Err(ValueError::TooLong {
                        language: lang.clone(),
                        max,
                        actual,
                    });
                }
            }
        }
        Ok((!map.is_empty()).then_some(AnswerValue::Text(map)))
    }

    /// Payload representation.
    pub fn to_json(&self) -> Json {
        match self {
            AnswerValue::Text(map) => json!(map),
            AnswerValue::Int(n) => json!(n),
            AnswerValue::Float(d) => {
                serde_json::Number::from_str(&d.to_string()).map_or_else(|_| json!(d.to_string()), Json::Number)
            }
            AnswerValue::Date(date) => json!(format!(
                "{:04}-{:02}-{:02}",
                date.year(),
                u8::from(date.month()),
                date.day()
            )),
            AnswerValue::Choice(c) => json!(c),
            AnswerValue::Choices(cs) => json!(cs),
            AnswerValue::Image(uuid) | AnswerValue::File(uuid) => json!(uuid),
            AnswerValue::User(user) => serde_json::to_value(user).unwrap_or(Json::Null),
            AnswerValue::Link(link) => json!({"link_identifier": link.link_identifier}),
            AnswerValue::Table(table) => {
                let mut out = Map::new();
                for (row, cells) in table {
                    let cells: Vec<Json> = cells
                        .iter()
                        .map(|cell| {
                            Json::Object(
                                cell.iter()
                                    .map(|(k, v)| (k.clone(), v.to_json()))
                                    .collect(),
                            )
                        })
                        .collect();
                    out.insert(row.clone(), Json::Array(cells));
                }
                Json::Object(out)
            }
        }
    }

    /// Counts towards progress.
    pub fn is_present(&self) -> bool {
        match self {
            AnswerValue::Text(map) => map.values().any(|t| !t.trim().is_empty()),
            AnswerValue::Choice(c) => !c.is_empty(),
            AnswerValue::Choices(cs) => !cs.is_empty(),
            AnswerValue::Table(rows) => rows
                .values()
                .any(|cells| cells.iter().any(|c| c.values().any(AnswerValue::is_present))),
            _ => true,
        }
    }

    /// Whether a `selected` condition on this value holds. Measures count
    /// from "low" upwards and booleans only when "yes".
    pub fn is_selected(&self) -> bool {
        match self {
            AnswerValue::Choice(c) => c != MEASURE_NONE && c != "no" && !c.is_empty(),
            other => other.is_present(),
        }
    }

    /// Choice values held by this answer; text answers contribute their
    /// texts, scalar answers their display form.
    pub fn comparable_values(&self) -> Vec<String> {
        match self {
            AnswerValue::Choice(c) => vec![c.clone()],
            AnswerValue::Choices(cs) => cs.clone(),
            AnswerValue::Text(map) => map.values().cloned().collect(),
            AnswerValue::Int(n) => vec![n.to_string()],
            AnswerValue::Float(d) => vec![d.to_string()],
            AnswerValue::Link(l) => vec![l.link_identifier.clone()],
            other => match other.to_json() {
                Json::String(s) => vec![s],
                _ => Vec::new(),
            },
        }
    }

    pub fn display(&self, question: &Question, language: &str) -> DisplayValue {
        match self {
            AnswerValue::Text(map) => DisplayValue::Text(
                map.get(language)
                    .or_else(|| map.values().next())
                    .cloned()
                    .unwrap_or_default(),
            ),
            AnswerValue::Choice(c) => DisplayValue::Labels(vec![choice_label(question, c, language)]),
            AnswerValue::Choices(cs) => DisplayValue::Labels(
                cs.iter()
                    .map(|c| choice_label(question, c, language))
                    .collect(),
            ),
            AnswerValue::Image(uuid) => DisplayValue::Image {
                uuid: uuid.clone(),
                thumbnail: thumbnail_url(uuid, "default"),
            },
            AnswerValue::File(uuid) => DisplayValue::File { uuid: uuid.clone() },
            AnswerValue::User(UserReference::Known { user_id }) => {
                DisplayValue::User { user_id: Some(*user_id), name: None }
            }
            AnswerValue::User(UserReference::Anonymous { display_name }) => DisplayValue::User {
                user_id: None,
                name: Some(display_name.clone()),
            },
            AnswerValue::Link(link) => DisplayValue::Link {
                identifier: link.link_identifier.clone(),
            },
            AnswerValue::Table(table) => {
                let layout = question.table.as_ref();
                DisplayValue::Table(
                    table
                        .iter()
                        .map(|(row, cells)| {
                            let row_label = layout
                                .and_then(|l| l.row(row))
                                .map(|r| localized(&r.label, language))
                                .unwrap_or_else(|| row.clone());
                            let cells = cells
                                .iter()
                                .map(|cell| {
                                    cell.iter()
                                        .filter_map(|(col, v)| {
                                            let column = layout?.column(col)?;
                                            Some((col.clone(), v.display(column, language)))
                                        })
                                        .collect()
                                })
                                .collect();
                            (row_label, cells)
                        })
                        .collect(),
                )
            }
            other => DisplayValue::Text(match other.to_json() {
                Json::String(s) => s,
                json => json.to_string(),
            }),
        }
    }
}

fn choice_label(question: &Question, value: &str, language: &str) -> String {
    question
        .choice(value)
        .map(|c| localized(&c.label, language))
        .unwrap_or_else(|| value.to_string())
}

fn parse_user(raw: &Json) -> Result<UserReference, ValueError> {
    let obj = raw.as_object().ok_or(ValueError::WrongType {
        expected: "a user reference",
    })?;
    let user_id = obj.get("user_id").and_then(Json::as_u64);
    let name = obj
        .get("display_name")
        .and_then(Json::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty());
    match (obj.get("mode").and_then(Json::as_str), user_id, name) {
        (Some("known") | None, Some(user_id), None) => Ok(UserReference::Known { user_id }),
        (Some("anonymous") | None, None, Some(name)) => Ok(UserReference::Anonymous {
            display_name: name.to_string(),
        }),
        (_, Some(_), Some(_)) => Err(ValueError::InvalidUserReference(
            "either a user or a name, not both".to_string(),
        )),
        (Some("known"), None, _) => Err(ValueError::InvalidUserReference(
            "known user without user_id".to_string(),
        )),
        (Some("anonymous"), _, None) => Err(ValueError::InvalidUserReference(
            "anonymous user without display_name".to_string(),
        )),
        (mode, _, _) => Err(ValueError::InvalidUserReference(format!(
            "unknown mode {}",
            mode.unwrap_or("(none)")
        ))),
    }
}

fn parse_table(
    layout: &TableLayout,
    raw: &Json,
    language: &str,
) -> Result<Option<TableValue>, ValueError> {
    let rows = raw.as_object().ok_or(ValueError::WrongType { expected: "a table" })?;
    let mut table = TableValue::new();
    for (row, cells) in rows {
        if layout.row(row).is_none() {
            return Err(ValueError::UnknownTableRow(row.clone()));
        }
        let cells: Vec<&Json> = match cells {
            Json::Array(items) => items.iter().collect(),
            Json::Null => Vec::new(),
            single @ Json::Object(_) => vec![single],
            _ => return Err(ValueError::WrongType { expected: "a list of table cells" }),
        };
        let mut parsed_cells = Vec::new();
        for (index, cell) in cells.into_iter().enumerate() {
            let cell = cell.as_object().ok_or(ValueError::WrongType {
                expected: "a table cell",
            })?;
            let mut parsed = BTreeMap::new();
            for (column, value) in cell {
                let question = layout.column(column).ok_or_else(|| {
                    ValueError::UnknownTableColumn {
                        row: row.clone(),
                        column: column.clone(),
                    }
                })?;
                let value = AnswerValue::parse(question, value, language, None).map_err(|e| {
                    ValueError::Cell {
                        row: row.clone(),
                        index,
                        column: column.clone(),
                        error: Box::new(e),
                    }
                })?;
                if let Some(value) = value {
                    parsed.insert(column.clone(), value);
                }
            }
            if !parsed.is_empty() {
                parsed_cells.push(parsed);
            }
        }
        let count = parsed_cells.len();
        if count > 0 && (count < layout.min as usize || count > layout.max as usize) {
            return Err(ValueError::TableRowCount {
                row: row.clone(),
                count,
                min: layout.min,
                max: layout.max,
            });
        }
        if count > 0 {
            table.insert(row.clone(), parsed_cells);
        }
    }
    Ok((!table.is_empty()).then_some(table))
}

/// Whether stored JSON holds a present answer for `question`.
pub fn is_present(question: &Question, raw: &Json) -> bool {
    AnswerValue::parse(question, raw, "", None)
        .ok()
        .flatten()
        .is_some_and(|v| v.is_present())
}

/// Display projection of an answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DisplayValue {
    Text(String),
    Labels(Vec<String>),
    Image {
        uuid: String,
        thumbnail: String,
    },
    File {
        uuid: String,
    },
    User {
        user_id: Option<UserId>,
        name: Option<String>,
    },
    Link {
        identifier: String,
    },
    Table(Vec<(String, Vec<BTreeMap<String, DisplayValue>>)>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use qcat_core::{build_configuration, Configuration, DomainTables};

    fn sample() -> Configuration {
        let doc = qcat_interchange::from_str(include_str!(
            "../../../configurations/sample_2015.json"
        ))
        .unwrap();
        build_configuration(&doc, &DomainTables::bundled()).configuration
    }

    fn parse(config: &Configuration, keyword: &str, raw: Json) -> Result<Option<AnswerValue>, ValueError> {
        AnswerValue::parse(config.get_question(keyword).unwrap(), &raw, "en", None)
    }

    #[test]
    fn text_string_merges_into_previous_languages() {
        let config = sample();
        let question = config.get_question("key_1").unwrap();
        let previous = json!({"en": "Foo", "es": "Fu"});
        let value = AnswerValue::parse(question, &json!("Fou"), "fr", Some(&previous))
            .unwrap()
            .unwrap();
        assert_eq!(value.to_json(), json!({"en": "Foo", "es": "Fu", "fr": "Fou"}));

        let cleared = AnswerValue::parse(question, &json!(""), "es", Some(&previous))
            .unwrap()
            .unwrap();
        assert_eq!(cleared.to_json(), json!({"en": "Foo"}));
    }

    #[test]
    fn text_max_length_is_per_language() {
        let config = sample();
        let long = "x".repeat(101);
        let err = parse(&config, "key_6", json!({"en": "ok", "es": long})).unwrap_err();
        assert!(matches!(err, ValueError::TooLong { ref language, max: 100, actual: 101 } if language == "es"));
    }

    #[test]
    fn choices_are_checked_and_deduplicated() {
        let config = sample();
        assert_eq!(
            parse(&config, "key_5", json!(["a", "b", "a"])).unwrap(),
            Some(AnswerValue::Choices(vec!["a".to_string(), "b".to_string()]))
        );
        assert_eq!(
            parse(&config, "key_5", json!(["z"])).unwrap_err(),
            ValueError::UnknownChoice("z".to_string())
        );
        assert_eq!(parse(&config, "key_5", json!([])).unwrap(), None);
        assert_eq!(
            parse(&config, "key_9", json!(true)).unwrap(),
            Some(AnswerValue::Choice("yes".to_string()))
        );
    }

    #[test]
    fn numbers_respect_bounds() {
        let config = sample();
        assert_eq!(parse(&config, "key_7", json!(42)).unwrap(), Some(AnswerValue::Int(42)));
        assert_eq!(parse(&config, "key_7", json!("7")).unwrap(), Some(AnswerValue::Int(7)));
        assert!(matches!(
            parse(&config, "key_7", json!(101)),
            Err(ValueError::OutOfRange { .. })
        ));
        assert!(matches!(
            parse(&config, "key_7", json!(1.5)),
            Err(ValueError::WrongType { .. })
        ));
        let float = parse(&config, "key_14", json!(2.50)).unwrap().unwrap();
        assert_eq!(float.to_json(), json!(2.5));
    }

    #[test]
    fn measure_none_is_present_but_not_selected() {
        let config = sample();
        let none = parse(&config, "key_8", json!("none")).unwrap().unwrap();
        assert!(none.is_present());
        assert!(!none.is_selected());
        assert!(parse(&config, "key_8", json!("low")).unwrap().unwrap().is_selected());
    }

    #[test]
    fn user_reference_is_exactly_one_mode() {
        let config = sample();
        assert_eq!(
            parse(&config, "key_16", json!({"mode": "known", "user_id": 7})).unwrap(),
            Some(AnswerValue::User(UserReference::Known { user_id: 7 }))
        );
        assert_eq!(
            parse(&config, "key_16", json!({"mode": "anonymous", "display_name": "Jo"}))
                .unwrap()
                .unwrap()
                .to_json(),
            json!({"mode": "anonymous", "display_name": "Jo"})
        );
        assert!(matches!(
            parse(&config, "key_16", json!({"user_id": 7, "display_name": "Jo"})),
            Err(ValueError::InvalidUserReference(_))
        ));
    }

    #[test]
    fn table_cells_follow_layout() {
        let config = sample();
        let ok = parse(
            &config,
            "key_15",
            json!({"row_a": [{"col_1": {"en": "x"}, "col_2": 3}], "row_b": []}),
        )
        .unwrap()
        .unwrap();
        assert_eq!(ok.to_json(), json!({"row_a": [{"col_1": {"en": "x"}, "col_2": 3}]}));

        assert_eq!(
            parse(&config, "key_15", json!({"row_z": []})).unwrap_err(),
            ValueError::UnknownTableRow("row_z".to_string())
        );
        let three = json!({"row_a": [{"col_2": 1}, {"col_2": 2}, {"col_2": 3}]});
        assert!(matches!(
            parse(&config, "key_15", three),
            Err(ValueError::TableRowCount { count: 3, max: 2, .. })
        ));
        assert!(matches!(
            parse(&config, "key_15", json!({"row_a": [{"col_2": "x"}]})),
            Err(ValueError::Cell { .. })
        ));
    }

    #[test]
    fn dates_and_display_labels() {
        let config = sample();
        let date = parse(&config, "key_11", json!("2024-02-29")).unwrap().unwrap();
        assert_eq!(date.to_json(), json!("2024-02-29"));
        assert!(matches!(
            parse(&config, "key_11", json!("2023-02-29")),
            Err(ValueError::InvalidDate(_))
        ));

        let question = config.get_question("key_4").unwrap();
        let yes = AnswerValue::Choice("yes".to_string());
        assert_eq!(
            yes.display(question, "es"),
            DisplayValue::Labels(vec!["Sí".to_string()])
        );
    }
}
