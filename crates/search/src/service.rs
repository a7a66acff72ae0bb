//! Query Service: filtered, language-aware list queries across aliases.

use std::sync::Arc;

use qcat_core::{localized, Labels, Registry};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::backend::SearchBackend;
use crate::error::SearchError;
use crate::query::{Filter, SearchQuery, Sort, TextField};

/// Codes `wocat` expands to; also the fallback for unknown codes.
pub const DEFAULT_CONFIGURATIONS: [&str; 4] = ["approaches", "technologies", "unccd", "watershed"];

/// Filter on the values of one question inside `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Facet {
    pub questiongroup: String,
    pub question: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub configurations: Vec<String>,
    /// Country label in any language, or the stored value.
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub created_from: Option<String>,
    #[serde(default)]
    pub created_to: Option<String>,
    #[serde(default)]
    pub updated_from: Option<String>,
    #[serde(default)]
    pub updated_to: Option<String>,
    #[serde(default)]
    pub facets: Vec<Facet>,
    #[serde(default = "default_language")]
    pub language: String,
    /// 1-based.
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub sort_by_updated: bool,
}

fn default_language() -> String {
    "en".to_string()
}

fn default_page() -> usize {
    1
}

fn default_page_size() -> usize {
    10
}

impl Default for ListQuery {
    fn default() -> Self {
        ListQuery {
            text: None,
            configurations: Vec::new(),
            country: None,
            created_from: None,
            created_to: None,
            updated_from: None,
            updated_to: None,
            facets: Vec::new(),
            language: default_language(),
            page: default_page(),
            page_size: default_page_size(),
            sort_by_updated: false,
        }
    }
}

/// One row of a list view; identical for every configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListItem {
    pub id: String,
    pub identifier: String,
    pub configuration: String,
    pub edition: String,
    pub status: String,
    pub name: String,
    pub definition: Option<String>,
    /// Country labels in the requested language.
    pub country: Vec<String>,
    pub created: String,
    pub updated: String,
    pub original_language: String,
    pub translations: Vec<String>,
    pub authors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListPage {
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub items: Vec<ListItem>,
}

/// Expand and case-fold requested configuration codes.
///
/// `wocat` and codes unknown to `known` become [`DEFAULT_CONFIGURATIONS`];
/// an empty request means the defaults too.
pub fn resolve_configurations(requested: &[String], known: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut push = |code: &str| {
        if !out.iter().any(|c| c == code) {
            out.push(code.to_string());
        }
    };
    if requested.is_empty() {
        for c in DEFAULT_CONFIGURATIONS {
            push(c);
        }
    }
    for code in requested {
        let folded = code.trim().to_lowercase();
        if folded != "wocat" && known.iter().any(|k| *k == folded) {
            push(&folded);
        } else {
            for c in DEFAULT_CONFIGURATIONS {
                push(c);
            }
        }
    }
    out
}

fn labels_of(value: &Value) -> Labels {
    value
        .as_object()
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

pub struct QueryService<B: SearchBackend> {
    backend: Arc<B>,
    registry: Arc<Registry>,
    prefix: String,
}

impl<B: SearchBackend> QueryService<B> {
    pub fn new(backend: Arc<B>, registry: Arc<Registry>, prefix: &str) -> Self {
        QueryService {
            backend,
            registry,
            prefix: prefix.to_string(),
        }
    }

    /// Typed backend query for `query` against the resolved aliases.
    pub fn build(&self, query: &ListQuery) -> (Vec<String>, SearchQuery) {
        let codes = resolve_configurations(&query.configurations, &self.registry.codes());
        let targets = codes
            .iter()
            .map(|c| format!("{}{}", self.prefix, c))
            .collect();

        let mut filters = Vec::new();
        if let Some(country) = query.country.as_deref().filter(|c| !c.trim().is_empty()) {
            let value = self
                .registry
                .tables()
                .lookup_value("countries", country)
                .unwrap_or_else(|| country.trim().to_string());
            filters.push(Filter::terms("country", [value]));
        }
        for (field, from, to) in [
            ("created", &query.created_from, &query.created_to),
            ("updated", &query.updated_from, &query.updated_to),
        ] {
            if from.is_some() || to.is_some() {
                filters.push(Filter::Range {
                    field: field.to_string(),
                    gte: from.clone(),
                    lte: to.clone(),
                });
            }
        }
        for facet in &query.facets {
            filters.push(Filter::Terms {
                field: format!("data.{}.{}", facet.questiongroup, facet.question),
                values: facet.values.clone(),
            });
        }

        let language = &query.language;
        let text_fields = vec![
            TextField {
                field: format!("name.{language}"),
                boost: 4.0,
            },
            TextField {
                field: format!("search_text.{language}"),
                boost: 2.0,
            },
            TextField {
                field: "name.original".to_string(),
                boost: 1.5,
            },
            TextField {
                field: "search_text.original".to_string(),
                boost: 1.0,
            },
        ];

        let page = query.page.max(1);
        let size = query.page_size.clamp(1, 200);
        let search = SearchQuery {
            text: query.text.clone(),
            text_fields,
            filters,
            sort: if query.sort_by_updated {
                Sort::UpdatedDesc
            } else {
                Sort::Score
            },
            from: (page - 1) * size,
            size,
        };
        (targets, search)
    }

    pub async fn list(&self, query: &ListQuery) -> Result<ListPage, SearchError> {
        let (targets, search) = self.build(query);
        debug!(?targets, text = ?search.text(), "list query");
        let hits = self.backend.search(&targets, &search).await?;
        Ok(ListPage {
            total: hits.total,
            page: query.page.max(1),
            page_size: search.size,
            items: hits
                .hits
                .iter()
                .map(|h| self.list_item(&h.id, &h.source, &query.language))
                .collect(),
        })
    }

    fn list_item(&self, id: &str, source: &Value, language: &str) -> ListItem {
        let str_at = |key: &str| source.get(key).and_then(Value::as_str).unwrap_or("").to_string();
        let strings_at = |key: &str| -> Vec<String> {
            source
                .get(key)
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
                .unwrap_or_default()
        };
        let original = str_at("original_locale");
        let pick = |labels: &Labels| -> Option<String> {
            labels
                .get(language)
                .or_else(|| labels.get(&original))
                .cloned()
                .or_else(|| labels.values().next().cloned())
        };
        let name = source.get("name").map(labels_of).unwrap_or_default();
        let definition = source.get("definition").map(labels_of).unwrap_or_default();
        let countries = self.registry.tables().get("countries").unwrap_or(&[]);
        let country = strings_at("country")
            .into_iter()
            .map(|value| {
                countries
                    .iter()
                    .find(|c| c.value == value)
                    .map(|c| localized(&c.label, language))
                    .unwrap_or(value)
            })
            .collect();
        let authors = source
            .get("authors")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(|p| p.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        ListItem {
            id: id.to_string(),
            identifier: str_at("identifier"),
            configuration: strings_at("configurations").into_iter().next().unwrap_or_default(),
            edition: strings_at("editions").into_iter().next().unwrap_or_default(),
            status: str_at("status"),
            name: pick(&name).unwrap_or_default(),
            definition: pick(&definition),
            country,
            created: str_at("created"),
            updated: str_at("updated"),
            original_language: original.clone(),
            translations: strings_at("translations"),
            authors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn wocat_expands_to_default_superset() {
        let known = codes(&["technologies", "unccd", "sample"]);
        assert_eq!(
            resolve_configurations(&codes(&["wocat"]), &known),
            codes(&DEFAULT_CONFIGURATIONS)
        );
    }

    #[test]
    fn known_codes_are_case_folded() {
        let known = codes(&["technologies", "sample"]);
        assert_eq!(
            resolve_configurations(&codes(&["Sample", "TECHNOLOGIES"]), &known),
            codes(&["sample", "technologies"])
        );
    }

    #[test]
    fn unknown_codes_coerce_to_defaults_without_duplicates() {
        let known = codes(&["technologies"]);
        let resolved = resolve_configurations(&codes(&["technologies", "bogus", "wocat"]), &known);
        assert_eq!(
            resolved,
            codes(&["technologies", "approaches", "unccd", "watershed"])
        );
        assert_eq!(resolve_configurations(&[], &known).len(), 4);
    }
}
