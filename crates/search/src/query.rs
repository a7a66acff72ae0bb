//! Typed search query shared by every [`crate::SearchBackend`].
//!
//! Field paths are dotted paths into the projection document
//! (`country`, `name.en`, `data.qg_3.key_4`). Paths below `data.<qg>` are
//! nested: the Elasticsearch backend wraps them in `nested` queries and the
//! in-memory backend walks the instance arrays.

use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Field equals any of the values (arrays match if any element does).
    Terms { field: String, values: Vec<String> },
    /// Inclusive string range; RFC 3339 timestamps compare lexically.
    Range {
        field: String,
        gte: Option<String>,
        lte: Option<String>,
    },
}

impl Filter {
    pub fn terms(field: &str, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Filter::Terms {
            field: field.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    fn field(&self) -> &str {
        match self {
            Filter::Terms { field, .. } | Filter::Range { field, .. } => field,
        }
    }

    fn leaf(&self) -> Value {
        match self {
            Filter::Terms { field, values } => json!({"terms": {field.clone(): values}}),
            Filter::Range { field, gte, lte } => {
                let mut range = serde_json::Map::new();
                if let Some(g) = gte {
                    range.insert("gte".to_string(), json!(g));
                }
                if let Some(l) = lte {
                    range.insert("lte".to_string(), json!(l));
                }
                json!({"range": {field.clone(): range}})
            }
        }
    }

    fn to_es(&self) -> Value {
        match nested_path(self.field()) {
            Some(path) => json!({"nested": {"path": path, "query": self.leaf()}}),
            None => self.leaf(),
        }
    }
}

/// `data.qg_3.key_4` → `data.qg_3`.
pub(crate) fn nested_path(field: &str) -> Option<String> {
    let mut parts = field.splitn(3, '.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("data"), Some(qg), Some(_)) => Some(format!("data.{qg}")),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sort {
    /// Relevance when a text query is present, otherwise most recent.
    #[default]
    Score,
    UpdatedDesc,
}

/// A field targeted by free text, with its boost.
#[derive(Debug, Clone, PartialEq)]
pub struct TextField {
    pub field: String,
    pub boost: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchQuery {
    pub text: Option<String>,
    pub text_fields: Vec<TextField>,
    pub filters: Vec<Filter>,
    pub sort: Sort,
    pub from: usize,
    pub size: usize,
}

impl SearchQuery {
    pub fn match_all(size: usize) -> Self {
        SearchQuery {
            size,
            ..SearchQuery::default()
        }
    }

    /// The text query, if it has any non-blank content.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }

    /// Elasticsearch `_search` request body.
    pub fn to_es_body(&self) -> Value {
        let filters: Vec<Value> = self.filters.iter().map(Filter::to_es).collect();
        let mut bool_query = serde_json::Map::new();
        bool_query.insert("filter".to_string(), Value::Array(filters));
        if let Some(text) = self.text() {
            let fields: Vec<String> = self
                .text_fields
                .iter()
                .map(|f| format!("{}^{}", f.field, f.boost))
                .collect();
            bool_query.insert(
                "must".to_string(),
                json!([{"multi_match": {"query": text, "fields": fields, "type": "most_fields"}}]),
            );
        }
        let sort = match (self.sort, self.text().is_some()) {
            (Sort::Score, true) => json!(["_score", {"updated": {"order": "desc"}}]),
            _ => json!([{"updated": {"order": "desc"}}]),
        };
        json!({
            "query": {"bool": bool_query},
            "sort": sort,
            "from": self.from,
            "size": self.size,
            "track_total_hits": true,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub id: String,
    pub score: f64,
    pub source: Value,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchHits {
    pub total: usize,
    pub hits: Vec<Hit>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_fields_are_wrapped() {
        let query = SearchQuery {
            filters: vec![
                Filter::terms("country", ["country_CHE"]),
                Filter::terms("data.qg_3.key_4", ["yes"]),
            ],
            size: 10,
            ..SearchQuery::default()
        };
        let body = query.to_es_body();
        let filters = body["query"]["bool"]["filter"].as_array().unwrap();
        assert_eq!(filters[0], json!({"terms": {"country": ["country_CHE"]}}));
        assert_eq!(filters[1]["nested"]["path"], "data.qg_3");
        assert_eq!(body["sort"], json!([{"updated": {"order": "desc"}}]));
    }

    #[test]
    fn text_query_adds_boosted_multi_match() {
        let query = SearchQuery {
            text: Some("  terrace ".to_string()),
            text_fields: vec![TextField {
                field: "name.en".to_string(),
                boost: 4.0,
            }],
            size: 10,
            ..SearchQuery::default()
        };
        let body = query.to_es_body();
        let must = &body["query"]["bool"]["must"][0]["multi_match"];
        assert_eq!(must["query"], "terrace");
        assert_eq!(must["fields"], json!(["name.en^4"]));
        assert_eq!(body["sort"][0], "_score");
    }

    #[test]
    fn blank_text_is_ignored() {
        let query = SearchQuery {
            text: Some("   ".to_string()),
            ..SearchQuery::default()
        };
        assert!(query.text().is_none());
    }
}
