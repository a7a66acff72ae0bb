//! Domain tables backing derived choice sets.
//!
//! A choice set declared with `"source": "<table>"` takes its choices from
//! the table of that name at load time.

use crate::model::{Choice, Labels};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct DomainTables {
    tables: BTreeMap<String, Vec<Choice>>,
}

const COUNTRIES: &[(&str, &str, &str)] = &[
    ("AFG", "Afghanistan", "Afganistán"),
    ("ARG", "Argentina", "Argentina"),
    ("AUT", "Austria", "Austria"),
    ("BOL", "Bolivia", "Bolivia"),
    ("BRA", "Brazil", "Brasil"),
    ("BFA", "Burkina Faso", "Burkina Faso"),
    ("CHE", "Switzerland", "Suiza"),
    ("CHN", "China", "China"),
    ("COL", "Colombia", "Colombia"),
    ("DEU", "Germany", "Alemania"),
    ("ECU", "Ecuador", "Ecuador"),
    ("ESP", "Spain", "España"),
    ("ETH", "Ethiopia", "Etiopía"),
    ("FRA", "France", "Francia"),
    ("IND", "India", "India"),
    ("ITA", "Italy", "Italia"),
    ("KEN", "Kenya", "Kenia"),
    ("KGZ", "Kyrgyzstan", "Kirguistán"),
    ("LAO", "Laos", "Laos"),
    ("MAR", "Morocco", "Marruecos"),
    ("MEX", "Mexico", "México"),
    ("MLI", "Mali", "Malí"),
    ("NER", "Niger", "Níger"),
    ("NPL", "Nepal", "Nepal"),
    ("PER", "Peru", "Perú"),
    ("PHL", "Philippines", "Filipinas"),
    ("RWA", "Rwanda", "Ruanda"),
    ("SEN", "Senegal", "Senegal"),
    ("TJK", "Tajikistan", "Tayikistán"),
    ("TZA", "Tanzania", "Tanzania"),
    ("UGA", "Uganda", "Uganda"),
    ("USA", "United States", "Estados Unidos"),
    ("ZAF", "South Africa", "Sudáfrica"),
];

impl DomainTables {
    pub fn new() -> Self {
        DomainTables::default()
    }

    /// Tables shipped with the registry: a country list plus empty
    /// `projects` and `institutions` tables to be filled by the operator.
    pub fn bundled() -> Self {
        let countries = COUNTRIES
            .iter()
            .map(|(code, en, es)| {
                let mut label = Labels::new();
                label.insert("en".to_string(), en.to_string());
                label.insert("es".to_string(), es.to_string());
                Choice {
                    value: format!("country_{}", code),
                    label,
                    image: None,
                }
            })
            .collect();
        let mut tables = DomainTables::new();
        tables.insert("countries", countries);
        tables.insert("projects", Vec::new());
        tables.insert("institutions", Vec::new());
        tables
    }

    pub fn insert(&mut self, name: &str, choices: Vec<Choice>) {
        self.tables.insert(name.to_string(), choices);
    }

    pub fn get(&self, name: &str) -> Option<&[Choice]> {
        self.tables.get(name).map(Vec::as_slice)
    }

    /// Resolve a label (any language, case-insensitive) or value to the
    /// stored value of an entry in `table`.
    pub fn lookup_value(&self, table: &str, needle: &str) -> Option<String> {
        let needle = needle.trim().to_lowercase();
        self.tables.get(table)?.iter().find_map(|c| {
            let hit = c.value.to_lowercase() == needle
                || c.label.values().any(|l| l.to_lowercase() == needle);
            hit.then(|| c.value.clone())
        })
    }
}
