//! Pass 2: Keyword indexing -- build lookup indexes over categories,
//! questiongroups and questions, and detect duplicate keywords.

use crate::error::ConfigIssue;
use crate::model::{Questiongroup, Section};
use std::collections::HashMap;

const PASS: u8 = 2;

pub struct Indexes {
    pub questiongroups: HashMap<String, usize>,
    pub questions: HashMap<String, (usize, usize)>,
    pub categories: HashMap<String, (usize, usize)>,
}

/// Later duplicates are reported and left out of the index, so lookups
/// always resolve to the first declaration.
pub fn build_indexes(
    sections: &[Section],
    questiongroups: &[Questiongroup],
    issues: &mut Vec<ConfigIssue>,
) -> Indexes {
    let mut idx = Indexes {
        questiongroups: HashMap::new(),
        questions: HashMap::new(),
        categories: HashMap::new(),
    };

    for (s, section) in sections.iter().enumerate() {
        for (c, category) in section.categories.iter().enumerate() {
            if idx.categories.contains_key(&category.keyword) {
                issues.push(duplicate("category", &category.keyword));
            } else {
                idx.categories.insert(category.keyword.clone(), (s, c));
            }
        }
    }

    for (g, qg) in questiongroups.iter().enumerate() {
        if idx.questiongroups.contains_key(&qg.keyword) {
            issues.push(duplicate("questiongroup", &qg.keyword));
            continue;
        }
        idx.questiongroups.insert(qg.keyword.clone(), g);
        for (q, question) in qg.questions.iter().enumerate() {
            if let Some(&(first, _)) = idx.questions.get(&question.keyword) {
                issues.push(ConfigIssue::new(
                    PASS,
                    "question",
                    Some(&question.keyword),
                    None,
                    format!(
                        "duplicate question keyword (first declared in '{}')",
                        questiongroups[first].keyword
                    ),
                ));
                continue;
            }
            idx.questions.insert(question.keyword.clone(), (g, q));
        }
    }

    idx
}

fn duplicate(element: &str, keyword: &str) -> ConfigIssue {
    ConfigIssue::new(
        PASS,
        element,
        Some(keyword),
        None,
        format!("duplicate {} keyword", element),
    )
}
