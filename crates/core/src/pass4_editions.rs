//! Pass 4: Edition delta checks and relabel application.
//!
//! The delta describes how payloads of the predecessor edition map onto
//! this one, so every item is checked against the *new* tree: renamed and
//! moved keywords must exist here, dropped ones must not.

use crate::error::ConfigIssue;
use crate::model::*;
use qcat_interchange::EditionDecl;
use std::collections::BTreeSet;

const PASS: u8 = 4;

pub fn apply_edition(config: &mut Configuration, decl: &EditionDecl, issues: &mut Vec<ConfigIssue>) {
    if decl.edition != config.edition {
        issues.push(ConfigIssue::new(
            PASS,
            "editions",
            Some(&decl.edition),
            Some("edition"),
            format!(
                "edition declaration '{}' does not match document edition '{}'",
                decl.edition, config.edition
            ),
        ));
    }
    if decl.predecessor.as_deref() == Some(config.edition.as_str()) {
        issues.push(ConfigIssue::new(
            PASS,
            "editions",
            Some(&decl.edition),
            Some("predecessor"),
            "edition cannot be its own predecessor",
        ));
    }
    if decl.predecessor.is_none() && !decl.delta.is_empty() {
        issues.push(ConfigIssue::new(
            PASS,
            "editions",
            Some(&decl.edition),
            Some("delta"),
            "delta declared without a predecessor",
        ));
    }

    let mut relabels = Vec::new();
    for item in &decl.delta {
        match item {
            DeltaItem::Rename { from, to } => {
                if !exists(config, to) {
                    issues.push(item_issue(item, format!("rename target '{}' does not exist", to)));
                }
                if exists(config, from) {
                    issues.push(item_issue(
                        item,
                        format!("renamed keyword '{}' is still declared", from),
                    ));
                }
            }
            DeltaItem::Move {
                keyword,
                to_questiongroup,
            } => match config.get_questiongroup(to_questiongroup) {
                Ok(qg) if qg.get_question(keyword).is_some() => {}
                Ok(_) => issues.push(item_issue(
                    item,
                    format!("'{}' is not declared in '{}'", keyword, to_questiongroup),
                )),
                Err(_) => issues.push(item_issue(
                    item,
                    format!("unknown questiongroup '{}'", to_questiongroup),
                )),
            },
            DeltaItem::Drop(keyword) => {
                if exists(config, keyword) {
                    issues.push(item_issue(
                        item,
                        format!("dropped keyword '{}' is still declared", keyword),
                    ));
                }
            }
            DeltaItem::Relabel { keyword, label } => {
                if config.has_question(keyword) {
                    relabels.push((keyword.clone(), label.clone()));
                } else {
                    issues.push(item_issue(item, format!("unknown question '{}'", keyword)));
                }
            }
            DeltaItem::Transform { keyword, mapping } => {
                if !config.has_question(keyword) {
                    issues.push(item_issue(item, format!("unknown question '{}'", keyword)));
                }
                let sources: BTreeSet<&String> = mapping.keys().collect();
                if let Some(clash) = mapping.values().find(|v| sources.contains(v)) {
                    issues.push(item_issue(
                        item,
                        format!("'{}' is both a source and a target of the mapping", clash),
                    ));
                }
            }
        }
    }

    for (keyword, label) in relabels {
        if let Some(&(g, q)) = config.question_index.get(&keyword) {
            let question = &mut config.questiongroups[g].questions[q];
            for (lang, text) in label {
                question.label.insert(lang, text);
            }
        }
    }

    config.predecessor = decl.predecessor.clone();
    config.delta = decl.delta.clone();
}

fn exists(config: &Configuration, keyword: &str) -> bool {
    config.has_question(keyword) || config.has_questiongroup(keyword)
}

fn item_issue(item: &DeltaItem, message: String) -> ConfigIssue {
    ConfigIssue::new(PASS, "delta", Some(item.keyword()), None, message)
}
