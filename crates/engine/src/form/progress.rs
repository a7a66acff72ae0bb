use qcat_core::Configuration;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use super::conditions::{field_state, group_active, instances};
use crate::error::QcatError;
use crate::value::is_present;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    pub fn is_complete(&self) -> bool {
        self.completed == self.total
    }
}

/// Completed over visible questions of a category. Questions hidden by a
/// condition, and whole inactive questiongroups, are not counted. A
/// question counts once however many instances its group has.
pub fn category_progress(
    config: &Configuration,
    payload: &Json,
    category: &str,
) -> Result<Progress, QcatError> {
    let mut progress = Progress::default();
    for group in config.category_questiongroups(category)? {
        if !group_active(config, payload, group) {
            continue;
        }
        let stored = instances(payload, &group.keyword);
        for question in &group.questions {
            let (visible, present) = if stored.is_empty() {
                (field_state(config, payload, question, None).visible, false)
            } else {
                stored.iter().enumerate().fold((false, false), |(v, p), (i, instance)| {
                    let state = field_state(config, payload, question, Some((&group.keyword, i)));
                    let here = state.visible
                        && instance
                            .get(&question.keyword)
                            .is_some_and(|raw| is_present(question, raw));
                    (v || state.visible, p || here)
                })
            };
            if visible {
                progress.total += 1;
                if present {
                    progress.completed += 1;
                }
            }
        }
    }
    Ok(progress)
}

/// Progress of every category, in document order.
pub fn document_progress(
    config: &Configuration,
    payload: &Json,
) -> Result<Vec<(String, Progress)>, QcatError> {
    config
        .categories()
        .map(|c| Ok((c.keyword.clone(), category_progress(config, payload, &c.keyword)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use qcat_core::{build_configuration, DomainTables};
    use serde_json::json;

    fn sample() -> Configuration {
        let doc = qcat_interchange::from_str(include_str!(
            "../../../../configurations/sample_2015.json"
        ))
        .unwrap();
        build_configuration(&doc, &DomainTables::bundled()).configuration
    }

    #[test]
    fn counts_present_over_visible() {
        let config = sample();
        let empty = category_progress(&config, &json!({}), "cat_1").unwrap();
        assert_eq!(empty, Progress { completed: 0, total: 3 });

        let payload = json!({"qg_1": [{"key_1": {"en": "Foo"}, "key_3": "  "}]});
        let progress = category_progress(&config, &payload, "cat_1").unwrap();
        assert_eq!(progress, Progress { completed: 1, total: 3 });
    }

    #[test]
    fn hidden_questions_and_inactive_groups_are_not_counted() {
        let config = sample();
        // key_10 hidden unless key_9 is yes; qg_7 inactive until key_8 is selected.
        let hidden = category_progress(&config, &json!({"qg_6": [{"key_9": "no"}]}), "cat_3").unwrap();
        assert_eq!(hidden, Progress { completed: 1, total: 1 });

        let shown = json!({"qg_6": [{"key_9": "yes"}], "qg_3": [{"key_8": "high"}]});
        let progress = category_progress(&config, &shown, "cat_3").unwrap();
        assert_eq!(progress, Progress { completed: 1, total: 3 });
    }
}
