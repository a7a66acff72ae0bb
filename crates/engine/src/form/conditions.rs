//! Evaluation of question conditions and questiongroup activation
//! against a payload.
//!
//! Triggers are read from the payload passed in, which is always built
//! from the committed document. A trigger in the same questiongroup as the
//! dependent question is read from the same instance; any other trigger is
//! read across all instances of its questiongroup.

use qcat_core::{
    ConditionEffect, ConditionOperator, Configuration, GroupCondition, Question, Questiongroup,
};
use serde::Serialize;
use serde_json::Value as Json;

use crate::value::AnswerValue;

/// Instances of `questiongroup` in `payload`.
pub fn instances<'a>(payload: &'a Json, questiongroup: &str) -> &'a [Json] {
    payload
        .get(questiongroup)
        .and_then(Json::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Parsed answers of the trigger question. `at` is the questiongroup and
/// instance the dependent field lives in.
pub fn trigger_answers(
    config: &Configuration,
    payload: &Json,
    trigger: &str,
    at: Option<(&str, usize)>,
) -> Vec<AnswerValue> {
    let Some(group) = config.questiongroup_of(trigger) else {
        return Vec::new();
    };
    let Some(question) = group.get_question(trigger) else {
        return Vec::new();
    };
    let all = instances(payload, &group.keyword);
    let scoped: Vec<&Json> = match at {
        Some((qg, index)) if qg == group.keyword => all.get(index).into_iter().collect(),
        _ => all.iter().collect(),
    };
    scoped
        .into_iter()
        .filter_map(|instance| instance.get(trigger))
        .filter_map(|raw| AnswerValue::parse(question, raw, "", None).ok().flatten())
        .collect()
}

fn wanted(values: &[Json]) -> Vec<String> {
    values
        .iter()
        .filter_map(|v| match v {
            Json::String(s) => Some(s.clone()),
            Json::Bool(true) => Some("yes".to_string()),
            Json::Bool(false) => Some("no".to_string()),
            Json::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect()
}

/// Whether `operator` holds for the trigger answers.
pub fn operator_holds(operator: ConditionOperator, values: &[Json], answers: &[AnswerValue]) -> bool {
    let wanted = wanted(values);
    match operator {
        ConditionOperator::Selected => answers.iter().any(AnswerValue::is_selected),
        ConditionOperator::AnyOf => answers
            .iter()
            .flat_map(AnswerValue::comparable_values)
            .any(|v| wanted.contains(&v)),
        ConditionOperator::Equals => answers.iter().any(|a| {
            let mut have = a.comparable_values();
            let mut want = wanted.clone();
            have.sort();
            want.sort();
            !want.is_empty() && have == want
        }),
        ConditionOperator::Contains => answers.iter().any(|a| match a {
            AnswerValue::Text(map) => map.values().any(|text| {
                let text = text.to_lowercase();
                wanted.iter().any(|w| text.contains(&w.to_lowercase()))
            }),
            other => {
                let have = other.comparable_values();
                !wanted.is_empty() && wanted.iter().all(|w| have.contains(w))
            }
        }),
    }
}

/// Condition state of one field in one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldState {
    pub visible: bool,
    pub enabled: bool,
    /// Choice values populated from another question; `None` when the
    /// question keeps its full choice list.
    pub allowed: Option<Vec<String>>,
}

impl FieldState {
    /// A value may be stored for the field.
    pub fn accepts_values(&self) -> bool {
        self.visible && self.enabled
    }
}

pub fn field_state(
    config: &Configuration,
    payload: &Json,
    question: &Question,
    at: Option<(&str, usize)>,
) -> FieldState {
    let mut state = FieldState {
        visible: true,
        enabled: true,
        allowed: None,
    };
    for condition in &question.conditions {
        let answers = trigger_answers(config, payload, &condition.depends_on, at);
        match condition.effect {
            ConditionEffect::Show => {
                state.visible &= operator_holds(condition.operator, &condition.values, &answers)
            }
            ConditionEffect::Enable => {
                state.enabled &= operator_holds(condition.operator, &condition.values, &answers)
            }
            ConditionEffect::PopulateFrom => {
                let mut populated: Vec<String> = answers
                    .iter()
                    .filter(|a| a.is_selected())
                    .flat_map(AnswerValue::comparable_values)
                    .filter(|v| question.choice(v).is_some())
                    .collect();
                populated.dedup();
                let allowed = state.allowed.get_or_insert_with(Vec::new);
                for value in populated {
                    if !allowed.contains(&value) {
                        allowed.push(value);
                    }
                }
            }
        }
    }
    state
}

pub fn group_condition_holds(config: &Configuration, payload: &Json, condition: &GroupCondition) -> bool {
    let answers = trigger_answers(config, payload, &condition.trigger_question, None);
    operator_holds(condition.operator, &condition.values, &answers)
}

/// Whether the questiongroup's activation condition holds.
pub fn group_active(config: &Configuration, payload: &Json, group: &Questiongroup) -> bool {
    group
        .conditional
        .as_ref()
        .map_or(true, |c| group_condition_holds(config, payload, c))
}

/// Whether the stored value fits the populated choice list.
pub fn within_allowed(value: &AnswerValue, allowed: &[String]) -> bool {
    value.comparable_values().iter().all(|v| allowed.contains(v))
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
    fn show_condition_reads_the_same_instance() {
        let config = sample();
        let key_10 = config.get_question("key_10").unwrap();
        let payload = json!({"qg_6": [{"key_9": "yes"}, {"key_9": "no"}]});
        assert!(field_state(&config, &payload, key_10, Some(("qg_6", 0))).visible);
        assert!(!field_state(&config, &payload, key_10, Some(("qg_6", 1))).visible);
    }

    #[test]
    fn measure_none_deactivates_dependent_group() {
        let config = sample();
        let qg_7 = config.get_questiongroup("qg_7").unwrap();
        assert!(!group_active(&config, &json!({}), qg_7));
        assert!(!group_active(&config, &json!({"qg_3": [{"key_8": "none"}]}), qg_7));
        assert!(group_active(&config, &json!({"qg_3": [{"key_8": "low"}]}), qg_7));
    }

    #[test]
    fn populate_from_limits_choices_to_selected_trigger_values() {
        let config = sample();
        let key_12 = config.get_question("key_12").unwrap();
        let payload = json!({"qg_4": [{"key_5": ["a", "c"]}]});
        let state = field_state(&config, &payload, key_12, Some(("qg_8", 0)));
        assert_eq!(state.allowed, Some(vec!["a".to_string(), "c".to_string()]));
        assert!(within_allowed(&AnswerValue::Choices(vec!["c".to_string()]), &["a".to_string(), "c".to_string()]));
        assert!(!within_allowed(&AnswerValue::Choices(vec!["b".to_string()]), &["a".to_string()]));
    }

    #[test]
    fn operators() {
        let yes = [AnswerValue::Choice("yes".to_string())];
        assert!(operator_holds(ConditionOperator::Equals, &[json!(true)], &yes));
        assert!(operator_holds(ConditionOperator::AnyOf, &[json!("no"), json!("yes")], &yes));
        let text = [AnswerValue::Text([("en".to_string(), "Terraces on slopes".to_string())].into())];
        assert!(operator_holds(ConditionOperator::Contains, &[json!("terrace")], &text));
        assert!(!operator_holds(ConditionOperator::Selected, &[], &[]));
    }
}
