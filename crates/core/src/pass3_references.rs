//! Pass 3: Reference validation -- repetition bounds, condition triggers,
//! "other" escapes, table layouts and link targets.

use crate::error::ConfigIssue;
use crate::model::*;

const PASS: u8 = 3;

pub fn validate_references(config: &Configuration, issues: &mut Vec<ConfigIssue>) {
    for qg in config.questiongroups() {
        validate_bounds("questiongroup", &qg.keyword, qg.min, qg.max, issues);

        if let Some(cond) = &qg.conditional {
            if !config.has_question(&cond.trigger_question) {
                issues.push(ConfigIssue::new(
                    PASS,
                    "questiongroup",
                    Some(&qg.keyword),
                    Some("conditional"),
                    format!("unknown trigger question '{}'", cond.trigger_question),
                ));
            } else if qg.get_question(&cond.trigger_question).is_some() {
                issues.push(ConfigIssue::new(
                    PASS,
                    "questiongroup",
                    Some(&qg.keyword),
                    Some("conditional"),
                    "questiongroup cannot be conditional on its own question",
                ));
            }
            validate_operator_values(&qg.keyword, cond.operator, &cond.values, issues);
        }

        for question in &qg.questions {
            validate_question(config, qg, question, issues);
        }
    }
}

fn validate_question(
    config: &Configuration,
    qg: &Questiongroup,
    question: &Question,
    issues: &mut Vec<ConfigIssue>,
) {
    let kw = question.keyword.as_str();

    if question.constraints.max_length == Some(0) {
        issues.push(ConfigIssue::new(
            PASS,
            "question",
            Some(kw),
            Some("max_length"),
            "max_length must be positive",
        ));
    }
    if let (Some(min), Some(max)) = (question.constraints.min, question.constraints.max) {
        if min > max {
            issues.push(ConfigIssue::new(
                PASS,
                "question",
                Some(kw),
                Some("min"),
                format!("min {} exceeds max {}", min, max),
            ));
        }
    }

    for cond in &question.conditions {
        if cond.depends_on == question.keyword {
            issues.push(ConfigIssue::new(
                PASS,
                "question",
                Some(kw),
                Some("conditions"),
                "question cannot depend on itself",
            ));
            continue;
        }
        let trigger = match config.get_question(&cond.depends_on) {
            Ok(t) => t,
            Err(_) => {
                issues.push(ConfigIssue::new(
                    PASS,
                    "question",
                    Some(kw),
                    Some("conditions"),
                    format!("unknown trigger question '{}'", cond.depends_on),
                ));
                continue;
            }
        };
        if cond.effect == ConditionEffect::PopulateFrom
            && !(question.is_choice() && trigger.is_choice())
        {
            issues.push(ConfigIssue::new(
                PASS,
                "question",
                Some(kw),
                Some("conditions"),
                "populate_from requires choice questions on both sides",
            ));
        }
        validate_operator_values(kw, cond.operator, &cond.values, issues);
    }

    if let Some(other) = &question.other {
        if question.choice(&other.value).is_none() {
            issues.push(ConfigIssue::new(
                PASS,
                "question",
                Some(kw),
                Some("other"),
                format!("'{}' is not one of the question's choices", other.value),
            ));
        }
        match qg.get_question(&other.question) {
            Some(escape) if escape.is_text() => {}
            Some(_) => issues.push(ConfigIssue::new(
                PASS,
                "question",
                Some(kw),
                Some("other"),
                format!("escape question '{}' must be text-valued", other.question),
            )),
            None => issues.push(ConfigIssue::new(
                PASS,
                "question",
                Some(kw),
                Some("other"),
                format!(
                    "escape question '{}' is not in questiongroup '{}'",
                    other.question, qg.keyword
                ),
            )),
        }
    }

    if let Some(table) = &question.table {
        validate_bounds("question", kw, table.min, table.max, issues);
        if table.rows.is_empty() {
            issues.push(ConfigIssue::new(
                PASS,
                "question",
                Some(kw),
                Some("table"),
                "table declares no rows",
            ));
        }
        for column in &table.columns {
            if matches!(
                column.kind,
                QuestionType::Table
                    | QuestionType::Link
                    | QuestionType::User
                    | QuestionType::Image
                    | QuestionType::File
            ) {
                issues.push(ConfigIssue::new(
                    PASS,
                    "question",
                    Some(kw),
                    Some("table"),
                    format!("column '{}' must be a scalar question", column.keyword),
                ));
            }
        }
    }

    if question.kind == QuestionType::Link {
        if let Some(target) = &question.link_configuration {
            if !config.links_to(target) {
                issues.push(ConfigIssue::new(
                    PASS,
                    "question",
                    Some(kw),
                    Some("link_configuration"),
                    format!("links to '{}' are not allowed by this configuration", target),
                ));
            }
        }
    }
}

fn validate_bounds(element: &str, keyword: &str, min: u32, max: u32, issues: &mut Vec<ConfigIssue>) {
    if max == 0 {
        issues.push(ConfigIssue::new(
            PASS,
            element,
            Some(keyword),
            Some("max"),
            "max must be at least 1",
        ));
    }
    if min > max {
        issues.push(ConfigIssue::new(
            PASS,
            element,
            Some(keyword),
            Some("min"),
            format!("min {} exceeds max {}", min, max),
        ));
    }
}

fn validate_operator_values(
    keyword: &str,
    operator: ConditionOperator,
    values: &[serde_json::Value],
    issues: &mut Vec<ConfigIssue>,
) {
    let needs_values = matches!(
        operator,
        ConditionOperator::Equals | ConditionOperator::AnyOf | ConditionOperator::Contains
    );
    if needs_values && values.is_empty() {
        issues.push(ConfigIssue::new(
            PASS,
            "condition",
            Some(keyword),
            Some("values"),
            "operator requires at least one value",
        ));
    }
}
