//! Render path: a document and a category become a form descriptor.
//!
//! Forms are data. The descriptor lists every questiongroup of the step
//! with its instances and field descriptors; the web layer only draws it.

use std::collections::HashMap;

use qcat_core::{localized, Category, Configuration, QuestionType, Subcategory};
use qcat_interchange::ConfigurationRef;
use qcat_storage::{DocumentRecord, FieldAnnotation, UserId};
use serde::Serialize;
use serde_json::{Map, Value as Json};

use super::conditions::{field_state, group_active, instances};
use super::progress::{category_progress, Progress};
use crate::error::QcatError;
use crate::links::LinkedDocument;
use crate::value::{AnswerValue, DisplayValue};

/// How the requested language relates to the document's languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationMode {
    Original,
    Existing,
    /// The first edit starts a new translation and needs confirmation.
    New,
}

impl TranslationMode {
    pub fn of(doc: &DocumentRecord, language: &str) -> Self {
        if doc.original_language == language {
            TranslationMode::Original
        } else if doc.translation_languages.iter().any(|l| l == language) {
            TranslationMode::Existing
        } else {
            TranslationMode::New
        }
    }
}

/// Read-only original next to the editable translation of a text field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextOverlay {
    pub original_language: String,
    pub original: Option<String>,
    pub translation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChoiceOption {
    pub value: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDescriptor {
    pub keyword: String,
    pub kind: QuestionType,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub helptext: Option<String>,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    /// Stored payload value; `null` when unanswered.
    pub value: Json,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<DisplayValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<TextOverlay>,
    pub visible: bool,
    pub enabled: bool,
    pub choices: Vec<ChoiceOption>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceDescriptor {
    pub index: usize,
    /// Placeholder entry shown for a group without answers.
    pub blank: bool,
    pub fields: Vec<FieldDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupDescriptor {
    pub keyword: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub helptext: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_template: Option<String>,
    pub min: u32,
    pub max: u32,
    pub numbered: bool,
    pub plus_group: bool,
    /// Disclosure state of a plus group: open when anything is answered.
    pub open: bool,
    pub active: bool,
    pub can_add: bool,
    pub can_remove: bool,
    pub can_reorder: bool,
    pub instances: Vec<InstanceDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormDescriptor {
    pub document_id: String,
    pub identifier: String,
    pub configuration: ConfigurationRef,
    pub category: String,
    pub label: String,
    pub language: String,
    pub original_language: String,
    pub translation: TranslationMode,
    pub read_only: bool,
    pub progress: Progress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_by: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
    pub groups: Vec<GroupDescriptor>,
}

impl FormDescriptor {
    pub fn needs_translation_confirmation(&self) -> bool {
        !self.read_only && self.translation == TranslationMode::New
    }

    /// The submission that reproduces the rendered state.
    pub fn to_payload(&self) -> Json {
        let mut out = Map::new();
        for group in &self.groups {
            let entries: Vec<Json> = group
                .instances
                .iter()
                .filter(|i| !i.blank)
                .map(|instance| {
                    Json::Object(
                        instance
                            .fields
                            .iter()
                            .filter(|f| !f.value.is_null())
                            .map(|f| (f.keyword.clone(), f.value.clone()))
                            .collect(),
                    )
                })
                .filter(|i| i.as_object().is_some_and(|o| !o.is_empty()))
                .collect();
            out.insert(group.keyword.clone(), Json::Array(entries));
        }
        Json::Object(out)
    }
}

/// Per-render inputs that do not come from the configuration.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub language: &'a str,
    /// Linked documents the viewer may see; other link values are not
    /// shown.
    pub links: &'a [LinkedDocument],
    pub read_only: bool,
}

fn subcategory_of(category: &Category) -> HashMap<String, String> {
    fn walk(subs: &[Subcategory], out: &mut HashMap<String, String>) {
        for sub in subs {
            for qg in &sub.questiongroups {
                out.insert(qg.clone(), sub.keyword.clone());
            }
            walk(&sub.subcategories, out);
        }
    }
    let mut out = HashMap::new();
    walk(&category.subcategories, &mut out);
    out
}

fn annotation_for(doc: &DocumentRecord, questiongroup: &str, question: Option<&str>) -> Option<String> {
    let notes: Vec<&str> = doc
        .annotations
        .iter()
        .filter(|a: &&FieldAnnotation| {
            a.questiongroup == questiongroup && a.question.as_deref() == question
        })
        .map(|a| a.message.as_str())
        .collect();
    (!notes.is_empty()).then(|| notes.join("; "))
}

pub fn render(
    config: &Configuration,
    doc: &DocumentRecord,
    category: &str,
    ctx: RenderContext<'_>,
) -> Result<FormDescriptor, QcatError> {
    let definition = config.get_category(category)?;
    let subcategories = subcategory_of(definition);
    let payload = &doc.payload;
    let language = ctx.language;

    let mut groups = Vec::new();
    for group in config.category_questiongroups(category)? {
        let stored = instances(payload, &group.keyword);
        let blank = stored.is_empty();
        let placeholder = [Json::Object(Map::new())];
        let shown: &[Json] = if blank { &placeholder } else { stored };

        let mut rendered = Vec::new();
        let mut open = false;
        for (index, instance) in shown.iter().enumerate() {
            let mut fields = Vec::new();
            for question in &group.questions {
                let state = field_state(config, payload, question, Some((&group.keyword, index)));
                let mut value = instance.get(&question.keyword).cloned().unwrap_or(Json::Null);
                if question.kind == QuestionType::Link {
                    let known = value
                        .get("link_identifier")
                        .and_then(Json::as_str)
                        .is_some_and(|id| ctx.links.iter().any(|l| l.identifier == id));
                    if !known {
                        value = Json::Null;
                    }
                }
                let parsed = AnswerValue::parse(question, &value, language, None).ok().flatten();
                open |= parsed.as_ref().is_some_and(AnswerValue::is_present);
                let text = match (&parsed, question.is_text()) {
                    (Some(AnswerValue::Text(map)), true) if doc.original_language != language => {
                        Some(TextOverlay {
                            original_language: doc.original_language.clone(),
                            original: map.get(&doc.original_language).cloned(),
                            translation: map.get(language).cloned(),
                        })
                    }
                    _ => None,
                };
                let display = match (&parsed, question.kind) {
                    (Some(AnswerValue::Link(link)), _) => ctx
                        .links
                        .iter()
                        .find(|l| l.identifier == link.link_identifier)
                        .map(|l| DisplayValue::Text(localized(&l.name, language))),
                    (Some(parsed), _) => Some(parsed.display(question, language)),
                    (None, _) => None,
                };
                let choices = question
                    .choices
                    .iter()
                    .filter(|c| state.allowed.as_ref().map_or(true, |a| a.contains(&c.value)))
                    .map(|c| ChoiceOption {
                        value: c.value.clone(),
                        label: localized(&c.label, language),
                        image: c.image.clone(),
                    })
                    .collect();
                fields.push(FieldDescriptor {
                    keyword: question.keyword.clone(),
                    kind: question.kind,
                    label: question.label(language),
                    helptext: question.helptext.as_ref().map(|h| localized(h, language)),
                    required: question.constraints.required,
                    max_length: question.constraints.max_length,
                    value,
                    display,
                    text,
                    visible: state.visible,
                    enabled: state.enabled && !ctx.read_only,
                    choices,
                    annotation: annotation_for(doc, &group.keyword, Some(&question.keyword)),
                });
            }
            rendered.push(InstanceDescriptor {
                index,
                blank,
                fields,
            });
        }

        let count = stored.len();
        let editable = !ctx.read_only;
        groups.push(GroupDescriptor {
            keyword: group.keyword.clone(),
            subcategory: subcategories.get(&group.keyword).cloned(),
            helptext: group.helptext.as_ref().map(|h| localized(h, language)),
            view_template: group.view_template.clone(),
            min: group.min,
            max: group.max,
            numbered: group.numbered,
            plus_group: group.plus_group,
            open: group.plus_group && open,
            active: group_active(config, payload, group),
            can_add: editable && count.max(1) < group.max as usize,
            can_remove: editable && count > group.min as usize,
            can_reorder: editable && count > 1,
            instances: rendered,
            annotation: annotation_for(doc, &group.keyword, None),
        });
    }

    Ok(FormDescriptor {
        document_id: doc.id.clone(),
        identifier: doc.identifier.clone(),
        configuration: doc.configuration.clone(),
        category: category.to_string(),
        label: definition.label(language),
        language: language.to_string(),
        original_language: doc.original_language.clone(),
        translation: TranslationMode::of(doc, language),
        read_only: ctx.read_only,
        progress: category_progress(config, payload, category)?,
        locked_by: None,
        notice: None,
        groups,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::validate::bind;
    use qcat_core::{build_configuration, DomainTables, Labels};
    use qcat_storage::conformance::make_document;
    use qcat_storage::DocumentStatus;
    use serde_json::json;

    fn sample() -> Configuration {
        let doc = qcat_interchange::from_str(include_str!(
            "../../../../configurations/sample_2015.json"
        ))
        .unwrap();
        build_configuration(&doc, &DomainTables::bundled()).configuration
    }

    fn ctx<'a>(language: &'a str, links: &'a [LinkedDocument]) -> RenderContext<'a> {
        RenderContext {
            language,
            links,
            read_only: false,
        }
    }

    #[test]
    fn empty_group_renders_one_blank_entry() {
        let config = sample();
        let doc = make_document("d1", "sample_1", 1);
        let form = render(&config, &doc, "cat_2", ctx("en", &[])).unwrap();
        let qg_5 = form.groups.iter().find(|g| g.keyword == "qg_5").unwrap();
        assert_eq!(qg_5.instances.len(), 1);
        assert!(qg_5.instances[0].blank);
        assert!(qg_5.can_add && !qg_5.can_remove);
        assert_eq!(form.to_payload()["qg_5"], json!([]));
    }

    #[test]
    fn render_commit_render_is_stable() {
        let config = sample();
        let mut doc = make_document("d1", "sample_1", 1);
        doc.payload = json!({
            "qg_1": [{"key_1": {"en": "Foo", "es": "Fu"}, "key_3": {"en": "Bar"}}],
            "qg_2": [{"key_2": {"en": "Baz"}}],
        });
        let before = render(&config, &doc, "cat_1", ctx("en", &[])).unwrap();
        let bound = bind(&config, &doc.payload, "cat_1", &before.to_payload(), "en").unwrap();
        doc.payload = bound.merge_into(&doc.payload);
        let after = render(&config, &doc, "cat_1", ctx("en", &[])).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn translation_overlay_pairs_original_and_translation() {
        let config = sample();
        let mut doc = make_document("d1", "sample_1", 1);
        doc.payload = json!({"qg_1": [{"key_1": {"en": "Foo"}}]});
        let form = render(&config, &doc, "cat_1", ctx("fr", &[])).unwrap();
        assert_eq!(form.translation, TranslationMode::New);
        assert!(form.needs_translation_confirmation());
        let overlay = form.groups[0].instances[0].fields[0].text.clone().unwrap();
        assert_eq!(overlay.original.as_deref(), Some("Foo"));
        assert_eq!(overlay.translation, None);
    }

    #[test]
    fn unresolvable_links_are_not_shown() {
        let config = sample();
        let mut doc = make_document("d1", "sample_1", 1);
        doc.payload = json!({"qg_links": [
            {"link_id": {"link_identifier": "samplemulti_1"}},
            {"link_id": {"link_identifier": "samplemulti_2"}},
        ]});
        let visible = [LinkedDocument {
            identifier: "samplemulti_2".to_string(),
            configuration: "samplemulti".to_string(),
            document_id: "m2".to_string(),
            status: DocumentStatus::Public,
            name: Labels::from([("en".to_string(), "Other".to_string())]),
        }];
        let form = render(&config, &doc, "cat_5", ctx("en", &visible)).unwrap();
        let entries = &form.groups[0].instances;
        assert!(entries[0].fields[0].value.is_null());
        assert_eq!(entries[1].fields[0].display, Some(DisplayValue::Text("Other".to_string())));
        assert_eq!(
            form.to_payload()["qg_links"],
            json!([{"link_id": {"link_identifier": "samplemulti_2"}}])
        );
    }

    #[test]
    fn plus_group_opens_when_answered() {
        let config = sample();
        let mut doc = make_document("d1", "sample_1", 1);
        let closed = render(&config, &doc, "cat_4", ctx("en", &[])).unwrap();
        assert!(!closed.groups.iter().find(|g| g.keyword == "qg_9").unwrap().open);
        doc.payload = json!({"qg_9": [{"key_14": 2.5}]});
        let open = render(&config, &doc, "cat_4", ctx("en", &[])).unwrap();
        assert!(open.groups.iter().find(|g| g.keyword == "qg_9").unwrap().open);
    }
}
