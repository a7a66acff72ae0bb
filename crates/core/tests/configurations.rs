//! Validates the bundled configuration documents against the formal
//! schema at docs/configuration-schema.json and loads them into a registry.

use qcat_core::Registry;
use std::path::{Path, PathBuf};

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

fn configuration_files() -> Vec<PathBuf> {
    let mut paths: Vec<_> = std::fs::read_dir(workspace_root().join("configurations"))
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|e| e == "json"))
        .collect();
    paths.sort();
    paths
}

#[test]
fn bundled_configurations_match_schema() {
    let schema_path = workspace_root().join("docs/configuration-schema.json");
    let schema_src = std::fs::read_to_string(&schema_path)
        .unwrap_or_else(|e| panic!("Failed to read schema at {}: {}", schema_path.display(), e));
    let schema: serde_json::Value = serde_json::from_str(&schema_src).unwrap();
    let validator = jsonschema::validator_for(&schema)
        .unwrap_or_else(|e| panic!("Failed to compile schema: {}", e));

    let mut failures = Vec::new();
    let files = configuration_files();
    assert!(files.len() >= 5, "expected bundled configurations");
    for path in &files {
        let instance: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        if let Err(error) = validator.validate(&instance) {
            failures.push(format!("{}: {}", path.display(), error));
        }
    }
    assert!(failures.is_empty(), "schema failures:\n{}", failures.join("\n"));
}

#[test]
fn bundled_configurations_load_without_issues() {
    let registry = Registry::default();
    let report = registry
        .load_dir(&workspace_root().join("configurations"))
        .unwrap();
    assert!(report.invalid.is_empty(), "invalid: {:?}", report.invalid);
    assert_eq!(report.loaded.len(), configuration_files().len());
    assert_eq!(
        registry.codes(),
        vec!["sample", "samplemulti", "technologies", "unccd"]
    );
}

#[test]
fn schema_rejects_unknown_question_type() {
    let schema: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(workspace_root().join("docs/configuration-schema.json")).unwrap(),
    )
    .unwrap();
    let validator = jsonschema::validator_for(&schema).unwrap();
    let doc = serde_json::json!({
        "code": "x",
        "edition": "1",
        "sections": [{"keyword": "s", "categories": [{"keyword": "c", "subcategories": [{
            "keyword": "sc",
            "questiongroups": [{"keyword": "qg", "questions": [{"keyword": "k", "type": "hologram"}]}]
        }]}]}]
    });
    assert!(validator.validate(&doc).is_err());
}
