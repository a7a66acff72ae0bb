//! CLI integration tests for the `qcat` subcommands.
//!
//! Uses `assert_cmd` to spawn the binary and verify exit codes, stdout
//! and stderr. Every test writes its own settings file pointing at the
//! bundled configurations, a temporary store and the in-process search
//! backend.

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Locate the workspace root by walking up from CARGO_MANIFEST_DIR.
fn workspace_root() -> PathBuf {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    manifest_dir
        .parent()
        .and_then(|p| p.parent())
        .expect("workspace root")
        .to_path_buf()
}

/// Settings for a throwaway installation under `dir`.
fn settings_file(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("qcat.toml");
    let text = format!(
        "configurations_dir = '{}'\n\n[search]\nurl = 'memory'\nprefix = 'test_'\n\n[store]\npath = '{}'\n",
        workspace_root().join("configurations").display(),
        dir.path().join("store.json").display(),
    );
    fs::write(&path, text).unwrap();
    path
}

/// Helper: create a Command for the `qcat` binary with a clean
/// environment, rooted at the workspace.
fn qcat(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("qcat");
    cmd.current_dir(workspace_root())
        .env_remove("QCAT_ES_URL")
        .env_remove("QCAT_INDEX_PREFIX")
        .env_remove("RUST_LOG")
        .env("QCAT_CONFIG", settings_file(dir));
    cmd
}

// ──────────────────────────────────────────────
// Help and argument handling
// ──────────────────────────────────────────────

#[test]
fn help_lists_admin_commands() {
    let dir = TempDir::new().unwrap();
    qcat(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("QCAT questionnaire administration"))
        .stdout(predicate::str::contains("reindex"))
        .stdout(predicate::str::contains("send-notifications"))
        .stdout(predicate::str::contains("validate-configuration"));
}

#[test]
fn reindex_needs_a_code_or_all() {
    let dir = TempDir::new().unwrap();
    qcat(&dir).arg("reindex").assert().failure();
}

#[test]
fn missing_settings_file_fails() {
    let dir = TempDir::new().unwrap();
    qcat(&dir)
        .args(["--config", "does/not/exist.toml", "clean-locks"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("error reading settings"));
}

// ──────────────────────────────────────────────
// validate-configuration
// ──────────────────────────────────────────────

#[test]
fn bundled_configuration_is_valid() {
    let dir = TempDir::new().unwrap();
    qcat(&dir)
        .args(["validate-configuration", "configurations/sample_2015.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("valid sample_2015"));
}

#[test]
fn validate_json_output_names_the_edition() {
    let dir = TempDir::new().unwrap();
    let output = qcat(&dir)
        .args([
            "--output",
            "json",
            "validate-configuration",
            "configurations/technologies_2015.json",
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(json["valid"], true);
    assert_eq!(json["code"], "technologies");
    assert_eq!(json["edition"], "2015");
}

#[test]
fn schema_violation_is_reported() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("broken_1.json");
    fs::write(&file, r#"{"code": "broken", "edition": "1"}"#).unwrap();
    qcat(&dir)
        .arg("validate-configuration")
        .arg(&file)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("(schema)"));
}

#[test]
fn registry_issues_are_reported() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("dup_1.json");
    let doc = serde_json::json!({
        "code": "dup",
        "edition": "1",
        "sections": [{"keyword": "s", "categories": [{"keyword": "c", "subcategories": [{
            "keyword": "sc",
            "questiongroups": [
                {"keyword": "qg_1", "questions": [{"keyword": "key_1", "type": "char"}]},
                {"keyword": "qg_2", "questions": [{"keyword": "key_1", "type": "char"}]}
            ]
        }]}]}]
    });
    fs::write(&file, doc.to_string()).unwrap();
    qcat(&dir)
        .arg("validate-configuration")
        .arg(&file)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("(configuration)"))
        .stderr(predicate::str::contains("key_1"));
}

#[test]
fn malformed_json_is_an_error() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("garbage.json");
    fs::write(&file, "{ not json").unwrap();
    qcat(&dir)
        .args(["--output", "json", "validate-configuration"])
        .arg(&file)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("\"error\""));
}

// ──────────────────────────────────────────────
// Administration against an empty installation
// ──────────────────────────────────────────────

#[test]
fn check_data_on_empty_store() {
    let dir = TempDir::new().unwrap();
    qcat(&dir)
        .arg("check-data")
        .assert()
        .success()
        .stdout(predicate::str::contains("0 documents with issues"));
}

#[test]
fn clean_locks_on_empty_store() {
    let dir = TempDir::new().unwrap();
    qcat(&dir)
        .arg("clean-locks")
        .assert()
        .success()
        .stdout(predicate::str::contains("cleared 0 expired locks"));
}

#[test]
fn send_notifications_with_empty_queue() {
    let dir = TempDir::new().unwrap();
    qcat(&dir)
        .arg("send-notifications")
        .assert()
        .success()
        .stdout(predicate::str::contains("sent 0, skipped 0, failed 0"));
}

#[test]
fn reindex_one_configuration() {
    let dir = TempDir::new().unwrap();
    qcat(&dir)
        .args(["reindex", "technologies"])
        .assert()
        .success()
        .stdout(predicate::str::contains("test_technologies"))
        .stdout(predicate::str::contains("0 documents"));
}

#[test]
fn reindex_all_reports_every_active_configuration() {
    let dir = TempDir::new().unwrap();
    let output = qcat(&dir)
        .args(["--output", "json", "reindex", "--all"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: serde_json::Value = serde_json::from_slice(&output).unwrap();
    let rebuilt = json["rebuilt"].as_array().unwrap();
    assert!(rebuilt.len() >= 4, "rebuilt: {rebuilt:?}");
    assert!(rebuilt
        .iter()
        .all(|r| r["index"].as_str().unwrap().starts_with("test_")));
}

#[test]
fn index_prefix_flag_overrides_settings() {
    let dir = TempDir::new().unwrap();
    qcat(&dir)
        .args(["--index-prefix", "other_", "reindex", "unccd"])
        .assert()
        .success()
        .stdout(predicate::str::contains("other_unccd"));
}

#[test]
fn retry_index_checks_every_alias() {
    let dir = TempDir::new().unwrap();
    qcat(&dir)
        .arg("retry-index")
        .assert()
        .success()
        .stdout(predicate::str::contains("repaired 0 documents"));
}

#[test]
fn reload_known_configuration() {
    let dir = TempDir::new().unwrap();
    qcat(&dir)
        .args(["reload-configuration", "sample", "2015"])
        .assert()
        .success()
        .stdout(predicate::str::contains("reloaded sample_2015"));
}

#[test]
fn reload_unknown_configuration_fails() {
    let dir = TempDir::new().unwrap();
    qcat(&dir)
        .args(["reload-configuration", "nothing", "1999"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("nothing_1999.json"));
}
