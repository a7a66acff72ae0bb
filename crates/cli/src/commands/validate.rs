use std::path::Path;
use std::process;

use qcat_core::{ConfigurationError, DomainTables, Registry};

use crate::settings::Settings;
use crate::{report_error, OutputFormat};

static CONFIGURATION_SCHEMA_STR: &str = include_str!("../../../../docs/configuration-schema.json");

/// Check a configuration document against the JSON Schema, then run the
/// registry's validation passes on it.
pub(crate) fn cmd_validate(file: &Path, settings: &Settings, output: OutputFormat, quiet: bool) {
    let schema: serde_json::Value = match serde_json::from_str(CONFIGURATION_SCHEMA_STR) {
        Ok(s) => s,
        Err(e) => {
            let msg = format!("internal error: failed to parse embedded configuration schema: {}", e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };

    let doc_str = match std::fs::read_to_string(file) {
        Ok(s) => s,
        Err(e) => {
            let msg = format!("error reading file '{}': {}", file.display(), e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };

    let doc: serde_json::Value = match serde_json::from_str(&doc_str) {
        Ok(v) => v,
        Err(e) => {
            let msg = format!("error parsing JSON in '{}': {}", file.display(), e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };

    let validator = match jsonschema::validator_for(&schema) {
        Ok(v) => v,
        Err(e) => {
            let msg = format!("internal error: failed to compile schema: {}", e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };

    let schema_errors: Vec<String> = validator
        .iter_errors(&doc)
        .map(|e| format!("{}", e))
        .collect();
    if !schema_errors.is_empty() {
        fail(file, "schema", &schema_errors, output, quiet);
    }

    let registry = Registry::new(DomainTables::bundled(), settings.features);
    match registry.load_value(&doc) {
        Ok(config) => {
            if !quiet {
                let key = config.key();
                match output {
                    OutputFormat::Text => println!("valid {}_{}", key.code, key.edition),
                    OutputFormat::Json => {
                        let json = serde_json::json!({
                            "valid": true,
                            "code": key.code,
                            "edition": key.edition,
                        });
                        println!("{}", json);
                    }
                }
            }
        }
        Err(ConfigurationError::InvalidConfiguration { issues, .. }) => {
            let errors: Vec<String> = issues.iter().map(|i| i.to_string()).collect();
            fail(file, "configuration", &errors, output, quiet);
        }
        Err(e) => {
            fail(file, "configuration", &[e.to_string()], output, quiet);
        }
    }
}

fn fail(file: &Path, stage: &str, errors: &[String], output: OutputFormat, quiet: bool) -> ! {
    match output {
        OutputFormat::Text => {
            if !quiet {
                eprintln!("invalid {} ({})", file.display(), stage);
                for err in errors {
                    eprintln!("  - {}", err);
                }
            }
        }
        OutputFormat::Json => {
            let json = serde_json::json!({
                "valid": false,
                "stage": stage,
                "errors": errors,
            });
            eprintln!("{}", serde_json::to_string_pretty(&json).unwrap_or_default());
        }
    }
    process::exit(1);
}
