//! JSON Schema check for resilience config documents.
//!
//! Documents are checked against schema/resilience.schema.json before any
//! section is resolved, so a typo in a section or key name is an error
//! rather than a silent fall back to the preset.

use jsonschema::{ValidationError, Validator};
use serde_json::Value;
use std::sync::OnceLock;

use super::ConfigError;

const CONFIG_SCHEMA_JSON: &str = include_str!("../../../../schema/resilience.schema.json");

static VALIDATOR: OnceLock<Result<Validator, String>> = OnceLock::new();

fn validator() -> Result<&'static Validator, ConfigError> {
    VALIDATOR
        .get_or_init(|| {
            let schema: Value = serde_json::from_str(CONFIG_SCHEMA_JSON)
                .map_err(|e| format!("embedded schema is not valid JSON: {}", e))?;
            jsonschema::validator_for(&schema)
                .map_err(|e| format!("embedded schema does not compile: {}", e))
        })
        .as_ref()
        .map_err(|e| ConfigError::SchemaError(vec![e.clone()]))
}

/// Dotted key path of a violation, matching the `section.key` prefix used
/// by semantic validation errors.
fn key_path(error: &ValidationError<'_>) -> String {
    error
        .instance_path
        .to_string()
        .trim_start_matches('/')
        .replace('/', ".")
}

/// Check a config document against the embedded schema.
///
/// Every violation is reported, each prefixed with the offending key.
pub fn validate_config_schema(document: &Value) -> Result<(), ConfigError> {
    let violations: Vec<String> = validator()?
        .iter_errors(document)
        .map(|error| match key_path(&error) {
            path if path.is_empty() => error.to_string(),
            path => format!("{}: {}", path, error),
        })
        .collect();

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::SchemaError(violations))
    }
}
