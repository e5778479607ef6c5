//! Per-renderer settings: `[renderers.<name>]` file sections overlaid with
//! `DIAGRAM_RELAY_<RENDERER>_<KEY>` environment variables, then checked
//! against the renderer's schema.

use std::{collections::BTreeMap, sync::Arc};

use serde_json::Value;

use crate::domain::{DomainError, RendererDescriptor, RendererSettings};

use super::LoadError;

/// Environment variable lookup, injectable for tests.
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

pub fn process_env() -> EnvLookup {
    Arc::new(|key: &str| std::env::var(key).ok())
}

/// `DIAGRAM_RELAY_MERMAID_CLI_TIMEOUT_SECONDS` for (`mermaid-cli`, `timeout_seconds`).
pub fn env_key(renderer: &str, key: &str) -> String {
    let normalize = |part: &str| part.to_ascii_uppercase().replace(['-', '.'], "_");
    format!("DIAGRAM_RELAY_{}_{}", normalize(renderer), normalize(key))
}

/// Resolves the effective settings for one renderer.
///
/// Environment values win over file values for every key the schema
/// declares; schema defaults fill whatever is still missing.
pub fn resolve(
    descriptor: &RendererDescriptor,
    section: Option<&RendererSettings>,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<RendererSettings, DomainError> {
    let mut settings = section.cloned().unwrap_or_default();
    let Some(schema) = descriptor.config_schema.as_ref() else {
        return Ok(settings);
    };
    for key in schema.keys() {
        if let Some(value) = env(&env_key(&descriptor.name, key)) {
            settings.insert(key, value);
        }
    }
    schema.validate(&settings)?;
    Ok(schema.apply_defaults(&settings))
}

/// Converts raw file sections into flat string settings.
pub(super) fn flatten_sections(
    raw: BTreeMap<String, BTreeMap<String, Value>>,
) -> Result<BTreeMap<String, RendererSettings>, LoadError> {
    raw.into_iter()
        .map(|(name, section)| {
            let settings = section
                .into_iter()
                .map(|(key, value)| {
                    let value = scalar(&value).ok_or_else(|| {
                        LoadError::invalid(
                            "renderers",
                            format!("`{name}.{key}` must be a string, number or boolean"),
                        )
                    })?;
                    Ok((key, value))
                })
                .collect::<Result<RendererSettings, LoadError>>()?;
            Ok((name, settings))
        })
        .collect()
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}
