//! Flat per-renderer settings and the schema each renderer publishes for them.

use std::{
    collections::{BTreeMap, BTreeSet},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use super::error::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Integer,
    Boolean,
    Path,
    Url,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigField {
    pub key: String,
    pub kind: FieldKind,
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// Accepted keys for a renderer's settings section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSchema {
    fields: Vec<ConfigField>,
}

impl ConfigSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(
        mut self,
        key: impl Into<String>,
        kind: FieldKind,
        description: impl Into<String>,
        default: Option<&str>,
    ) -> Self {
        self.fields.push(ConfigField {
            key: key.into(),
            kind,
            description: description.into(),
            required: false,
            default: default.map(str::to_string),
        });
        self
    }

    pub fn required_field(
        mut self,
        key: impl Into<String>,
        kind: FieldKind,
        description: impl Into<String>,
    ) -> Self {
        self.fields.push(ConfigField {
            key: key.into(),
            kind,
            description: description.into(),
            required: true,
            default: None,
        });
        self
    }

    pub fn fields(&self) -> &[ConfigField] {
        &self.fields
    }

    pub fn keys(&self) -> BTreeSet<&str> {
        self.fields.iter().map(|field| field.key.as_str()).collect()
    }

    /// Checks every key is known, required keys are present and values parse
    /// as their declared kind.
    pub fn validate(&self, settings: &RendererSettings) -> Result<(), DomainError> {
        let known = self.keys();
        if let Some(unknown) = settings.keys().find(|key| !known.contains(key)) {
            return Err(DomainError::validation(format!("unknown setting `{unknown}`")));
        }

        for field in &self.fields {
            let Some(value) = settings.get(&field.key) else {
                if field.required && field.default.is_none() {
                    return Err(DomainError::validation(format!(
                        "missing required setting `{}`",
                        field.key
                    )));
                }
                continue;
            };
            check_kind(field, value)?;
        }
        Ok(())
    }

    /// Returns `settings` with schema defaults filled in for absent keys.
    pub fn apply_defaults(&self, settings: &RendererSettings) -> RendererSettings {
        let mut merged = settings.clone();
        for field in &self.fields {
            if let Some(default) = field.default.as_ref()
                && merged.get(&field.key).is_none()
            {
                merged.insert(field.key.clone(), default.clone());
            }
        }
        merged
    }
}

fn check_kind(field: &ConfigField, value: &str) -> Result<(), DomainError> {
    let ok = match field.kind {
        FieldKind::String | FieldKind::Path => true,
        FieldKind::Integer => value.trim().parse::<i64>().is_ok(),
        FieldKind::Boolean => parse_bool(value).is_some(),
        FieldKind::Url => {
            let lower = value.trim().to_ascii_lowercase();
            lower.starts_with("http://") || lower.starts_with("https://")
        }
    };
    if ok {
        Ok(())
    } else {
        Err(DomainError::validation(format!(
            "setting `{}` expects a {:?} value, got `{value}`",
            field.key, field.kind
        )))
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Flat key/value settings for a single renderer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RendererSettings(BTreeMap<String, String>);

impl RendererSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, key: &str, fallback: &'a str) -> &'a str {
        self.get(key).unwrap_or(fallback)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|value| value.trim().parse().ok())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(parse_bool)
    }

    pub fn get_seconds(&self, key: &str) -> Option<Duration> {
        self.get_u64(key).map(Duration::from_secs)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for RendererSettings
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> ConfigSchema {
        ConfigSchema::new()
            .field("timeout_seconds", FieldKind::Integer, "Attempt timeout", Some("30"))
            .field("server", FieldKind::Url, "Service base URL", None)
            .field("probe", FieldKind::Boolean, "Probe before use", Some("true"))
    }

    #[test]
    fn accepts_well_typed_settings() {
        let settings: RendererSettings = [("timeout_seconds", "5"), ("server", "https://kroki.io")]
            .into_iter()
            .collect();
        schema().validate(&settings).expect("valid settings");
    }

    #[test]
    fn rejects_unknown_keys_and_bad_values() {
        let unknown: RendererSettings = [("colour", "red")].into_iter().collect();
        assert!(schema().validate(&unknown).is_err());

        let bad_int: RendererSettings = [("timeout_seconds", "soon")].into_iter().collect();
        assert!(schema().validate(&bad_int).is_err());

        let bad_url: RendererSettings = [("server", "ftp://example")].into_iter().collect();
        assert!(schema().validate(&bad_url).is_err());
    }

    #[test]
    fn required_field_must_be_present() {
        let schema = ConfigSchema::new().required_field("token", FieldKind::String, "API token");
        assert!(schema.validate(&RendererSettings::new()).is_err());
    }

    #[test]
    fn defaults_fill_only_missing_keys() {
        let settings: RendererSettings = [("timeout_seconds", "9")].into_iter().collect();
        let merged = schema().apply_defaults(&settings);
        assert_eq!(merged.get_u64("timeout_seconds"), Some(9));
        assert_eq!(merged.get_bool("probe"), Some(true));
        assert_eq!(merged.get("server"), None);
    }
}
