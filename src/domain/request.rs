use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::capability::{Capability, OutputFormat};

/// Either a named theme understood by the backend or an inline color mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Theme {
    Named(String),
    Custom(BTreeMap<String, String>),
}

impl Theme {
    pub fn named(name: impl Into<String>) -> Self {
        Theme::Named(name.into())
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Theme::Named(name) => Some(name.as_str()),
            Theme::Custom(_) => None,
        }
    }

    pub fn variables(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            Theme::Named(_) => None,
            Theme::Custom(vars) => Some(vars),
        }
    }
}

/// A single render call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderRequest {
    pub source: String,
    pub format: OutputFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<Theme>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_renderer: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub required_capabilities: BTreeSet<Capability>,
}

impl RenderRequest {
    pub fn new(source: impl Into<String>, format: OutputFormat) -> Self {
        Self {
            source: source.into(),
            format,
            theme: None,
            config: BTreeMap::new(),
            preferred_renderer: None,
            required_capabilities: BTreeSet::new(),
        }
    }

    pub fn with_theme(mut self, theme: Theme) -> Self {
        self.theme = Some(theme);
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    pub fn with_preferred_renderer(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        let trimmed = name.trim();
        if !trimmed.is_empty() {
            self.preferred_renderer = Some(trimmed.to_string());
        }
        self
    }

    pub fn requiring(mut self, capability: Capability) -> Self {
        self.required_capabilities.insert(capability);
        self
    }

    /// Same request carrying a different source text.
    pub fn with_source(&self, source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn theme_deserializes_from_name_or_mapping() {
        let named: Theme = serde_json::from_str("\"dark\"").unwrap();
        assert_eq!(named, Theme::named("dark"));

        let custom: Theme = serde_json::from_str(r##"{"primaryColor":"#ff0000"}"##).unwrap();
        assert_eq!(
            custom.variables().and_then(|vars| vars.get("primaryColor")).map(String::as_str),
            Some("#ff0000")
        );
    }

    #[test]
    fn blank_preference_is_ignored() {
        let request =
            RenderRequest::new("graph TD", OutputFormat::Svg).with_preferred_renderer("  ");
        assert!(request.preferred_renderer.is_none());
    }
}
