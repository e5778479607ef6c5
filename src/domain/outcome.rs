use std::{collections::BTreeMap, time::Duration};

use serde::{Serialize, Serializer};

use super::capability::OutputFormat;

/// Bytes produced by a renderer: markup text or an opaque binary payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderContent {
    Text(String),
    Binary(Vec<u8>),
}

impl RenderContent {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            RenderContent::Text(text) => text.as_bytes(),
            RenderContent::Binary(bytes) => bytes,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            RenderContent::Text(text) => Some(text),
            RenderContent::Binary(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

const FALLBACK_ERROR: &str = "render failed without an error message";

/// Result of a render call.
///
/// Built through [`success`](Self::success) or [`failure`](Self::failure);
/// the status and error text are read-only so a failed outcome always
/// carries a non-empty error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderOutcome {
    #[serde(skip)]
    pub content: Option<RenderContent>,
    pub format: OutputFormat,
    pub renderer_name: String,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    pub warnings: Vec<String>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl RenderOutcome {
    pub fn success(
        content: RenderContent,
        format: OutputFormat,
        renderer_name: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            content: Some(content),
            format,
            renderer_name: renderer_name.into(),
            duration,
            success: true,
            error: None,
            warnings: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn failure(
        format: OutputFormat,
        renderer_name: impl Into<String>,
        error: impl Into<String>,
        duration: Duration,
    ) -> Self {
        let error = error.into();
        let error = if error.trim().is_empty() {
            FALLBACK_ERROR.to_string()
        } else {
            error
        };
        Self {
            content: None,
            format,
            renderer_name: renderer_name.into(),
            duration,
            success: false,
            error: Some(error),
            warnings: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_warnings(mut self, warnings: impl IntoIterator<Item = String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn text(&self) -> Option<&str> {
        self.content.as_ref().and_then(RenderContent::as_text)
    }
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_never_has_empty_error() {
        let outcome = RenderOutcome::failure(OutputFormat::Svg, "", "   ", Duration::ZERO);
        assert!(!outcome.is_success());
        assert_eq!(outcome.error(), Some(FALLBACK_ERROR));

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], FALLBACK_ERROR);
    }

    #[test]
    fn serializes_duration_in_millis() {
        let outcome = RenderOutcome::success(
            RenderContent::Text("<svg/>".into()),
            OutputFormat::Svg,
            "r",
            Duration::from_millis(42),
        );
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["duration_ms"], 42);
        assert!(json.get("content").is_none());
        assert!(json.get("error").is_none());
        assert!(outcome.is_success());
    }
}
