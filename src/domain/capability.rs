//! What a renderer declares about itself: output formats, capability tags,
//! priority tier and optional configuration schema.

use std::{collections::BTreeSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use super::{config_schema::ConfigSchema, diagram::DiagramType, error::DomainError};

/// Output formats a renderer can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Svg,
    Png,
    Pdf,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 3] = [OutputFormat::Svg, OutputFormat::Png, OutputFormat::Pdf];

    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Svg => "svg",
            OutputFormat::Png => "png",
            OutputFormat::Pdf => "pdf",
        }
    }

    /// Markup formats are text and go through the content-safety pipeline.
    pub fn is_markup(self) -> bool {
        matches!(self, OutputFormat::Svg)
    }

    pub fn extension(self) -> &'static str {
        self.as_str()
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            OutputFormat::Svg => "image/svg+xml",
            OutputFormat::Png => "image/png",
            OutputFormat::Pdf => "application/pdf",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "svg" => Ok(OutputFormat::Svg),
            "png" => Ok(OutputFormat::Png),
            "pdf" => Ok(OutputFormat::Pdf),
            other => Err(DomainError::unknown_variant("output format", other)),
        }
    }
}

/// Closed set of features a renderer may advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Caching,
    ThemeSupport,
    LocalRendering,
    RemoteRendering,
    CustomConfig,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Caching => "caching",
            Capability::ThemeSupport => "theme-support",
            Capability::LocalRendering => "local-rendering",
            Capability::RemoteRendering => "remote-rendering",
            Capability::CustomConfig => "custom-config",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "caching" => Ok(Capability::Caching),
            "theme-support" | "theme" => Ok(Capability::ThemeSupport),
            "local-rendering" | "local" => Ok(Capability::LocalRendering),
            "remote-rendering" | "remote" => Ok(Capability::RemoteRendering),
            "custom-config" => Ok(Capability::CustomConfig),
            other => Err(DomainError::unknown_variant("capability", other)),
        }
    }
}

/// Static description of a renderer implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RendererDescriptor {
    pub name: String,
    pub description: String,
    pub supported_formats: BTreeSet<OutputFormat>,
    pub capabilities: BTreeSet<Capability>,
    /// Lower tiers are preferred.
    pub priority: u32,
    pub version: String,
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_schema: Option<ConfigSchema>,
    /// Diagram types the renderer can draw; `None` accepts every type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagram_types: Option<BTreeSet<DiagramType>>,
}

impl RendererDescriptor {
    pub fn new(
        name: impl Into<String>,
        formats: impl IntoIterator<Item = OutputFormat>,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            supported_formats: formats.into_iter().collect(),
            capabilities: BTreeSet::new(),
            priority: 100,
            version: String::from("0.0.0"),
            dependencies: Vec::new(),
            config_schema: None,
            diagram_types: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_capabilities(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities.extend(capabilities);
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_config_schema(mut self, schema: ConfigSchema) -> Self {
        self.config_schema = Some(schema);
        self
    }

    pub fn with_diagram_types(mut self, types: impl IntoIterator<Item = DiagramType>) -> Self {
        self.diagram_types = Some(types.into_iter().collect());
        self
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("renderer name must not be empty"));
        }
        if self.supported_formats.is_empty() {
            return Err(DomainError::validation(format!(
                "renderer `{}` declares no supported formats",
                self.name
            )));
        }
        Ok(())
    }

    pub fn supports_format(&self, format: OutputFormat) -> bool {
        self.supported_formats.contains(&format)
    }

    pub fn supports_diagram(&self, diagram: DiagramType) -> bool {
        self.diagram_types
            .as_ref()
            .is_none_or(|types| types.contains(&diagram))
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Capabilities from `required` the renderer does not declare.
    pub fn missing_capabilities(&self, required: &BTreeSet<Capability>) -> Vec<Capability> {
        required.difference(&self.capabilities).copied().collect()
    }
}
