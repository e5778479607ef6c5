//! Pre-flight checks and normalization for diagram source.

pub mod security;
pub mod syntax;

use serde::Serialize;
use tracing::debug;

use crate::{
    config::ValidationSettings,
    domain::{DiagramType, OutputFormat, RendererDescriptor, diagram},
};

use super::classify::{Classify, ErrorCategory};

/// Bounds applied during validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationLimits {
    pub max_source_bytes: usize,
    pub max_lines: usize,
    pub max_label_length: usize,
    pub max_nodes: usize,
    pub max_edges: usize,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_source_bytes: 50_000,
            max_lines: 1_000,
            max_label_length: 200,
            max_nodes: 200,
            max_edges: 400,
        }
    }
}

impl From<&ValidationSettings> for ValidationLimits {
    fn from(settings: &ValidationSettings) -> Self {
        Self {
            max_source_bytes: settings.max_source_bytes,
            max_lines: settings.max_lines,
            max_label_length: settings.max_label_length,
            max_nodes: settings.max_nodes,
            max_edges: settings.max_edges,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagram_type: Option<DiagramType>,
    pub line_count: usize,
    pub byte_len: usize,
    pub node_count: usize,
    pub edge_count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub security_findings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Normalized source; present only when `errors` is empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sanitized_input: Option<String>,
    pub metadata: ValidationMetadata,
}

impl ValidationResult {
    fn finish(
        errors: Vec<String>,
        warnings: Vec<String>,
        source: String,
        metadata: ValidationMetadata,
    ) -> Self {
        let is_valid = errors.is_empty();
        Self {
            is_valid,
            errors,
            warnings,
            sanitized_input: is_valid.then_some(source),
            metadata,
        }
    }

    /// Classifier input describing why the source was rejected.
    pub fn failure(&self) -> ValidationFailure {
        ValidationFailure {
            errors: self.errors.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationFailure {
    pub errors: Vec<String>,
}

impl Classify for ValidationFailure {
    fn type_name(&self) -> &'static str {
        "ValidationError"
    }

    fn message(&self) -> String {
        format!("source rejected: {}", self.errors.join("; "))
    }

    fn category_hint(&self) -> Option<ErrorCategory> {
        Some(ErrorCategory::Validation)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InputValidator {
    limits: ValidationLimits,
}

impl InputValidator {
    pub fn new(limits: ValidationLimits) -> Self {
        Self { limits }
    }

    /// Runs every check in order; `renderer` enables compatibility checks.
    pub fn validate(
        &self,
        source: &str,
        format: OutputFormat,
        renderer: Option<&RendererDescriptor>,
        strict: bool,
    ) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut text = normalize(source);
        let mut metadata = ValidationMetadata {
            line_count: text.lines().count(),
            byte_len: text.len(),
            ..ValidationMetadata::default()
        };

        if text.trim().is_empty() {
            errors.push("source is empty".to_string());
            return ValidationResult::finish(errors, warnings, text, metadata);
        }

        if metadata.byte_len > self.limits.max_source_bytes {
            errors.push(format!(
                "source is {} bytes, limit is {}",
                metadata.byte_len, self.limits.max_source_bytes
            ));
        }
        if metadata.line_count > self.limits.max_lines {
            errors.push(format!(
                "source has {} lines, limit is {}",
                metadata.line_count, self.limits.max_lines
            ));
        }
        if !errors.is_empty() {
            return ValidationResult::finish(errors, warnings, text, metadata);
        }

        let findings = security::scan(&text);
        if !findings.is_empty() {
            metadata.security_findings = findings.iter().map(|f| f.rule.to_string()).collect();
            for finding in &findings {
                let message = format!(
                    "security: {} near `{}`",
                    finding.description, finding.excerpt
                );
                if strict {
                    errors.push(message);
                } else {
                    warnings.push(format!("{message} (removed)"));
                }
            }
            if !strict {
                match security::strip(&text) {
                    Some(stripped) => text = stripped,
                    None => errors.push(format!(
                        "security: dangerous constructs remain after {} cleaning passes",
                        security::MAX_STRIP_PASSES
                    )),
                }
            }
        }

        let detected = diagram::detect(&text);
        metadata.diagram_type = detected;
        if detected.is_none() {
            let message = "diagram type could not be detected from the first statement".to_string();
            if strict {
                errors.push(message);
            } else {
                warnings.push(message);
            }
        }

        if let Some(descriptor) = renderer {
            if !descriptor.supports_format(format) {
                errors.push(format!(
                    "renderer `{}` does not produce {format}",
                    descriptor.name
                ));
            }
            if let Some(kind) = detected
                && !descriptor.supports_diagram(kind)
            {
                errors.push(format!(
                    "renderer `{}` does not handle {kind} diagrams",
                    descriptor.name
                ));
            }
        }

        if let Some(kind) = detected {
            if kind.uses_bracket_shapes()
                && let Some(problem) = syntax::check_brackets(&text)
            {
                errors.push(format!("unbalanced brackets: {problem}"));
            }
            if kind == DiagramType::Flowchart {
                errors.extend(syntax::dangling_connectors(&text));
            }
        }

        let complexity = syntax::measure(
            &text,
            detected.is_some_and(DiagramType::uses_bracket_shapes),
        );
        metadata.node_count = complexity.nodes;
        metadata.edge_count = complexity.edges;
        if complexity.nodes > self.limits.max_nodes {
            warnings.push(format!(
                "diagram has {} nodes; more than {} may render slowly",
                complexity.nodes, self.limits.max_nodes
            ));
        }
        if complexity.edges > self.limits.max_edges {
            warnings.push(format!(
                "diagram has {} edges; more than {} may render slowly",
                complexity.edges, self.limits.max_edges
            ));
        }
        if complexity.longest_label > self.limits.max_label_length {
            warnings.push(format!(
                "longest label is {} characters; labels over {} may be clipped",
                complexity.longest_label, self.limits.max_label_length
            ));
        }

        debug!(
            target = "application::validation",
            op = "validate",
            strict,
            errors = errors.len(),
            warnings = warnings.len(),
            diagram_type = detected.map(DiagramType::as_str).unwrap_or("unknown"),
            "Source validated"
        );

        ValidationResult::finish(errors, warnings, text, metadata)
    }
}

/// Strips a BOM, converts line endings to LF, trims trailing whitespace on
/// each line and drops trailing blank lines.
pub fn normalize(source: &str) -> String {
    let source = source.strip_prefix('\u{feff}').unwrap_or(source);
    let unified = source.replace("\r\n", "\n").replace('\r', "\n");
    let mut lines: Vec<&str> = unified.lines().map(str::trim_end).collect();
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Capability;

    fn validator() -> InputValidator {
        InputValidator::default()
    }

    #[test]
    fn empty_source_is_rejected() {
        let result = validator().validate(" \n\t\n", OutputFormat::Svg, None, false);
        assert!(!result.is_valid);
        assert_eq!(result.errors, vec!["source is empty"]);
        assert!(result.sanitized_input.is_none());
    }

    #[test]
    fn normalizes_line_endings_and_whitespace() {
        let result = validator().validate(
            "\u{feff}flowchart TD  \r\n  A --> B \r\n\r\n",
            OutputFormat::Svg,
            None,
            true,
        );
        assert!(result.is_valid, "{:?}", result.errors);
        assert_eq!(result.sanitized_input.as_deref(), Some("flowchart TD\n  A --> B"));
        assert_eq!(result.metadata.diagram_type, Some(DiagramType::Flowchart));
    }

    #[test]
    fn size_limits_are_errors() {
        let limits = ValidationLimits {
            max_lines: 2,
            ..ValidationLimits::default()
        };
        let result = InputValidator::new(limits).validate(
            "flowchart TD\n A --> B\n B --> C",
            OutputFormat::Svg,
            None,
            false,
        );
        assert!(!result.is_valid);
        assert!(result.errors[0].contains("3 lines"));
    }

    #[test]
    fn strict_mode_rejects_scripts() {
        let source = "flowchart TD\n A[<script>alert(1)</script>] --> B";
        let result = validator().validate(source, OutputFormat::Svg, None, true);
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.starts_with("security:")));
        assert_eq!(result.metadata.security_findings, vec!["script-block"]);
    }

    #[test]
    fn lenient_mode_warns_and_strips() {
        let source = "flowchart TD\n A[<script>alert(1)</script>Label] --> B";
        let result = validator().validate(source, OutputFormat::Svg, None, false);
        assert!(result.is_valid, "{:?}", result.errors);
        assert!(result.warnings.iter().any(|w| w.contains("removed")));
        let sanitized = result.sanitized_input.unwrap();
        assert!(!sanitized.contains("<script"));
        assert!(sanitized.contains("A[Label]"));
    }

    #[test]
    fn lenient_mode_strips_reassembled_scripts() {
        let source = "flowchart TD\n A[\"<scr<script></script>ipt>alert</script>\"] --> B";
        let result = validator().validate(source, OutputFormat::Svg, None, false);
        assert!(result.is_valid, "{:?}", result.errors);
        let sanitized = result.sanitized_input.unwrap();
        assert!(security::scan(&sanitized).is_empty(), "{sanitized}");
        assert!(!sanitized.contains("<script"));
    }

    #[test]
    fn lenient_mode_rejects_unremovable_nesting() {
        let depth = security::MAX_STRIP_PASSES + 2;
        let source = format!(
            "flowchart TD\n A[\"{}<script>{}\"] --> B",
            "<scr".repeat(depth),
            "ipt>".repeat(depth)
        );
        let result = validator().validate(&source, OutputFormat::Svg, None, false);
        assert!(!result.is_valid);
        assert!(result.sanitized_input.is_none());
        assert!(result.errors.iter().any(|e| e.contains("cleaning passes")));
    }

    #[test]
    fn strict_mode_rejects_any_inline_handler() {
        let result = validator().validate(
            "flowchart TD\n A[\"<b onfocusin=x>t</b>\"]",
            OutputFormat::Svg,
            None,
            true,
        );
        assert!(!result.is_valid);
        assert_eq!(result.metadata.security_findings, vec!["event-handler"]);
    }

    #[test]
    fn unknown_type_is_warning_unless_strict() {
        let lenient = validator().validate("digraph { a -> b }", OutputFormat::Svg, None, false);
        assert!(lenient.is_valid);
        assert_eq!(lenient.warnings.len(), 1);

        let strict = validator().validate("digraph { a -> b }", OutputFormat::Svg, None, true);
        assert!(!strict.is_valid);
    }

    #[test]
    fn renderer_compatibility_is_checked() {
        let flow_only = RendererDescriptor::new("graphviz", [OutputFormat::Svg, OutputFormat::Png])
            .with_capabilities([Capability::LocalRendering])
            .with_diagram_types([DiagramType::Flowchart]);

        let sequence = validator().validate(
            "sequenceDiagram\n A->>B: hi",
            OutputFormat::Svg,
            Some(&flow_only),
            false,
        );
        assert!(sequence.errors.iter().any(|e| e.contains("sequence diagrams")));

        let pdf = validator().validate(
            "flowchart TD\n A --> B",
            OutputFormat::Pdf,
            Some(&flow_only),
            false,
        );
        assert!(pdf.errors.iter().any(|e| e.contains("does not produce pdf")));
    }

    #[test]
    fn syntax_errors_block_flowcharts() {
        let result = validator().validate(
            "flowchart TD\n A[Start --> B\n B -->",
            OutputFormat::Svg,
            None,
            false,
        );
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.starts_with("unbalanced brackets")));
        assert!(result.errors.iter().any(|e| e.contains("no target")));
    }

    #[test]
    fn complexity_only_warns() {
        let limits = ValidationLimits {
            max_nodes: 2,
            max_label_length: 3,
            ..ValidationLimits::default()
        };
        let result = InputValidator::new(limits).validate(
            "flowchart LR\n A[Alpha] --> B --> C",
            OutputFormat::Svg,
            None,
            true,
        );
        assert!(result.is_valid);
        assert_eq!(result.metadata.node_count, 3);
        assert_eq!(result.metadata.edge_count, 2);
        assert_eq!(result.warnings.len(), 2);
    }
}
