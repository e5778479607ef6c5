//! Content-safety pipeline for renderer output.
//!
//! Markup passes structure inspection, a risk scan, sanitization (streaming
//! rewrite, plus an allow-list in strict mode), tokenizer-based repair and a
//! final structure and risk check. Binary payloads only get a signature check.

pub mod repair;
pub mod sanitize;
pub mod scan;
pub mod structure;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::{OutputFormat, RenderContent};

use super::renderer::RendererError;
use scan::{Risk, ScanReport};
use structure::StructureReport;

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";
const PDF_SIGNATURE: &[u8] = b"%PDF-";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SafetyError {
    #[error("{reason}")]
    Unusable { reason: String },
    #[error("high-risk content remains after cleaning: {patterns}")]
    Unsafe { patterns: String },
    #[error("markup rewrite failed: {message}")]
    Rewrite { message: String },
    #[error("{format} payload does not start with the expected signature")]
    Signature { format: OutputFormat },
    #[error("{format} output is not UTF-8 text")]
    NotText { format: OutputFormat },
}

impl From<SafetyError> for RendererError {
    fn from(err: SafetyError) -> Self {
        RendererError::malformed(err.to_string())
    }
}

/// What the pipeline observed while cleaning one payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SafetyReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_risk: Option<Risk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_risk: Option<Risk>,
    pub element_count: usize,
    pub max_depth: usize,
    pub sanitized: bool,
    pub repairs: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SafeOutput {
    pub content: RenderContent,
    pub report: SafetyReport,
}

pub struct SafetyPipeline {
    strict: bool,
    allow_list: ammonia::Builder<'static>,
}

impl std::fmt::Debug for SafetyPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafetyPipeline")
            .field("strict", &self.strict)
            .finish_non_exhaustive()
    }
}

impl SafetyPipeline {
    pub fn new(strict: bool) -> Self {
        Self {
            strict,
            allow_list: sanitize::svg_allow_list(),
        }
    }

    /// Cleans renderer output for `format`.
    pub fn process(
        &self,
        content: RenderContent,
        format: OutputFormat,
    ) -> Result<SafeOutput, SafetyError> {
        if !format.is_markup() {
            check_signature(content.as_bytes(), format)?;
            return Ok(SafeOutput {
                content,
                report: SafetyReport::default(),
            });
        }

        let markup = into_text(content, format)?;
        let (markup, report) = self.process_markup(&markup)?;
        Ok(SafeOutput {
            content: RenderContent::Text(markup),
            report,
        })
    }

    /// Sanitizes a markup string on its own, without structural gating.
    pub fn sanitize(&self, markup: &str) -> Result<String, SafetyError> {
        let streamed =
            sanitize::strip_dangerous(markup, self.strict).map_err(|err| SafetyError::Rewrite {
                message: err.to_string(),
            })?;
        if self.strict {
            Ok(self.allow_list.clean(&streamed).to_string())
        } else {
            Ok(streamed)
        }
    }

    /// Re-checks content that was cleaned earlier, such as a cache hit.
    pub fn revalidate(
        &self,
        content: &RenderContent,
        format: OutputFormat,
    ) -> Result<(), SafetyError> {
        if !format.is_markup() {
            return check_signature(content.as_bytes(), format);
        }
        let Some(markup) = content.as_text() else {
            return Err(SafetyError::NotText { format });
        };
        let structure = structure::inspect(markup);
        ensure_usable(&structure)?;
        ensure_safe(&scan::scan(markup))
    }

    fn process_markup(&self, markup: &str) -> Result<(String, SafetyReport), SafetyError> {
        let initial = structure::inspect(markup);
        if !initial.has_root {
            return Err(SafetyError::Unusable {
                reason: "no <svg> root element in renderer output".to_string(),
            });
        }
        let initial_scan = scan::scan(markup);
        if !initial_scan.findings.is_empty() {
            debug!(
                target = "application::safety",
                op = "scan",
                risk = initial_scan.risk.as_str(),
                findings = initial_scan.findings.len(),
                "Renderer output carries risky constructs"
            );
        }

        let sanitized = self.sanitize(markup)?;
        let repaired = repair::repair(&sanitized);

        let final_structure = structure::inspect(&repaired.markup);
        ensure_usable(&final_structure)?;
        let final_scan = scan::scan(&repaired.markup);
        if let Err(err) = ensure_safe(&final_scan) {
            warn!(
                target = "application::safety",
                op = "process",
                result = "rejected",
                error = %err,
                "Cleaned output still unsafe"
            );
            return Err(err);
        }

        let mut warnings = final_structure.warnings.clone();
        warnings.extend(
            final_scan
                .patterns_at(Risk::Medium)
                .into_iter()
                .map(|pattern| format!("output contains {pattern}")),
        );

        let report = SafetyReport {
            initial_risk: Some(initial_scan.risk),
            final_risk: Some(final_scan.risk),
            element_count: final_structure.element_count,
            max_depth: final_structure.max_depth,
            sanitized: sanitized != markup,
            repairs: repaired.fixes,
            warnings,
        };
        Ok((repaired.markup, report))
    }
}

fn ensure_usable(report: &StructureReport) -> Result<(), SafetyError> {
    if report.is_usable() {
        Ok(())
    } else {
        Err(SafetyError::Unusable {
            reason: report.errors.join("; "),
        })
    }
}

fn ensure_safe(report: &ScanReport) -> Result<(), SafetyError> {
    if report.safe_to_use {
        Ok(())
    } else {
        Err(SafetyError::Unsafe {
            patterns: report.patterns_at(Risk::High).join(", "),
        })
    }
}

fn into_text(content: RenderContent, format: OutputFormat) -> Result<String, SafetyError> {
    match content {
        RenderContent::Text(text) => Ok(text),
        RenderContent::Binary(bytes) => {
            String::from_utf8(bytes).map_err(|_| SafetyError::NotText { format })
        }
    }
}

fn check_signature(bytes: &[u8], format: OutputFormat) -> Result<(), SafetyError> {
    let signature = match format {
        OutputFormat::Png => PNG_SIGNATURE,
        OutputFormat::Pdf => PDF_SIGNATURE,
        OutputFormat::Svg => return Ok(()),
    };
    if bytes.starts_with(signature) {
        Ok(())
    } else {
        Err(SafetyError::Signature { format })
    }
}
