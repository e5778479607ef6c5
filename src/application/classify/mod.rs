//! Turns raw failures into categorized, severity-ranked error records.

mod suggestions;

use std::{fmt, time::Duration};

use serde::{Serialize, Serializer};
use tracing::debug;

use crate::domain::OutputFormat;

pub use suggestions::suggestions_for;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Configuration,
    Dependency,
    Network,
    Syntax,
    Rendering,
    System,
    Timeout,
    Validation,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Dependency => "dependency",
            ErrorCategory::Network => "network",
            ErrorCategory::Syntax => "syntax",
            ErrorCategory::Rendering => "rendering",
            ErrorCategory::System => "system",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Validation => "validation",
        }
    }

    fn code_prefix(self) -> &'static str {
        match self {
            ErrorCategory::Configuration => "CFG",
            ErrorCategory::Dependency => "DEP",
            ErrorCategory::Network => "NET",
            ErrorCategory::Syntax => "SYN",
            ErrorCategory::Rendering => "RND",
            ErrorCategory::System => "SYS",
            ErrorCategory::Timeout => "TMO",
            ErrorCategory::Validation => "VAL",
        }
    }

    fn base_severity(self) -> Severity {
        match self {
            ErrorCategory::Configuration
            | ErrorCategory::Syntax
            | ErrorCategory::Validation
            | ErrorCategory::System => Severity::High,
            ErrorCategory::Network
            | ErrorCategory::Timeout
            | ErrorCategory::Dependency
            | ErrorCategory::Rendering => Severity::Medium,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything the classifier can inspect.
pub trait Classify {
    /// Stable type identifier, e.g. `ConnectionError`.
    fn type_name(&self) -> &'static str;

    fn message(&self) -> String;

    /// Category used when no text pattern matches.
    fn category_hint(&self) -> Option<ErrorCategory> {
        None
    }
}

/// A free-form failure with an explicit type name.
#[derive(Debug, Clone)]
pub struct PlainFailure {
    pub type_name: &'static str,
    pub message: String,
    pub hint: Option<ErrorCategory>,
}

impl PlainFailure {
    pub fn new(type_name: &'static str, message: impl Into<String>) -> Self {
        Self {
            type_name,
            message: message.into(),
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: ErrorCategory) -> Self {
        self.hint = Some(hint);
        self
    }
}

impl Classify for PlainFailure {
    fn type_name(&self) -> &'static str {
        self.type_name
    }

    fn message(&self) -> String {
        self.message.clone()
    }

    fn category_hint(&self) -> Option<ErrorCategory> {
        self.hint
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renderer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<OutputFormat>,
    pub attempt_number: usize,
    pub total_attempts: usize,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_renderer(renderer: impl Into<String>, format: OutputFormat) -> Self {
        Self {
            renderer: Some(renderer.into()),
            format: Some(format),
            ..Self::default()
        }
    }

    pub fn attempt(mut self, attempt_number: usize, total_attempts: usize) -> Self {
        self.attempt_number = attempt_number;
        self.total_attempts = total_attempts;
        self
    }

    pub fn elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    pub fn is_terminal_attempt(&self) -> bool {
        self.total_attempts > 0 && self.attempt_number == self.total_attempts
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub code: String,
    pub context: ErrorContext,
    pub suggestions: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub related: Vec<ErrorRecord>,
}

impl ErrorRecord {
    pub fn with_related(mut self, related: Vec<ErrorRecord>) -> Self {
        self.related = related;
        self
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Ordered substring table; the first row with a matching needle wins.
const PATTERNS: &[(&[&str], ErrorCategory)] = &[
    (&["validation"], ErrorCategory::Validation),
    (&["timeout", "timed out"], ErrorCategory::Timeout),
    (
        &[
            "connection",
            "network",
            "dns",
            "ssl",
            "tls",
            "refused",
            "unreachable",
        ],
        ErrorCategory::Network,
    ),
    (
        &["import", "module", "not found", "no such file"],
        ErrorCategory::Dependency,
    ),
    (&["syntax", "parse", "invalid"], ErrorCategory::Syntax),
    (&["config", "setting"], ErrorCategory::Configuration),
    (
        &["permission", "access", "memory", "disk"],
        ErrorCategory::System,
    ),
];

const CRITICAL_MARKERS: &[&str] = &["out of memory", "no space left", "disk full"];

/// Classifies `error` in the supplied context.
pub fn classify(error: &dyn Classify, context: ErrorContext) -> ErrorRecord {
    let type_name = error.type_name();
    let message = error.message();
    let haystack = format!("{type_name} {message}").to_lowercase();

    let category = PATTERNS
        .iter()
        .find(|(needles, _)| needles.iter().any(|needle| haystack.contains(needle)))
        .map(|(_, category)| *category)
        .or_else(|| error.category_hint())
        .unwrap_or(ErrorCategory::System);

    let mut severity = category.base_severity();
    if CRITICAL_MARKERS.iter().any(|marker| haystack.contains(marker)) {
        severity = Severity::Critical;
    }
    if context.is_terminal_attempt() {
        severity = severity.max(Severity::High);
    }

    let code = error_code(category, type_name);
    let suggestions = suggestions_for(category, context.renderer.as_deref());

    debug!(
        target = "application::classify",
        op = "classify",
        category = category.as_str(),
        severity = severity.as_str(),
        code = %code,
        renderer = context.renderer.as_deref().unwrap_or(""),
        attempt_number = context.attempt_number,
        total_attempts = context.total_attempts,
        "Classified failure"
    );

    ErrorRecord {
        message: if message.trim().is_empty() {
            type_name.to_string()
        } else {
            message
        },
        category,
        severity,
        code,
        context,
        suggestions,
        related: Vec::new(),
    }
}

/// `{CATEGORY}-{TYPE}` where TYPE is the first four alphanumerics of the type name.
pub fn error_code(category: ErrorCategory, type_name: &str) -> String {
    let mut prefix: String = type_name
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(4)
        .collect::<String>()
        .to_ascii_uppercase();
    if prefix.is_empty() {
        prefix.push_str("UNKN");
    }
    format!("{}-{prefix}", category.code_prefix())
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}
