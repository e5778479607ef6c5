//! The capability contract every rendering backend implements.

use std::{io, time::Duration};

use thiserror::Error;

use crate::domain::{DiagramType, OutputFormat, RenderOutcome, RenderRequest, RendererDescriptor};

use super::classify::{Classify, ErrorCategory};

/// A rendering backend.
///
/// `render` must report every failure through [`RendererError`] and must not
/// touch registry state. Declared capabilities are honoured, e.g. a renderer
/// advertising `theme-support` forwards the request theme to its backend.
pub trait Renderer: Send + Sync {
    fn describe(&self) -> RendererDescriptor;

    fn render(&self, request: &RenderRequest) -> Result<RenderOutcome, RendererError>;

    /// Cheap liveness probe: binary on PATH, service reachable.
    fn is_available(&self) -> bool;

    /// Releases held resources. Called once per instance.
    fn cleanup(&self) {}
}

/// Produces renderer instances for the registry.
pub trait RendererFactory: Send + Sync {
    fn descriptor(&self) -> RendererDescriptor;

    fn create(&self) -> Result<Box<dyn Renderer>, RendererError>;
}

/// Factory backed by a closure.
pub struct FnFactory<F> {
    descriptor: RendererDescriptor,
    build: F,
}

impl<F> FnFactory<F>
where
    F: Fn() -> Result<Box<dyn Renderer>, RendererError> + Send + Sync,
{
    pub fn new(descriptor: RendererDescriptor, build: F) -> Self {
        Self { descriptor, build }
    }
}

impl<F> RendererFactory for FnFactory<F>
where
    F: Fn() -> Result<Box<dyn Renderer>, RendererError> + Send + Sync,
{
    fn descriptor(&self) -> RendererDescriptor {
        self.descriptor.clone()
    }

    fn create(&self) -> Result<Box<dyn Renderer>, RendererError> {
        (self.build)()
    }
}

#[derive(Debug, Error)]
pub enum RendererError {
    #[error("command `{command}` not found")]
    CommandNotFound { command: String },
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("process exited with status {exit_code:?}: {stderr}")]
    ProcessFailed {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("render attempt timed out after {}s", .after.as_secs())]
    Timeout { after: Duration },
    #[error("network failure: {message}")]
    Network { message: String },
    #[error("service answered HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("unusable output: {reason}")]
    MalformedOutput { reason: String },
    #[error("diagram syntax error: {message}")]
    Syntax { message: String },
    #[error("renderer `{renderer}` does not support {format} output")]
    UnsupportedFormat {
        renderer: String,
        format: OutputFormat,
    },
    #[error("renderer `{renderer}` cannot draw {diagram} diagrams")]
    UnsupportedDiagram {
        renderer: String,
        diagram: DiagramType,
    },
    #[error("renderer config error: {message}")]
    Configuration { message: String },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("renderer `{renderer}` is unavailable")]
    Unavailable { renderer: String },
}

impl RendererError {
    pub fn command_not_found(command: impl Into<String>) -> Self {
        Self::CommandNotFound {
            command: command.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedOutput {
            reason: reason.into(),
        }
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::Syntax {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn unavailable(renderer: impl Into<String>) -> Self {
        Self::Unavailable {
            renderer: renderer.into(),
        }
    }
}

impl Classify for RendererError {
    fn type_name(&self) -> &'static str {
        match self {
            RendererError::CommandNotFound { .. } => "CommandNotFound",
            RendererError::Spawn { .. } => "SpawnError",
            RendererError::ProcessFailed { .. } => "ProcessError",
            RendererError::Timeout { .. } => "TimeoutError",
            RendererError::Network { .. } => "ConnectionError",
            RendererError::HttpStatus { .. } => "HttpError",
            RendererError::MalformedOutput { .. } => "MalformedOutput",
            RendererError::Syntax { .. } => "SyntaxError",
            RendererError::UnsupportedFormat { .. } => "UnsupportedFormat",
            RendererError::UnsupportedDiagram { .. } => "UnsupportedDiagram",
            RendererError::Configuration { .. } => "ConfigError",
            RendererError::Io(_) => "IoError",
            RendererError::Unavailable { .. } => "UnavailableError",
        }
    }

    fn message(&self) -> String {
        self.to_string()
    }

    fn category_hint(&self) -> Option<ErrorCategory> {
        Some(match self {
            RendererError::CommandNotFound { .. } | RendererError::Unavailable { .. } => {
                ErrorCategory::Dependency
            }
            RendererError::Spawn { .. } | RendererError::Io(_) => ErrorCategory::System,
            RendererError::Timeout { .. } => ErrorCategory::Timeout,
            RendererError::Network { .. } => ErrorCategory::Network,
            RendererError::HttpStatus { status, .. } if *status >= 500 => ErrorCategory::Network,
            RendererError::HttpStatus { .. }
            | RendererError::ProcessFailed { .. }
            | RendererError::MalformedOutput { .. } => ErrorCategory::Rendering,
            RendererError::Syntax { .. } => ErrorCategory::Syntax,
            RendererError::UnsupportedFormat { .. }
            | RendererError::UnsupportedDiagram { .. }
            | RendererError::Configuration { .. } => ErrorCategory::Configuration,
        })
    }
}
