use std::{error::Error as StdError, io, path::PathBuf};

use thiserror::Error;

use crate::{
    application::{orchestrator::RenderFailure, registry::RegistryError},
    cache::CacheError,
    config::LoadError,
    infra::error::InfraError,
};

/// An error flattened into its message chain for logging.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self { source, messages }
    }

    /// Messages joined outermost first.
    pub fn chain(&self) -> String {
        self.messages.join(": ")
    }
}

/// Top-level failure of a binary command.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("result cache unavailable")]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Render(Box<RenderFailure>),
    #[error("cannot read input `{}`", .path.display())]
    Input {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot write output `{}`", .path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("diagram source is invalid: {0}")]
    InvalidSource(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl From<RenderFailure> for AppError {
    fn from(failure: RenderFailure) -> Self {
        Self::Render(Box::new(failure))
    }
}

impl AppError {
    pub fn invalid_source(message: impl Into<String>) -> Self {
        Self::InvalidSource(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport::from_error("application::error::AppError", self)
    }
}
