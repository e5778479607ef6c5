//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;
pub mod renderers;
#[cfg(test)]
mod tests;

use std::{collections::BTreeMap, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

pub use cli::{
    CacheArgs, CacheCommand, CliArgs, Command, LogOverrides, RenderArgs, RenderersArgs,
    ValidateArgs,
};

use crate::domain::RendererSettings;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "diagram-relay";
const ENV_PREFIX: &str = "DIAGRAM_RELAY";
const DEFAULT_MAX_FALLBACKS: u64 = 3;
const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_SOURCE_BYTES: u64 = 50_000;
const DEFAULT_MAX_LINES: u64 = 1_000;
const DEFAULT_MAX_LABEL_LENGTH: u64 = 200;
const DEFAULT_MAX_NODES: u64 = 200;
const DEFAULT_MAX_EDGES: u64 = 400;
const DEFAULT_CACHE_TTL_SECS: u64 = 3_600;
const DEFAULT_CACHE_CAPACITY: u64 = 256;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub render: RenderSettings,
    pub validation: ValidationSettings,
    pub cache: CacheSettings,
    /// Raw `[renderers.<name>]` sections; schema checks happen at discovery.
    pub renderers: BTreeMap<String, RendererSettings>,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub max_fallbacks: usize,
    pub attempt_timeout: Duration,
    pub strict_validation: bool,
    pub strict_sanitization: bool,
}

#[derive(Debug, Clone)]
pub struct ValidationSettings {
    pub max_source_bytes: usize,
    pub max_lines: usize,
    pub max_label_length: usize,
    pub max_nodes: usize,
    pub max_edges: usize,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl_seconds: u64,
    pub capacity: usize,
    pub directory: Option<PathBuf>,
    pub revalidate_hits: bool,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_log_overrides(&cli.logging);
    match &cli.command {
        Command::Render(args) => raw.apply_render_overrides(args),
        Command::Validate(args) => raw.apply_validate_overrides(args),
        Command::Renderers(_) | Command::Cache(_) => {}
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    render: RawRenderSettings,
    validation: RawValidationSettings,
    cache: RawCacheSettings,
    renderers: BTreeMap<String, BTreeMap<String, Value>>,
}

impl RawSettings {
    fn apply_log_overrides(&mut self, overrides: &LogOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }

    fn apply_render_overrides(&mut self, args: &RenderArgs) {
        if args.strict {
            self.render.strict_validation = Some(true);
            self.render.strict_sanitization = Some(true);
        }
        if args.no_cache {
            self.cache.enabled = Some(false);
        }
    }

    fn apply_validate_overrides(&mut self, args: &ValidateArgs) {
        if args.strict {
            self.render.strict_validation = Some(true);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            render,
            validation,
            cache,
            renderers,
        } = raw;

        let logging = build_logging_settings(logging)?;
        let render = build_render_settings(render)?;
        let validation = build_validation_settings(validation)?;
        let cache = build_cache_settings(cache)?;
        let renderers = renderers::flatten_sections(renderers)?;

        Ok(Self {
            logging,
            render,
            validation,
            cache,
            renderers,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str())
            .map_err(|err| LoadError::invalid("logging.level", format!("failed to parse: {err}")))?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let max_fallbacks = non_zero_usize(
        render.max_fallbacks.unwrap_or(DEFAULT_MAX_FALLBACKS),
        "render.max_fallbacks",
    )?;
    let timeout_secs = render
        .attempt_timeout_seconds
        .unwrap_or(DEFAULT_ATTEMPT_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "render.attempt_timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(RenderSettings {
        max_fallbacks,
        attempt_timeout: Duration::from_secs(timeout_secs),
        strict_validation: render.strict_validation.unwrap_or(true),
        strict_sanitization: render.strict_sanitization.unwrap_or(false),
    })
}

fn build_validation_settings(
    validation: RawValidationSettings,
) -> Result<ValidationSettings, LoadError> {
    Ok(ValidationSettings {
        max_source_bytes: non_zero_usize(
            validation.max_source_bytes.unwrap_or(DEFAULT_MAX_SOURCE_BYTES),
            "validation.max_source_bytes",
        )?,
        max_lines: non_zero_usize(
            validation.max_lines.unwrap_or(DEFAULT_MAX_LINES),
            "validation.max_lines",
        )?,
        max_label_length: non_zero_usize(
            validation.max_label_length.unwrap_or(DEFAULT_MAX_LABEL_LENGTH),
            "validation.max_label_length",
        )?,
        max_nodes: non_zero_usize(
            validation.max_nodes.unwrap_or(DEFAULT_MAX_NODES),
            "validation.max_nodes",
        )?,
        max_edges: non_zero_usize(
            validation.max_edges.unwrap_or(DEFAULT_MAX_EDGES),
            "validation.max_edges",
        )?,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let ttl_seconds = cache.ttl_seconds.unwrap_or(DEFAULT_CACHE_TTL_SECS);
    if ttl_seconds == 0 {
        return Err(LoadError::invalid("cache.ttl_seconds", "must be greater than zero"));
    }
    let capacity = non_zero_usize(
        cache.capacity.unwrap_or(DEFAULT_CACHE_CAPACITY),
        "cache.capacity",
    )?;
    let directory = cache
        .directory
        .filter(|dir| !dir.as_os_str().is_empty());

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        ttl_seconds,
        capacity,
        directory,
        revalidate_hits: cache.revalidate_hits.unwrap_or(true),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    max_fallbacks: Option<u64>,
    attempt_timeout_seconds: Option<u64>,
    strict_validation: Option<bool>,
    strict_sanitization: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawValidationSettings {
    max_source_bytes: Option<u64>,
    max_lines: Option<u64>,
    max_label_length: Option<u64>,
    max_nodes: Option<u64>,
    max_edges: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    ttl_seconds: Option<u64>,
    capacity: Option<u64>,
    directory: Option<PathBuf>,
    revalidate_hits: Option<bool>,
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<usize, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    usize::try_from(value).map_err(|_| LoadError::invalid(key, "value exceeds supported range"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
