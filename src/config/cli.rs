use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

use crate::domain::{Capability, OutputFormat};

/// Command-line arguments for the diagram-relay binary.
#[derive(Debug, Parser)]
#[command(
    name = "diagram-relay",
    version,
    about = "Render diagram source through a prioritized chain of renderers"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "DIAGRAM_RELAY_CONFIG_FILE",
        value_name = "PATH",
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub logging: LogOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Render a diagram, falling back across renderers on failure.
    Render(RenderArgs),
    /// Validate diagram source without rendering it.
    Validate(ValidateArgs),
    /// List registered renderers.
    Renderers(RenderersArgs),
    /// Result cache maintenance.
    Cache(CacheArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct LogOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    /// Diagram source file, or `-` for stdin.
    #[arg(value_name = "INPUT", value_hint = ValueHint::FilePath)]
    pub input: PathBuf,

    /// Output format.
    #[arg(long, short = 'f', default_value = "svg")]
    pub format: OutputFormat,

    /// Write the rendered document here instead of stdout.
    #[arg(long, short = 'o', value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,

    /// Try this renderer first.
    #[arg(long, value_name = "NAME")]
    pub renderer: Option<String>,

    /// Named theme forwarded to theme-aware renderers.
    #[arg(long, value_name = "NAME")]
    pub theme: Option<String>,

    /// Capability every candidate renderer must declare; repeatable.
    #[arg(long = "require", value_name = "CAP")]
    pub require: Vec<Capability>,

    /// Strict validation and allow-list sanitization.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub strict: bool,

    /// Bypass the result cache for this run.
    #[arg(long = "no-cache", action = clap::ArgAction::SetTrue)]
    pub no_cache: bool,
}

#[derive(Debug, Args, Clone)]
pub struct ValidateArgs {
    /// Diagram source file, or `-` for stdin.
    #[arg(value_name = "INPUT", value_hint = ValueHint::FilePath)]
    pub input: PathBuf,

    /// Output format the source would be rendered to.
    #[arg(long, short = 'f', default_value = "svg")]
    pub format: OutputFormat,

    /// Also check compatibility with this renderer.
    #[arg(long, value_name = "NAME")]
    pub renderer: Option<String>,

    /// Reject what lenient mode only warns about.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub strict: bool,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RenderersArgs {
    /// Only renderers producing this format.
    #[arg(long, short = 'f')]
    pub format: Option<OutputFormat>,

    /// Only renderers whose availability probe passes.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub available: bool,
}

#[derive(Debug, Args, Clone)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Debug, Subcommand, Clone)]
pub enum CacheCommand {
    /// Remove every persisted cache entry.
    Purge,
}
