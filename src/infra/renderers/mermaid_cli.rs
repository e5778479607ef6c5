use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    process::Command,
    sync::Mutex,
    time::{Duration, Instant},
};

use tempfile::{NamedTempFile, TempDir};
use tracing::{info, warn};

use crate::{
    application::renderer::{Renderer, RendererError},
    cache::lock::mutex_lock,
    domain::{
        Capability, ConfigSchema, FieldKind, OutputFormat, RenderOutcome, RenderRequest,
        RendererDescriptor, RendererSettings, Theme,
    },
    infra::process,
};

use super::{attempt_timeout, decode_output, mermaid_config, non_empty, syntax_from_stderr};

pub const NAME: &str = "mermaid-cli";
const SOURCE: &str = "infra::renderers::mermaid_cli";

pub fn descriptor() -> RendererDescriptor {
    RendererDescriptor::new(NAME, OutputFormat::ALL)
        .with_description("Local Mermaid CLI (mmdc)")
        .with_capabilities([
            Capability::LocalRendering,
            Capability::ThemeSupport,
            Capability::CustomConfig,
        ])
        .with_priority(1)
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_dependencies(["mmdc"])
        .with_config_schema(
            ConfigSchema::new()
                .field("cli_path", FieldKind::Path, "mmdc executable name or path", Some("mmdc"))
                .field("timeout_seconds", FieldKind::Integer, "Per-attempt timeout", None)
                .field("background", FieldKind::String, "Value for --backgroundColor", None)
                .field("scale", FieldKind::Integer, "Value for --scale", None)
                .field(
                    "puppeteer_config",
                    FieldKind::Path,
                    "Value for --puppeteerConfigFile",
                    None,
                ),
        )
}

/// Renders through `mmdc`, exchanging source and output via temp files in a
/// private work directory that lives until [`Renderer::cleanup`].
#[derive(Debug)]
pub struct MermaidCliRenderer {
    cli_path: PathBuf,
    timeout: Duration,
    background: Option<String>,
    scale: Option<u64>,
    puppeteer_config: Option<PathBuf>,
    work_dir: Mutex<Option<TempDir>>,
}

impl MermaidCliRenderer {
    pub fn new(
        settings: &RendererSettings,
        default_timeout: Duration,
    ) -> Result<Self, RendererError> {
        let work_dir = tempfile::Builder::new()
            .prefix("diagram-relay-mmdc-")
            .tempdir()?;
        Ok(Self {
            cli_path: PathBuf::from(settings.get_or("cli_path", "mmdc")),
            timeout: attempt_timeout(settings, default_timeout),
            background: non_empty(settings, "background"),
            scale: settings.get_u64("scale"),
            puppeteer_config: non_empty(settings, "puppeteer_config").map(PathBuf::from),
            work_dir: Mutex::new(Some(work_dir)),
        })
    }

    fn work_dir(&self) -> Result<PathBuf, RendererError> {
        mutex_lock(&self.work_dir, SOURCE, "work_dir")
            .as_ref()
            .map(|dir| dir.path().to_path_buf())
            .ok_or_else(|| RendererError::unavailable(NAME))
    }

    /// A generated `--configFile` is needed for custom themes and request
    /// config; a bare named theme goes through `--theme`.
    fn config_file(
        &self,
        request: &RenderRequest,
        dir: &Path,
    ) -> Result<Option<NamedTempFile>, RendererError> {
        let custom_theme = matches!(request.theme, Some(Theme::Custom(_)));
        if !custom_theme && request.config.is_empty() {
            return Ok(None);
        }
        let Some(config) = mermaid_config(request) else {
            return Ok(None);
        };
        let body = serde_json::to_vec(&config).map_err(|err| {
            RendererError::configuration(format!("cannot encode mermaid config: {err}"))
        })?;
        let mut file = tempfile::Builder::new()
            .suffix(".json")
            .tempfile_in(dir)?;
        file.write_all(&body)?;
        file.flush()?;
        Ok(Some(file))
    }
}

impl Renderer for MermaidCliRenderer {
    fn describe(&self) -> RendererDescriptor {
        descriptor()
    }

    fn render(&self, request: &RenderRequest) -> Result<RenderOutcome, RendererError> {
        let started_at = Instant::now();
        let dir = self.work_dir()?;

        let mut input_file = tempfile::Builder::new().suffix(".mmd").tempfile_in(&dir)?;
        input_file.write_all(request.source.as_bytes())?;
        input_file.flush()?;

        let output_file = tempfile::Builder::new()
            .suffix(&format!(".{}", request.format.extension()))
            .tempfile_in(&dir)?;
        let config_file = self.config_file(request, &dir)?;

        let mut command = Command::new(&self.cli_path);
        command
            .arg("--input")
            .arg(input_file.path())
            .arg("--output")
            .arg(output_file.path())
            .arg("--outputFormat")
            .arg(request.format.as_str())
            .arg("--quiet");
        match (&config_file, &request.theme) {
            (Some(file), _) => {
                command.arg("--configFile").arg(file.path());
            }
            (None, Some(Theme::Named(name))) => {
                command.arg("--theme").arg(name);
            }
            (None, _) => {}
        }
        if let Some(background) = &self.background {
            command.arg("--backgroundColor").arg(background);
        }
        if let Some(scale) = self.scale {
            command.arg("--scale").arg(scale.to_string());
        }
        if let Some(path) = &self.puppeteer_config {
            command.arg("--puppeteerConfigFile").arg(path);
        }

        let cli = process::run(command, None, self.timeout).map_err(syntax_from_stderr)?;

        let bytes = fs::read(output_file.path()).map_err(|err| {
            warn!(
                target = "application::renderers::mermaid_cli",
                op = "mermaid_cli::render",
                result = "error",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                error_code = "output_read",
                error = %err,
                "Failed to read mmdc output"
            );
            RendererError::Io(err)
        })?;
        let content = decode_output(NAME, request.format, bytes)?;

        info!(
            target = "application::renderers::mermaid_cli",
            op = "mermaid_cli::render",
            result = "success",
            format = request.format.as_str(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            cli_elapsed_ms = cli.elapsed.as_millis() as u64,
            output_bytes = content.len(),
            "Diagram rendered via mmdc"
        );
        Ok(RenderOutcome::success(content, request.format, NAME, started_at.elapsed()))
    }

    fn is_available(&self) -> bool {
        which::which(&self.cli_path).is_ok()
    }

    fn cleanup(&self) {
        if let Some(dir) = mutex_lock(&self.work_dir, SOURCE, "cleanup").take() {
            let path = dir.path().to_path_buf();
            if let Err(err) = dir.close() {
                warn!(
                    target = "application::renderers::mermaid_cli",
                    op = "mermaid_cli::cleanup",
                    result = "error",
                    path = %path.display(),
                    error = %err,
                    "Failed to remove mmdc work directory"
                );
            }
        }
    }
}
