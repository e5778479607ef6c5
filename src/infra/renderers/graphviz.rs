use std::{
    path::PathBuf,
    process::Command,
    time::{Duration, Instant},
};

use tracing::info;

use crate::{
    application::renderer::{Renderer, RendererError},
    domain::{
        Capability, ConfigSchema, DiagramType, FieldKind, OutputFormat, RenderOutcome,
        RenderRequest, RendererDescriptor, RendererSettings,
    },
    infra::process,
};

use super::{attempt_timeout, decode_output, dot, non_empty, syntax_from_stderr};

pub const NAME: &str = "graphviz";

pub fn descriptor() -> RendererDescriptor {
    RendererDescriptor::new(NAME, OutputFormat::ALL)
        .with_description("Flowcharts translated to DOT and laid out by Graphviz")
        .with_capabilities([Capability::LocalRendering])
        .with_priority(4)
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_dependencies(["dot"])
        .with_diagram_types([DiagramType::Flowchart])
        .with_config_schema(
            ConfigSchema::new()
                .field("cli_path", FieldKind::Path, "dot executable name or path", Some("dot"))
                .field("timeout_seconds", FieldKind::Integer, "Per-attempt timeout", None)
                .field("background", FieldKind::String, "Graph bgcolor", None),
        )
}

#[derive(Debug, Clone)]
pub struct GraphvizRenderer {
    cli_path: PathBuf,
    timeout: Duration,
    background: Option<String>,
}

impl GraphvizRenderer {
    pub fn new(
        settings: &RendererSettings,
        default_timeout: Duration,
    ) -> Result<Self, RendererError> {
        Ok(Self {
            cli_path: PathBuf::from(settings.get_or("cli_path", "dot")),
            timeout: attempt_timeout(settings, default_timeout),
            background: non_empty(settings, "background"),
        })
    }
}

impl Renderer for GraphvizRenderer {
    fn describe(&self) -> RendererDescriptor {
        descriptor()
    }

    fn render(&self, request: &RenderRequest) -> Result<RenderOutcome, RendererError> {
        let started_at = Instant::now();
        let graph = dot::to_dot(&request.source, self.background.as_deref())?;

        let mut command = Command::new(&self.cli_path);
        command.arg(format!("-T{}", request.format.as_str()));
        let output = process::run(command, Some(graph.as_bytes()), self.timeout)
            .map_err(syntax_from_stderr)?;
        let content = decode_output(NAME, request.format, output.stdout)?;

        info!(
            target = "application::renderers::graphviz",
            op = "graphviz::render",
            result = "success",
            format = request.format.as_str(),
            dot_bytes = graph.len(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            output_bytes = content.len(),
            "Flowchart rendered via Graphviz"
        );
        Ok(RenderOutcome::success(content, request.format, NAME, started_at.elapsed()))
    }

    fn is_available(&self) -> bool {
        which::which(&self.cli_path).is_ok()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::infra::renderers::test_support::fake_cli;

    fn renderer_for(cli: &std::path::Path) -> GraphvizRenderer {
        let settings: RendererSettings = [("cli_path", cli.to_string_lossy().into_owned())]
            .into_iter()
            .collect();
        GraphvizRenderer::new(&settings, Duration::from_secs(10)).unwrap()
    }

    #[test]
    fn pipes_translated_dot_into_the_cli() {
        let dir = TempDir::new().unwrap();
        let captured = dir.path().join("graph.dot");
        let cli = fake_cli(
            dir.path(),
            "fake-dot",
            &format!(
                concat!(
                    "cat > \"{}\"\necho \"$1\" > \"{}\"\n",
                    "printf '<svg xmlns=\"http://www.w3.org/2000/svg\"/>'",
                ),
                captured.display(),
                dir.path().join("format.txt").display()
            ),
        );

        let outcome = renderer_for(&cli)
            .render(&RenderRequest::new("flowchart LR\n a --> b", OutputFormat::Svg))
            .unwrap();

        assert!(outcome.is_success());
        assert!(outcome.text().unwrap().starts_with("<svg"));
        let graph = fs::read_to_string(&captured).unwrap();
        assert!(graph.contains("\"a\" -> \"b\";"), "{graph}");
        assert_eq!(fs::read_to_string(dir.path().join("format.txt")).unwrap().trim(), "-Tsvg");
    }

    #[test]
    fn dot_syntax_errors_are_syntax_errors() {
        let dir = TempDir::new().unwrap();
        let cli = fake_cli(
            dir.path(),
            "bad-dot",
            "cat > /dev/null\necho 'Error: <stdin>: syntax error in line 3' >&2\nexit 1",
        );

        let err = renderer_for(&cli)
            .render(&RenderRequest::new("flowchart LR\n a --> b", OutputFormat::Svg))
            .unwrap_err();
        assert!(matches!(err, RendererError::Syntax { .. }));
    }

    #[test]
    fn non_flowchart_sources_never_reach_the_cli() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("ran");
        let cli = fake_cli(dir.path(), "dot", &format!("touch \"{}\"", marker.display()));

        let err = renderer_for(&cli)
            .render(&RenderRequest::new("sequenceDiagram\n a->>b: hi", OutputFormat::Svg))
            .unwrap_err();
        assert!(matches!(err, RendererError::UnsupportedDiagram { .. }));
        assert!(!marker.exists());
    }
}
