//! Built-in rendering backends offered to registry auto-discovery.
//!
//! | name          | tier | backend                               |
//! |---------------|------|---------------------------------------|
//! | `mermaid-cli` | 1    | local `mmdc`                          |
//! | `mermaid-ink` | 2    | `GET {server}/{svg,img,pdf}/{base64}` |
//! | `kroki`       | 3    | `POST {server}/mermaid/{format}`      |
//! | `graphviz`    | 4    | flowcharts translated to DOT, `dot`   |
//!
//! Each section under `[renderers.<name>]` is checked against the renderer's
//! schema during discovery; a section that fails the check skips only that
//! renderer.

mod dot;
mod graphviz;
mod kroki;
mod mermaid_cli;
mod mermaid_ink;

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use serde_json::{Map, Value};

pub use dot::to_dot;
pub use graphviz::GraphvizRenderer;
pub use kroki::KrokiRenderer;
pub use mermaid_cli::MermaidCliRenderer;
pub use mermaid_ink::MermaidInkRenderer;

use crate::{
    application::{
        registry::DiscoveryCandidate,
        renderer::{FnFactory, Renderer, RendererError, RendererFactory},
    },
    config::renderers::{self as renderer_config, EnvLookup},
    domain::{
        OutputFormat, RenderContent, RenderRequest, RendererDescriptor, RendererSettings, Theme,
    },
};

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";
const PDF_MAGIC: &[u8] = b"%PDF";

/// Descriptors of every built-in renderer, in discovery order.
pub fn builtin_descriptors() -> Vec<RendererDescriptor> {
    vec![
        mermaid_cli::descriptor(),
        mermaid_ink::descriptor(),
        kroki::descriptor(),
        graphviz::descriptor(),
    ]
}

/// One discovery candidate per built-in. `attempt_timeout` applies to
/// renderers whose section leaves `timeout_seconds` unset.
pub fn discovery_candidates(
    sections: &BTreeMap<String, RendererSettings>,
    attempt_timeout: Duration,
    env: EnvLookup,
) -> Vec<DiscoveryCandidate> {
    vec![
        candidate(mermaid_cli::descriptor(), sections, env.clone(), move |settings| {
            Ok(Box::new(MermaidCliRenderer::new(settings, attempt_timeout)?) as Box<dyn Renderer>)
        }),
        candidate(mermaid_ink::descriptor(), sections, env.clone(), move |settings| {
            Ok(Box::new(MermaidInkRenderer::new(settings, attempt_timeout)?) as Box<dyn Renderer>)
        }),
        candidate(kroki::descriptor(), sections, env.clone(), move |settings| {
            Ok(Box::new(KrokiRenderer::new(settings, attempt_timeout)?) as Box<dyn Renderer>)
        }),
        candidate(graphviz::descriptor(), sections, env, move |settings| {
            Ok(Box::new(GraphvizRenderer::new(settings, attempt_timeout)?) as Box<dyn Renderer>)
        }),
    ]
}

fn candidate<B>(
    descriptor: RendererDescriptor,
    sections: &BTreeMap<String, RendererSettings>,
    env: EnvLookup,
    build: B,
) -> DiscoveryCandidate
where
    B: Fn(&RendererSettings) -> Result<Box<dyn Renderer>, RendererError> + Send + Sync + 'static,
{
    let name = descriptor.name.clone();
    let section = sections.get(&name).cloned();
    DiscoveryCandidate::new(name, move || {
        let settings = renderer_config::resolve(&descriptor, section.as_ref(), env.as_ref())
            .map_err(|err| RendererError::configuration(err.to_string()))?;
        let factory = FnFactory::new(descriptor, move || build(&settings));
        Ok(Arc::new(factory) as Arc<dyn RendererFactory>)
    })
}

/// `timeout_seconds` from the section, else the global attempt timeout.
fn attempt_timeout(settings: &RendererSettings, fallback: Duration) -> Duration {
    settings
        .get_seconds("timeout_seconds")
        .filter(|timeout| !timeout.is_zero())
        .unwrap_or(fallback)
}

fn non_empty(settings: &RendererSettings, key: &str) -> Option<String> {
    settings
        .get(key)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Checks raw backend bytes look like `format` and wraps them.
fn decode_output(
    renderer: &str,
    format: OutputFormat,
    bytes: Vec<u8>,
) -> Result<RenderContent, RendererError> {
    if bytes.is_empty() {
        return Err(RendererError::malformed(format!("{renderer} produced no output")));
    }
    match format {
        OutputFormat::Svg => String::from_utf8(bytes)
            .map(RenderContent::Text)
            .map_err(|_| RendererError::malformed("svg output is not valid UTF-8")),
        OutputFormat::Png if bytes.starts_with(PNG_MAGIC) => Ok(RenderContent::Binary(bytes)),
        OutputFormat::Pdf if bytes.starts_with(PDF_MAGIC) => Ok(RenderContent::Binary(bytes)),
        other => Err(RendererError::malformed(format!("output is not a {other} document"))),
    }
}

/// Mermaid configuration object for the request theme and config entries.
fn mermaid_config(request: &RenderRequest) -> Option<Value> {
    let mut config = Map::new();
    match &request.theme {
        Some(Theme::Named(name)) => {
            config.insert("theme".into(), Value::String(name.clone()));
        }
        Some(Theme::Custom(variables)) => {
            config.insert("theme".into(), Value::String("base".into()));
            let variables = variables
                .iter()
                .map(|(key, value)| (key.clone(), Value::String(value.clone())))
                .collect();
            config.insert("themeVariables".into(), Value::Object(variables));
        }
        None => {}
    }
    for (key, value) in &request.config {
        config.insert(key.clone(), value.clone());
    }
    (!config.is_empty()).then_some(Value::Object(config))
}

/// Prepends a Mermaid `%%{init: ...}%%` directive carrying `config`.
fn with_init_directive(source: &str, config: &Value) -> String {
    format!("%%{{init: {config}}}%%\n{source}")
}

/// Maps process failures whose stderr reports a parse problem to syntax errors.
fn syntax_from_stderr(err: RendererError) -> RendererError {
    match err {
        RendererError::ProcessFailed { stderr, .. } if reports_parse_failure(&stderr) => {
            RendererError::syntax(stderr)
        }
        other => other,
    }
}

fn reports_parse_failure(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("parse error") || lower.contains("syntax error")
}

/// Percent-encodes a query parameter value.
fn query_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}
