use std::{
    sync::Mutex,
    time::{Duration, Instant},
};

use base64::{Engine as _, engine::general_purpose::URL_SAFE};
use tracing::info;

use crate::{
    application::renderer::{Renderer, RendererError},
    cache::lock::mutex_lock,
    domain::{
        Capability, ConfigSchema, FieldKind, OutputFormat, RenderOutcome, RenderRequest,
        RendererDescriptor, RendererSettings, Theme,
    },
    infra::http_client::HttpClient,
};

use super::{
    attempt_timeout, decode_output, mermaid_config, non_empty, query_escape, with_init_directive,
};

pub const NAME: &str = "mermaid-ink";
const SOURCE: &str = "infra::renderers::mermaid_ink";
const DEFAULT_SERVER: &str = "https://mermaid.ink";
const PROBE_BUDGET: Duration = Duration::from_secs(3);

pub fn descriptor() -> RendererDescriptor {
    RendererDescriptor::new(NAME, OutputFormat::ALL)
        .with_description("Remote rendering through a mermaid.ink server")
        .with_capabilities([Capability::RemoteRendering, Capability::ThemeSupport])
        .with_priority(2)
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_config_schema(
            ConfigSchema::new()
                .field(
                    "server",
                    FieldKind::Url,
                    "Base URL of the mermaid.ink service",
                    Some(DEFAULT_SERVER),
                )
                .field("timeout_seconds", FieldKind::Integer, "Per-attempt timeout", None)
                .field(
                    "background",
                    FieldKind::String,
                    "Background colour: hex or a CSS name",
                    None,
                ),
        )
}

#[derive(Debug)]
pub struct MermaidInkRenderer {
    server: String,
    timeout: Duration,
    background: Option<String>,
    client: Mutex<Option<HttpClient>>,
}

impl MermaidInkRenderer {
    pub fn new(
        settings: &RendererSettings,
        default_timeout: Duration,
    ) -> Result<Self, RendererError> {
        Ok(Self {
            server: settings
                .get_or("server", DEFAULT_SERVER)
                .trim_end_matches('/')
                .to_string(),
            timeout: attempt_timeout(settings, default_timeout),
            background: non_empty(settings, "background"),
            client: Mutex::new(None),
        })
    }

    fn client(&self) -> Result<HttpClient, RendererError> {
        let mut slot = mutex_lock(&self.client, SOURCE, "client");
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }
        let client = HttpClient::new(self.timeout)?;
        *slot = Some(client.clone());
        Ok(client)
    }

    /// `{server}/{svg|img|pdf}/{base64url(source)}` plus theme and
    /// background query parameters. Custom themes and request config travel
    /// inside the encoded source as an init directive.
    fn url(&self, request: &RenderRequest) -> String {
        let source = match (&request.theme, request.config.is_empty()) {
            (Some(Theme::Named(_)) | None, true) => request.source.clone(),
            _ => match mermaid_config(request) {
                Some(config) => with_init_directive(&request.source, &config),
                None => request.source.clone(),
            },
        };
        let encoded = URL_SAFE.encode(source.as_bytes());

        let (endpoint, mut query) = match request.format {
            OutputFormat::Svg => ("svg", Vec::new()),
            OutputFormat::Png => ("img", vec![("type", "png".to_string())]),
            OutputFormat::Pdf => ("pdf", Vec::new()),
        };
        if request.config.is_empty()
            && let Some(Theme::Named(name)) = &request.theme
        {
            query.push(("theme", name.clone()));
        }
        if let Some(background) = &self.background {
            let value = match background.strip_prefix('#') {
                Some(hex) => hex.to_string(),
                None => format!("!{background}"),
            };
            query.push(("bgColor", value));
        }

        let mut url = format!("{}/{endpoint}/{encoded}", self.server);
        for (index, (key, value)) in query.iter().enumerate() {
            url.push(if index == 0 { '?' } else { '&' });
            url.push_str(key);
            url.push('=');
            url.push_str(&query_escape(value));
        }
        url
    }
}

impl Renderer for MermaidInkRenderer {
    fn describe(&self) -> RendererDescriptor {
        descriptor()
    }

    fn render(&self, request: &RenderRequest) -> Result<RenderOutcome, RendererError> {
        let started_at = Instant::now();
        let url = self.url(request);
        let body = self.client()?.get(&url)?;
        let content = decode_output(NAME, request.format, body)?;

        info!(
            target = "application::renderers::mermaid_ink",
            op = "mermaid_ink::render",
            result = "success",
            format = request.format.as_str(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            output_bytes = content.len(),
            "Diagram rendered via mermaid.ink"
        );
        Ok(RenderOutcome::success(content, request.format, NAME, started_at.elapsed()))
    }

    fn is_available(&self) -> bool {
        match self.client() {
            Ok(client) => client.probe(
                &format!("{}/", self.server),
                PROBE_BUDGET.min(self.timeout),
            ),
            Err(_) => false,
        }
    }

    fn cleanup(&self) {
        mutex_lock(&self.client, SOURCE, "cleanup").take();
    }
}
