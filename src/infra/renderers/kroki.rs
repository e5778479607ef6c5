use std::{
    sync::Mutex,
    time::{Duration, Instant},
};

use tracing::info;

use crate::{
    application::renderer::{Renderer, RendererError},
    cache::lock::mutex_lock,
    domain::{
        Capability, ConfigSchema, FieldKind, OutputFormat, RenderOutcome, RenderRequest,
        RendererDescriptor, RendererSettings,
    },
    infra::http_client::HttpClient,
};

use super::{attempt_timeout, decode_output, mermaid_config, with_init_directive};

pub const NAME: &str = "kroki";
const SOURCE: &str = "infra::renderers::kroki";
const DEFAULT_SERVER: &str = "https://kroki.io";
const PROBE_BUDGET: Duration = Duration::from_secs(3);

pub fn descriptor() -> RendererDescriptor {
    RendererDescriptor::new(NAME, [OutputFormat::Svg, OutputFormat::Png])
        .with_description("Remote rendering through a Kroki server")
        .with_capabilities([
            Capability::RemoteRendering,
            Capability::ThemeSupport,
            Capability::CustomConfig,
        ])
        .with_priority(3)
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_config_schema(
            ConfigSchema::new()
                .field(
                    "server",
                    FieldKind::Url,
                    "Base URL of the Kroki service",
                    Some(DEFAULT_SERVER),
                )
                .field("timeout_seconds", FieldKind::Integer, "Per-attempt timeout", None),
        )
}

/// Posts plain-text source to `{server}/mermaid/{format}`. Theme and request
/// config are carried by a prepended init directive.
#[derive(Debug)]
pub struct KrokiRenderer {
    server: String,
    timeout: Duration,
    client: Mutex<Option<HttpClient>>,
}

impl KrokiRenderer {
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
}

fn body_for(request: &RenderRequest) -> String {
    match mermaid_config(request) {
        Some(config) => with_init_directive(&request.source, &config),
        None => request.source.clone(),
    }
}

impl Renderer for KrokiRenderer {
    fn describe(&self) -> RendererDescriptor {
        descriptor()
    }

    fn render(&self, request: &RenderRequest) -> Result<RenderOutcome, RendererError> {
        if !descriptor().supports_format(request.format) {
            return Err(RendererError::UnsupportedFormat {
                renderer: NAME.to_string(),
                format: request.format,
            });
        }
        let started_at = Instant::now();
        let url = format!("{}/mermaid/{}", self.server, request.format.as_str());
        let body = self.client()?.post(&url, "text/plain", body_for(request).into_bytes())?;
        let content = decode_output(NAME, request.format, body)?;

        info!(
            target = "application::renderers::kroki",
            op = "kroki::render",
            result = "success",
            format = request.format.as_str(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            output_bytes = content.len(),
            "Diagram rendered via Kroki"
        );
        Ok(RenderOutcome::success(content, request.format, NAME, started_at.elapsed()))
    }

    fn is_available(&self) -> bool {
        match self.client() {
            Ok(client) => client.probe(
                &format!("{}/health", self.server),
                PROBE_BUDGET.min(self.timeout),
            ),
            Err(_) => false,
        }
    }

    fn cleanup(&self) {
        mutex_lock(&self.client, SOURCE, "cleanup").take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{domain::Theme, infra::http_client::test_server};

    fn renderer(server: &str) -> KrokiRenderer {
        let settings: RendererSettings = [("server", server)].into_iter().collect();
        KrokiRenderer::new(&settings, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn posts_source_with_theme_directive() {
        let (base, seen) = test_server::serve(vec![(
            200,
            "image/svg+xml",
            b"<svg>kroki</svg>".to_vec(),
        )]);
        let request = RenderRequest::new("graph LR\n a-->b", OutputFormat::Svg)
            .with_theme(Theme::named("dark"));

        let outcome = renderer(&base).render(&request).unwrap();

        assert_eq!(outcome.text(), Some("<svg>kroki</svg>"));
        assert_eq!(outcome.renderer_name, NAME);
        let request = seen.recv().unwrap();
        assert_eq!(request.request_line, "POST /mermaid/svg HTTP/1.1");
        assert_eq!(
            String::from_utf8(request.body).unwrap(),
            "%%{init: {\"theme\":\"dark\"}}%%\ngraph LR\n a-->b"
        );
    }

    #[test]
    fn plain_requests_send_the_source_untouched() {
        let request = RenderRequest::new("graph LR\n a-->b", OutputFormat::Svg);
        assert_eq!(body_for(&request), request.source);
    }

    #[test]
    fn pdf_is_refused_before_any_request() {
        let err = renderer("http://127.0.0.1:9")
            .render(&RenderRequest::new("graph LR", OutputFormat::Pdf))
            .unwrap_err();
        assert!(matches!(err, RendererError::UnsupportedFormat { .. }));
    }

    #[test]
    fn server_errors_are_reported_with_status() {
        let (base, _seen) = test_server::serve(vec![(503, "text/plain", b"overloaded".to_vec())]);
        let err = renderer(&base)
            .render(&RenderRequest::new("graph LR\n a-->b", OutputFormat::Png))
            .unwrap_err();
        assert!(matches!(err, RendererError::HttpStatus { status: 503, .. }));
    }
}
