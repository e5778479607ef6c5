#![allow(dead_code)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use diagram_relay::{
    application::{
        registry::RendererRegistry,
        renderer::{FnFactory, Renderer, RendererError, RendererFactory},
    },
    domain::{OutputFormat, RenderContent, RenderOutcome, RenderRequest, RendererDescriptor},
};

pub const GOOD_SVG: &str =
    r#"<svg xmlns="http://www.w3.org/2000/svg"><rect width="10" height="10"/></svg>"#;

/// What a scripted renderer does when asked to render.
#[derive(Clone)]
pub enum Behavior {
    Svg(String),
    Fail(fn() -> RendererError),
}

/// Call counters shared with every instance the factory builds.
#[derive(Clone, Default)]
pub struct Probe {
    pub renders: Arc<AtomicUsize>,
    pub cleanups: Arc<AtomicUsize>,
}

impl Probe {
    pub fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }
}

struct Scripted {
    descriptor: RendererDescriptor,
    available: bool,
    behavior: Behavior,
    probe: Probe,
}

impl Renderer for Scripted {
    fn describe(&self) -> RendererDescriptor {
        self.descriptor.clone()
    }

    fn render(&self, request: &RenderRequest) -> Result<RenderOutcome, RendererError> {
        self.probe.renders.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Svg(markup) => Ok(RenderOutcome::success(
                RenderContent::Text(markup.clone()),
                request.format,
                &self.descriptor.name,
                Duration::from_millis(2),
            )),
            Behavior::Fail(make) => Err(make()),
        }
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn cleanup(&self) {
        self.probe.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn svg_descriptor(name: &str, priority: u32) -> RendererDescriptor {
    RendererDescriptor::new(name, [OutputFormat::Svg, OutputFormat::Png]).with_priority(priority)
}

/// Registers a scripted renderer and returns its counters.
pub fn register(
    registry: &RendererRegistry,
    descriptor: RendererDescriptor,
    available: bool,
    behavior: Behavior,
) -> Probe {
    let probe = Probe::default();
    let shared = probe.clone();
    let name = descriptor.name.clone();
    let template = descriptor.clone();
    let factory: Arc<dyn RendererFactory> = Arc::new(FnFactory::new(descriptor, move || {
        Ok(Box::new(Scripted {
            descriptor: template.clone(),
            available,
            behavior: behavior.clone(),
            probe: shared.clone(),
        }) as Box<dyn Renderer>)
    }));
    registry
        .register(name, factory, false)
        .expect("scripted renderer registers");
    probe
}

pub fn working(registry: &RendererRegistry, name: &str, priority: u32) -> Probe {
    register(
        registry,
        svg_descriptor(name, priority),
        true,
        Behavior::Svg(GOOD_SVG.to_string()),
    )
}

pub fn flowchart(format: OutputFormat) -> RenderRequest {
    RenderRequest::new("flowchart TD\n A-->B", format)
}

/// Settings as the defaults resolve them, with the cache held in memory.
pub fn settings() -> diagram_relay::config::Settings {
    use diagram_relay::config::{
        CacheSettings, LogFormat, LoggingSettings, RenderSettings, Settings, ValidationSettings,
    };

    Settings {
        logging: LoggingSettings {
            level: tracing::level_filters::LevelFilter::WARN,
            format: LogFormat::Compact,
        },
        render: RenderSettings {
            max_fallbacks: 3,
            attempt_timeout: Duration::from_secs(5),
            strict_validation: true,
            strict_sanitization: false,
        },
        validation: ValidationSettings {
            max_source_bytes: 50_000,
            max_lines: 1_000,
            max_label_length: 200,
            max_nodes: 200,
            max_edges: 400,
        },
        cache: CacheSettings {
            enabled: true,
            ttl_seconds: 3_600,
            capacity: 16,
            directory: None,
            revalidate_hits: true,
        },
        renderers: Default::default(),
    }
}
