//! Process-wide wiring: one registry, one cache, one orchestrator.

use std::sync::Arc;

use tracing::info;

use crate::{
    application::{
        error::AppError,
        orchestrator::{RenderFailure, RenderOrchestrator, RenderPolicy},
        registry::{DiscoveryReport, RendererRegistry},
        safety::SafetyPipeline,
        validation::{InputValidator, ValidationLimits, ValidationResult},
    },
    cache::{CacheConfig, ResultCache},
    config::{
        Settings,
        renderers::{self, EnvLookup},
    },
    domain::{RenderOutcome, RenderRequest},
    infra::renderers::discovery_candidates,
};

pub struct RenderRuntime {
    registry: Arc<RendererRegistry>,
    orchestrator: RenderOrchestrator,
    discovery: DiscoveryReport,
}

impl RenderRuntime {
    /// Discovers the built-in renderers using process environment overrides.
    pub fn from_settings(settings: &Settings) -> Result<Self, AppError> {
        Self::from_settings_with_env(settings, renderers::process_env())
    }

    pub fn from_settings_with_env(settings: &Settings, env: EnvLookup) -> Result<Self, AppError> {
        let registry = Arc::new(RendererRegistry::new());
        let discovery = registry.auto_discover(discovery_candidates(
            &settings.renderers,
            settings.render.attempt_timeout,
            env,
        ));
        Self::assemble(settings, registry, discovery)
    }

    /// Wires a caller-populated registry; no discovery runs.
    pub fn with_registry(
        settings: &Settings,
        registry: Arc<RendererRegistry>,
    ) -> Result<Self, AppError> {
        Self::assemble(settings, registry, DiscoveryReport::default())
    }

    fn assemble(
        settings: &Settings,
        registry: Arc<RendererRegistry>,
        discovery: DiscoveryReport,
    ) -> Result<Self, AppError> {
        let policy = RenderPolicy {
            max_fallbacks: settings.render.max_fallbacks,
            strict_validation: settings.render.strict_validation,
            revalidate_cache_hits: settings.cache.revalidate_hits,
        };
        let mut orchestrator = RenderOrchestrator::new(Arc::clone(&registry), policy)
            .with_validator(InputValidator::new(ValidationLimits::from(&settings.validation)))
            .with_safety(SafetyPipeline::new(settings.render.strict_sanitization));

        let cache_config = CacheConfig::from(&settings.cache);
        if cache_config.enabled {
            orchestrator = orchestrator.with_cache(Arc::new(ResultCache::new(&cache_config)?));
        }

        info!(
            target = "application::runtime",
            op = "assemble",
            renderers = registry.len(),
            skipped = discovery.skipped.len(),
            cache = cache_config.enabled,
            cache_dir = cache_config
                .directory
                .as_ref()
                .map(|dir| dir.display().to_string())
                .unwrap_or_default(),
            "Render runtime ready"
        );

        Ok(Self {
            registry,
            orchestrator,
            discovery,
        })
    }

    pub fn registry(&self) -> &RendererRegistry {
        &self.registry
    }

    pub fn orchestrator(&self) -> &RenderOrchestrator {
        &self.orchestrator
    }

    pub fn discovery(&self) -> &DiscoveryReport {
        &self.discovery
    }

    pub fn render(&self, request: &RenderRequest) -> Result<RenderOutcome, RenderFailure> {
        self.orchestrator.render(request)
    }

    /// Validates `request`, including compatibility with its preferred
    /// renderer when one is registered under that name.
    pub fn validate(&self, request: &RenderRequest) -> ValidationResult {
        let descriptor = request
            .preferred_renderer
            .as_deref()
            .and_then(|name| self.registry.descriptor(name));
        self.orchestrator.validator().validate(
            &request.source,
            request.format,
            descriptor.as_ref(),
            self.orchestrator.policy().strict_validation,
        )
    }

    pub fn shutdown(&self) {
        self.orchestrator.shutdown();
    }
}
