//! Drives one render request through validation, the result cache and the
//! fallback chain.
//!
//! Per request the orchestrator moves `NotStarted -> Attempting(i) ->
//! {Succeeded | Attempting(i + 1) | Exhausted}`. Each transition is logged at
//! `debug`. Candidate failures are ordinary values: they are classified,
//! appended to the attempt trace and the loop moves on.

mod stats;

use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use metrics::{counter, histogram};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    cache::{CacheKey, ResultCache, lock::mutex_lock},
    domain::{Capability, DiagramType, OutputFormat, RenderOutcome, RenderRequest, diagram},
};

use super::{
    classify::{Classify, ErrorCategory, ErrorContext, ErrorRecord, PlainFailure, classify},
    registry::{RegistryError, RendererRegistry},
    renderer::{Renderer, RendererError},
    safety::SafetyPipeline,
    validation::{InputValidator, ValidationResult},
};

pub use stats::{RENDER_ATTEMPT_TOTAL, RENDER_FALLBACK_TOTAL, RENDER_MS, RenderStats, StatsSnapshot};

const SOURCE: &str = "application::orchestrator";
const NO_RENDERER: &str = "none";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderPolicy {
    /// Upper bound on fallback-chain length.
    pub max_fallbacks: usize,
    pub strict_validation: bool,
    /// Re-run structural and risk checks on cache hits.
    pub revalidate_cache_hits: bool,
}

impl Default for RenderPolicy {
    fn default() -> Self {
        Self {
            max_fallbacks: 3,
            strict_validation: true,
            revalidate_cache_hits: true,
        }
    }
}

/// One failed candidate in the attempt trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub renderer: String,
    pub attempt_number: usize,
    pub error: ErrorRecord,
}

#[derive(Debug, Error)]
pub enum RenderFailure {
    #[error("invalid input: {}", .validation.errors.join("; "))]
    InvalidInput {
        validation: ValidationResult,
        record: ErrorRecord,
    },
    #[error("{}", .record.message)]
    UnsupportedFormat {
        format: OutputFormat,
        required: BTreeSet<Capability>,
        record: ErrorRecord,
    },
    #[error("{}", exhausted_message(.attempts))]
    Exhausted { attempts: Vec<AttemptRecord> },
}

impl RenderFailure {
    /// The classified failure. For an exhausted chain this is the last
    /// attempt's record with every attempt attached as `related`.
    pub fn record(&self) -> Option<ErrorRecord> {
        match self {
            RenderFailure::InvalidInput { record, .. }
            | RenderFailure::UnsupportedFormat { record, .. } => Some(record.clone()),
            RenderFailure::Exhausted { attempts } => attempts.last().map(|last| {
                last.error
                    .clone()
                    .with_related(attempts.iter().map(|attempt| attempt.error.clone()).collect())
            }),
        }
    }

    /// Failed attempts in chain order; empty unless the chain was exhausted.
    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            RenderFailure::Exhausted { attempts } => attempts,
            _ => &[],
        }
    }

    pub fn category(&self) -> Option<ErrorCategory> {
        self.record().map(|record| record.category)
    }
}

fn exhausted_message(attempts: &[AttemptRecord]) -> String {
    let last = attempts
        .last()
        .map(|attempt| attempt.error.message.as_str())
        .unwrap_or("no renderer was attempted");
    let summary = attempts
        .iter()
        .map(|attempt| format!("{}({})", attempt.renderer, attempt.error.category))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "all {} renderer attempts failed; last error: {last}; attempts: {summary}",
        attempts.len()
    )
}

/// Why a single candidate failed.
enum AttemptError {
    Renderer(RendererError),
    Reported(PlainFailure),
}

impl AttemptError {
    fn as_classify(&self) -> &dyn Classify {
        match self {
            AttemptError::Renderer(err) => err,
            AttemptError::Reported(failure) => failure,
        }
    }
}

impl From<RendererError> for AttemptError {
    fn from(err: RendererError) -> Self {
        AttemptError::Renderer(err)
    }
}

/// Why a chain candidate was passed over without being invoked.
enum Skip {
    Missing(Vec<Capability>),
    Diagram(DiagramType),
    Unregistered,
}

impl fmt::Display for Skip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Skip::Missing(caps) => {
                let names: Vec<&str> = caps.iter().map(|cap| cap.as_str()).collect();
                write!(f, "lacks {}", names.join(", "))
            }
            Skip::Diagram(kind) => write!(f, "does not draw {kind} diagrams"),
            Skip::Unregistered => f.write_str("left the registry"),
        }
    }
}

pub struct RenderOrchestrator {
    registry: Arc<RendererRegistry>,
    validator: InputValidator,
    safety: SafetyPipeline,
    cache: Option<Arc<ResultCache>>,
    policy: RenderPolicy,
    instances: Mutex<HashMap<String, Arc<dyn Renderer>>>,
    stats: RenderStats,
}

impl fmt::Debug for RenderOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderOrchestrator")
            .field("policy", &self.policy)
            .field("safety", &self.safety)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl RenderOrchestrator {
    pub fn new(registry: Arc<RendererRegistry>, policy: RenderPolicy) -> Self {
        Self {
            registry,
            validator: InputValidator::default(),
            safety: SafetyPipeline::new(false),
            cache: None,
            policy,
            instances: Mutex::new(HashMap::new()),
            stats: RenderStats::default(),
        }
    }

    pub fn with_validator(mut self, validator: InputValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_safety(mut self, safety: SafetyPipeline) -> Self {
        self.safety = safety;
        self
    }

    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn registry(&self) -> &RendererRegistry {
        &self.registry
    }

    pub fn validator(&self) -> &InputValidator {
        &self.validator
    }

    pub fn cache(&self) -> Option<&ResultCache> {
        self.cache.as_deref()
    }

    pub fn policy(&self) -> &RenderPolicy {
        &self.policy
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Validates the source without binding it to one renderer.
    pub fn validate(&self, request: &RenderRequest) -> ValidationResult {
        self.validator
            .validate(&request.source, request.format, None, self.policy.strict_validation)
    }

    /// Renders `request`, trying chain candidates until one succeeds.
    pub fn render(&self, request: &RenderRequest) -> Result<RenderOutcome, RenderFailure> {
        let started = Instant::now();
        self.stats.record_request();
        debug!(
            target = "application::orchestrator",
            op = "render",
            state = "not_started",
            format = request.format.as_str()
        );

        let validation = self.validate(request);
        let Some(source) = validation.sanitized_input.clone().filter(|_| validation.is_valid) else {
            let record = classify(
                &validation.failure(),
                ErrorContext::new().elapsed(started.elapsed()),
            );
            warn!(
                target = "application::orchestrator",
                op = "render",
                result = "invalid_input",
                error_code = %record.code,
                errors = validation.errors.len(),
                "Rejected diagram source before rendering"
            );
            self.stats.record_failed_render();
            return Err(RenderFailure::InvalidInput { validation, record });
        };

        let effective = request.with_source(source);
        let key = CacheKey::for_request(&effective, &effective.source);
        if let Some(outcome) = self.cached(&key, request.format, started) {
            return Ok(outcome.with_warnings(validation.warnings));
        }

        let chain = self.registry.build_fallback_chain(
            request.format,
            request.preferred_renderer.as_deref(),
            self.policy.max_fallbacks,
        );
        if chain.is_empty() {
            self.stats.record_failed_render();
            return Err(self.unsupported(request, started.elapsed()));
        }

        let detected = diagram::detect(&effective.source);
        let runnable: Vec<&str> = chain
            .iter()
            .filter(|name| {
                let Some(skip) = self.skip_reason(name, &request.required_capabilities, detected)
                else {
                    return true;
                };
                debug!(
                    target = "application::orchestrator",
                    op = "render",
                    result = "skipped",
                    renderer = *name,
                    reason = %skip,
                    "Candidate passed over"
                );
                false
            })
            .collect();
        if runnable.is_empty() {
            self.stats.record_failed_render();
            return Err(self.unsupported(request, started.elapsed()));
        }

        let total = runnable.len();
        let mut attempts: Vec<AttemptRecord> = Vec::new();

        for (index, name) in runnable.into_iter().enumerate() {
            let attempt_number = index + 1;
            debug!(
                target = "application::orchestrator",
                op = "render",
                state = "attempting",
                renderer = name,
                attempt_number,
                total_attempts = total,
            );

            let attempt_started = Instant::now();
            let result = self.attempt(name, &effective);
            let elapsed = attempt_started.elapsed();
            histogram!(RENDER_MS).record(elapsed.as_secs_f64() * 1_000.0);

            match result {
                Ok(outcome) => {
                    let used_fallback = !attempts.is_empty();
                    self.stats.record_success(name, used_fallback);
                    counter!(
                        RENDER_ATTEMPT_TOTAL,
                        "renderer" => name.to_string(),
                        "outcome" => "success"
                    )
                    .increment(1);
                    if used_fallback {
                        counter!(RENDER_FALLBACK_TOTAL).increment(1);
                    }

                    if let (Some(cache), Some(content)) = (&self.cache, &outcome.content) {
                        cache.put(key.clone(), content.clone(), request.format, name);
                    }

                    info!(
                        target = "application::orchestrator",
                        op = "render",
                        result = "success",
                        state = "succeeded",
                        renderer = name,
                        attempt_number,
                        used_fallback,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Diagram rendered"
                    );

                    let outcome = outcome
                        .with_warnings(validation.warnings)
                        .with_metadata("cache_hit", json!(false))
                        .with_metadata("attempt_number", json!(attempt_number))
                        .with_metadata("used_fallback", json!(used_fallback))
                        .with_metadata("failed_attempts", trace_json(&attempts));
                    return Ok(outcome);
                }
                Err(err) => {
                    let context = ErrorContext::for_renderer(name, request.format)
                        .attempt(attempt_number, total)
                        .elapsed(elapsed);
                    let record = classify(err.as_classify(), context);
                    self.stats.record_failed_attempt();
                    counter!(
                        RENDER_ATTEMPT_TOTAL,
                        "renderer" => name.to_string(),
                        "outcome" => "failure"
                    )
                    .increment(1);
                    warn!(
                        target = "application::orchestrator",
                        op = "render",
                        result = "attempt_failed",
                        renderer = name,
                        attempt_number,
                        total_attempts = total,
                        error_code = %record.code,
                        category = record.category.as_str(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        error = %record.message,
                        "Render attempt failed"
                    );
                    attempts.push(AttemptRecord {
                        renderer: name.to_string(),
                        attempt_number,
                        error: record,
                    });
                }
            }
        }

        self.stats.record_failed_render();
        let failure = RenderFailure::Exhausted { attempts };
        warn!(
            target = "application::orchestrator",
            op = "render",
            result = "exhausted",
            state = "exhausted",
            attempts = failure.attempts().len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            error = %failure,
            "Every renderer in the chain failed"
        );
        Err(failure)
    }

    /// Like [`render`](Self::render) but always returns an outcome; failures
    /// carry the error text plus the classified record and attempt trace.
    pub fn render_outcome(&self, request: &RenderRequest) -> RenderOutcome {
        let started = Instant::now();
        match self.render(request) {
            Ok(outcome) => outcome,
            Err(failure) => {
                let renderer = failure
                    .attempts()
                    .last()
                    .map(|attempt| attempt.renderer.clone())
                    .or_else(|| request.preferred_renderer.clone())
                    .unwrap_or_else(|| NO_RENDERER.to_string());
                let record = failure.record();
                RenderOutcome::failure(
                    request.format,
                    renderer,
                    failure.to_string(),
                    started.elapsed(),
                )
                .with_metadata("error", serde_json::to_value(&record).unwrap_or_default())
                .with_metadata("attempts", trace_json(failure.attempts()))
            }
        }
    }

    /// Releases every renderer instance created so far.
    pub fn shutdown(&self) {
        let drained: Vec<(String, Arc<dyn Renderer>)> =
            mutex_lock(&self.instances, SOURCE, "shutdown").drain().collect();
        for (name, renderer) in &drained {
            renderer.cleanup();
            debug!(
                target = "application::orchestrator",
                op = "shutdown",
                renderer = %name,
                "Renderer released"
            );
        }
        if !drained.is_empty() {
            info!(
                target = "application::orchestrator",
                op = "shutdown",
                released = drained.len(),
                "Renderer instances released"
            );
        }
    }

    fn cached(
        &self,
        key: &CacheKey,
        format: OutputFormat,
        started: Instant,
    ) -> Option<RenderOutcome> {
        let cache = self.cache.as_ref()?;
        let entry = cache.get(key)?;

        if entry.format != format {
            cache.remove(key);
            return None;
        }
        if self.policy.revalidate_cache_hits
            && let Err(err) = self.safety.revalidate(&entry.content, format)
        {
            warn!(
                target = "application::orchestrator",
                op = "cache_read",
                result = "evicted",
                key = %key,
                error = %err,
                "Cached entry failed re-validation"
            );
            cache.remove(key);
            return None;
        }

        self.stats.record_cache_hit();
        debug!(
            target = "application::orchestrator",
            op = "cache_read",
            result = "hit",
            renderer = %entry.renderer_name,
            elapsed_ms = started.elapsed().as_millis() as u64,
        );
        Some(
            RenderOutcome::success(entry.content, format, entry.renderer_name, started.elapsed())
                .with_metadata("cache_hit", json!(true)),
        )
    }

    fn skip_reason(
        &self,
        name: &str,
        required: &BTreeSet<Capability>,
        detected: Option<DiagramType>,
    ) -> Option<Skip> {
        let Some(descriptor) = self.registry.descriptor(name) else {
            return Some(Skip::Unregistered);
        };
        let missing = descriptor.missing_capabilities(required);
        if !missing.is_empty() {
            return Some(Skip::Missing(missing));
        }
        match detected {
            Some(kind) if !descriptor.supports_diagram(kind) => Some(Skip::Diagram(kind)),
            _ => None,
        }
    }

    fn attempt(&self, name: &str, request: &RenderRequest) -> Result<RenderOutcome, AttemptError> {
        let renderer = self.instance(name)?;
        let outcome = renderer.render(request)?;

        if !outcome.is_success() {
            let message = outcome.error().unwrap_or_default().to_string();
            return Err(AttemptError::Reported(
                PlainFailure::new("RenderError", message).with_hint(ErrorCategory::Rendering),
            ));
        }
        if outcome.format != request.format {
            return Err(RendererError::UnsupportedFormat {
                renderer: name.to_string(),
                format: request.format,
            }
            .into());
        }

        let RenderOutcome {
            content,
            duration,
            mut warnings,
            metadata,
            ..
        } = outcome;
        let content = content
            .ok_or_else(|| RendererError::malformed("renderer reported success without content"))?;
        let safe = self
            .safety
            .process(content, request.format)
            .map_err(RendererError::from)?;
        warnings.extend(safe.report.warnings.iter().cloned());

        let mut cleaned = RenderOutcome::success(safe.content, request.format, name, duration);
        cleaned.warnings = warnings;
        cleaned.metadata = metadata;
        Ok(cleaned.with_metadata("safety", serde_json::to_value(&safe.report).unwrap_or_default()))
    }

    fn instance(&self, name: &str) -> Result<Arc<dyn Renderer>, RendererError> {
        let mut instances = mutex_lock(&self.instances, SOURCE, "instance");
        if let Some(existing) = instances.get(name) {
            return Ok(Arc::clone(existing));
        }
        let renderer: Arc<dyn Renderer> = match self.registry.create(name) {
            Ok(renderer) => Arc::from(renderer),
            Err(RegistryError::Construction { source, .. }) => return Err(source),
            Err(_) => return Err(RendererError::unavailable(name)),
        };
        instances.insert(name.to_string(), Arc::clone(&renderer));
        Ok(renderer)
    }

    fn unsupported(&self, request: &RenderRequest, elapsed: Duration) -> RenderFailure {
        let message = if request.required_capabilities.is_empty() {
            format!("no available renderer supports {} output", request.format)
        } else {
            let caps: Vec<&str> = request
                .required_capabilities
                .iter()
                .map(|cap| cap.as_str())
                .collect();
            format!(
                "no available renderer supports {} output with {}",
                request.format,
                caps.join(", ")
            )
        };
        let failure = PlainFailure::new("UnsupportedFormat", message)
            .with_hint(ErrorCategory::Configuration);
        let record = classify(&failure, ErrorContext::new().elapsed(elapsed));
        warn!(
            target = "application::orchestrator",
            op = "render",
            result = "unsupported_format",
            format = request.format.as_str(),
            error_code = %record.code,
            "No renderer can serve the request"
        );
        RenderFailure::UnsupportedFormat {
            format: request.format,
            required: request.required_capabilities.clone(),
            record,
        }
    }
}

impl Drop for RenderOrchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn trace_json(attempts: &[AttemptRecord]) -> serde_json::Value {
    serde_json::to_value(attempts).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{
        application::{
            classify::Severity,
            renderer::{FnFactory, RendererFactory},
        },
        domain::{RenderContent, RendererDescriptor, Theme},
    };

    #[derive(Clone)]
    enum Script {
        Svg(&'static str),
        Fail(fn() -> RendererError),
        Report(&'static str),
    }

    struct Fake {
        descriptor: RendererDescriptor,
        script: Script,
        calls: Arc<AtomicUsize>,
        cleanups: Arc<AtomicUsize>,
    }

    impl Renderer for Fake {
        fn describe(&self) -> RendererDescriptor {
            self.descriptor.clone()
        }

        fn render(&self, request: &RenderRequest) -> Result<RenderOutcome, RendererError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.script {
                Script::Svg(markup) => Ok(RenderOutcome::success(
                    RenderContent::Text((*markup).to_string()),
                    request.format,
                    &self.descriptor.name,
                    Duration::from_millis(1),
                )),
                Script::Fail(make) => Err(make()),
                Script::Report(message) => Ok(RenderOutcome::failure(
                    request.format,
                    &self.descriptor.name,
                    *message,
                    Duration::ZERO,
                )),
            }
        }

        fn is_available(&self) -> bool {
            true
        }

        fn cleanup(&self) {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Probe {
        calls: Arc<AtomicUsize>,
        cleanups: Arc<AtomicUsize>,
    }

    fn register(
        registry: &RendererRegistry,
        descriptor: RendererDescriptor,
        script: Script,
    ) -> Probe {
        let calls = Arc::new(AtomicUsize::new(0));
        let cleanups = Arc::new(AtomicUsize::new(0));
        let probe = Probe {
            calls: Arc::clone(&calls),
            cleanups: Arc::clone(&cleanups),
        };
        let build_descriptor = descriptor.clone();
        let name = descriptor.name.clone();
        let factory: Arc<dyn RendererFactory> = Arc::new(FnFactory::new(descriptor, move || {
            Ok(Box::new(Fake {
                descriptor: build_descriptor.clone(),
                script: script.clone(),
                calls: Arc::clone(&calls),
                cleanups: Arc::clone(&cleanups),
            }) as Box<dyn Renderer>)
        }));
        registry.register(name, factory, false).unwrap();
        probe
    }

    fn svg_renderer(name: &str, priority: u32) -> RendererDescriptor {
        RendererDescriptor::new(name, [OutputFormat::Svg]).with_priority(priority)
    }

    const GOOD: &str =
        r#"<svg xmlns="http://www.w3.org/2000/svg"><rect width="1" height="1"/></svg>"#;

    fn request() -> RenderRequest {
        RenderRequest::new("flowchart TD\n A-->B", OutputFormat::Svg)
    }

    #[test]
    fn first_success_stops_the_chain() {
        let registry = Arc::new(RendererRegistry::new());
        let first = register(
            &registry,
            svg_renderer("first", 1),
            Script::Fail(|| RendererError::network("reset by peer")),
        );
        let second = register(&registry, svg_renderer("second", 2), Script::Svg(GOOD));
        let third = register(&registry, svg_renderer("third", 3), Script::Svg(GOOD));
        let orchestrator = RenderOrchestrator::new(registry, RenderPolicy::default());

        let outcome = orchestrator.render(&request()).unwrap();
        assert_eq!(outcome.renderer_name, "second");
        assert_eq!(outcome.metadata["used_fallback"], json!(true));
        assert_eq!(outcome.metadata["failed_attempts"].as_array().map(Vec::len), Some(1));
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);
        assert_eq!(third.calls.load(Ordering::SeqCst), 0);

        let stats = orchestrator.stats();
        assert_eq!(stats.attempts, 2);
        assert_eq!(stats.fallback_uses, 1);
        assert_eq!(stats.renderer_usage.get("second"), Some(&1));
    }

    #[test]
    fn exhausted_chain_keeps_every_record_in_order() {
        let registry = Arc::new(RendererRegistry::new());
        register(
            &registry,
            svg_renderer("a", 1),
            Script::Fail(|| RendererError::network("dns lookup failed")),
        );
        register(&registry, svg_renderer("b", 2), Script::Report("backend crashed"));
        register(&registry, svg_renderer("c", 3), Script::Svg("<html>oops</html>"));
        let orchestrator = RenderOrchestrator::new(registry, RenderPolicy::default());

        let failure = orchestrator.render(&request()).unwrap_err();
        let attempts = failure.attempts();
        let names: Vec<&str> = attempts.iter().map(|a| a.renderer.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert_eq!(attempts[0].error.category, ErrorCategory::Network);
        assert_eq!(attempts[1].error.category, ErrorCategory::Rendering);
        assert_eq!(attempts[2].error.category, ErrorCategory::Rendering);
        assert_eq!(attempts[2].error.context.attempt_number, 3);
        assert_eq!(attempts[2].error.context.total_attempts, 3);

        let message = failure.to_string();
        assert!(message.contains("no <svg> root element"), "{message}");
        assert!(message.contains("a(network), b(rendering), c(rendering)"), "{message}");
        assert_eq!(failure.record().map(|r| r.related.len()), Some(3));
    }

    #[test]
    fn invalid_source_never_reaches_a_renderer() {
        let registry = Arc::new(RendererRegistry::new());
        let probe = register(&registry, svg_renderer("only", 1), Script::Svg(GOOD));
        let orchestrator = RenderOrchestrator::new(registry, RenderPolicy::default());

        let failure = orchestrator
            .render(&RenderRequest::new(
                "flowchart TD\n A[<script>alert(1)</script>]",
                OutputFormat::Svg,
            ))
            .unwrap_err();
        assert!(matches!(failure, RenderFailure::InvalidInput { .. }));
        assert_eq!(failure.category(), Some(ErrorCategory::Validation));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_chain_is_unsupported_format() {
        let registry = Arc::new(RendererRegistry::new());
        register(&registry, svg_renderer("svg-only", 1), Script::Svg(GOOD));
        let orchestrator = RenderOrchestrator::new(registry, RenderPolicy::default());

        let failure = orchestrator
            .render(&RenderRequest::new("flowchart TD\n A-->B", OutputFormat::Pdf))
            .unwrap_err();
        assert!(matches!(
            failure,
            RenderFailure::UnsupportedFormat {
                format: OutputFormat::Pdf,
                ..
            }
        ));
        assert_eq!(failure.category(), Some(ErrorCategory::Configuration));
    }

    #[test]
    fn candidates_without_required_capabilities_are_skipped() {
        let registry = Arc::new(RendererRegistry::new());
        let plain = register(&registry, svg_renderer("plain", 1), Script::Svg(GOOD));
        register(
            &registry,
            svg_renderer("themed", 2).with_capabilities([Capability::ThemeSupport]),
            Script::Svg(GOOD),
        );
        let orchestrator = RenderOrchestrator::new(registry, RenderPolicy::default());

        let outcome = orchestrator
            .render(&request().with_theme(Theme::named("dark")).requiring(Capability::ThemeSupport))
            .unwrap();
        assert_eq!(outcome.renderer_name, "themed");
        assert_eq!(plain.calls.load(Ordering::SeqCst), 0);
        assert!(orchestrator.stats().failed_attempts == 0);
    }

    #[test]
    fn renderers_limited_to_other_diagrams_are_skipped() {
        let registry = Arc::new(RendererRegistry::new());
        let graphviz = register(
            &registry,
            svg_renderer("graphviz", 1).with_diagram_types([DiagramType::Flowchart]),
            Script::Svg(GOOD),
        );
        register(&registry, svg_renderer("general", 2), Script::Svg(GOOD));
        let orchestrator = RenderOrchestrator::new(registry, RenderPolicy::default());

        let outcome = orchestrator
            .render(&RenderRequest::new("sequenceDiagram\n Alice->>Bob: hi", OutputFormat::Svg))
            .unwrap();
        assert_eq!(outcome.renderer_name, "general");
        assert_eq!(graphviz.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn skipped_candidates_do_not_count_as_attempts() {
        let registry = Arc::new(RendererRegistry::new());
        register(
            &registry,
            svg_renderer("flaky", 1),
            Script::Fail(|| RendererError::network("reset by peer")),
        );
        let sequence_only = register(
            &registry,
            svg_renderer("sequence-only", 2).with_diagram_types([DiagramType::Sequence]),
            Script::Svg(GOOD),
        );
        let orchestrator = RenderOrchestrator::new(registry, RenderPolicy::default());

        let failure = orchestrator.render(&request()).unwrap_err();
        let attempts = failure.attempts();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].error.context.attempt_number, 1);
        assert_eq!(attempts[0].error.context.total_attempts, 1);
        assert_eq!(attempts[0].error.severity, Severity::High);
        assert_eq!(sequence_only.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn every_candidate_skipped_is_unsupported() {
        let registry = Arc::new(RendererRegistry::new());
        let plain = register(&registry, svg_renderer("plain", 1), Script::Svg(GOOD));
        let orchestrator = RenderOrchestrator::new(registry, RenderPolicy::default());

        let failure = orchestrator
            .render(&request().requiring(Capability::ThemeSupport))
            .unwrap_err();
        assert!(matches!(failure, RenderFailure::UnsupportedFormat { .. }));
        assert_eq!(plain.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn instances_are_reused_and_cleaned_up_once() {
        let registry = Arc::new(RendererRegistry::new());
        let probe = register(&registry, svg_renderer("only", 1), Script::Svg(GOOD));
        let orchestrator = RenderOrchestrator::new(Arc::clone(&registry), RenderPolicy::default());

        orchestrator.render(&request()).unwrap();
        orchestrator.render(&request().with_theme(Theme::named("forest"))).unwrap();
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);

        // Availability probes clean up their own instances.
        let probes_so_far = probe.cleanups.load(Ordering::SeqCst);
        drop(orchestrator);
        assert_eq!(probe.cleanups.load(Ordering::SeqCst), probes_so_far + 1);
    }

    #[test]
    fn render_outcome_reports_failures_as_values() {
        let registry = Arc::new(RendererRegistry::new());
        register(
            &registry,
            svg_renderer("down", 1),
            Script::Fail(|| RendererError::network("connection refused")),
        );
        let orchestrator = RenderOrchestrator::new(registry, RenderPolicy::default());

        let outcome = orchestrator.render_outcome(&request());
        assert!(!outcome.is_success());
        assert_eq!(outcome.renderer_name, "down");
        assert!(outcome.error().is_some_and(|e| e.contains("connection refused")));
        assert_eq!(outcome.metadata["error"]["category"], json!("network"));
        assert_eq!(outcome.metadata["attempts"].as_array().map(Vec::len), Some(1));
    }
}
