use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::{
    application::orchestrator::{RENDER_ATTEMPT_TOTAL, RENDER_FALLBACK_TOTAL, RENDER_MS},
    cache::{CACHE_EVICT_TOTAL, CACHE_EXPIRED_TOTAL, CACHE_HIT_TOTAL, CACHE_MISS_TOTAL},
    config::{LogFormat, LoggingSettings},
};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
/// Events go to stderr so rendered output can be piped from stdout.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            RENDER_ATTEMPT_TOTAL,
            Unit::Count,
            "Render attempts by renderer and outcome."
        );
        describe_counter!(
            RENDER_FALLBACK_TOTAL,
            Unit::Count,
            "Successful renders served by a fallback candidate."
        );
        describe_histogram!(
            RENDER_MS,
            Unit::Milliseconds,
            "Per-attempt render latency in milliseconds."
        );
        describe_counter!(CACHE_HIT_TOTAL, Unit::Count, "Total number of result-cache hits.");
        describe_counter!(
            CACHE_MISS_TOTAL,
            Unit::Count,
            "Total number of result-cache misses."
        );
        describe_counter!(
            CACHE_EXPIRED_TOTAL,
            Unit::Count,
            "Result-cache entries dropped on read because their TTL had passed."
        );
        describe_counter!(
            CACHE_EVICT_TOTAL,
            Unit::Count,
            "Result-cache evictions due to capacity."
        );
    });
}
