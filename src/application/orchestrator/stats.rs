use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use serde::Serialize;

pub const RENDER_ATTEMPT_TOTAL: &str = "diagram_relay_render_attempt_total";
pub const RENDER_FALLBACK_TOTAL: &str = "diagram_relay_render_fallback_total";
pub const RENDER_MS: &str = "diagram_relay_render_ms";

/// Running totals for one orchestrator. Counters move only once an attempt
/// has concluded.
#[derive(Debug, Default)]
pub struct RenderStats {
    requests: AtomicU64,
    attempts: AtomicU64,
    successful_renders: AtomicU64,
    failed_renders: AtomicU64,
    failed_attempts: AtomicU64,
    fallback_uses: AtomicU64,
    cache_hits: AtomicU64,
    renderer_usage: DashMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub attempts: u64,
    pub successful_renders: u64,
    pub failed_renders: u64,
    pub failed_attempts: u64,
    pub fallback_uses: u64,
    pub cache_hits: u64,
    pub renderer_usage: BTreeMap<String, u64>,
}

impl RenderStats {
    pub(crate) fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        self.failed_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_success(&self, renderer: &str, used_fallback: bool) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        self.successful_renders.fetch_add(1, Ordering::Relaxed);
        if used_fallback {
            self.fallback_uses.fetch_add(1, Ordering::Relaxed);
        }
        *self.renderer_usage.entry(renderer.to_string()).or_insert(0) += 1;
    }

    pub(crate) fn record_failed_render(&self) {
        self.failed_renders.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            successful_renders: self.successful_renders.load(Ordering::Relaxed),
            failed_renders: self.failed_renders.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            fallback_uses: self.fallback_uses.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            renderer_usage: self
                .renderer_usage
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_events() {
        let stats = RenderStats::default();
        stats.record_request();
        stats.record_failed_attempt();
        stats.record_success("kroki", true);
        stats.record_request();
        stats.record_cache_hit();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.requests, 2);
        assert_eq!(snapshot.attempts, 2);
        assert_eq!(snapshot.failed_attempts, 1);
        assert_eq!(snapshot.fallback_uses, 1);
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.renderer_usage.get("kroki"), Some(&1));
    }
}
