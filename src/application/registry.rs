//! Catalog of renderer factories with capability filtering, availability
//! probing and fallback-chain construction.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    cache::lock::{rw_read, rw_write},
    domain::{Capability, DomainError, OutputFormat, RendererDescriptor},
};

use super::renderer::{Renderer, RendererError, RendererFactory};

const SOURCE: &str = "application::registry";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("renderer `{name}` is already registered")]
    DuplicateRegistration { name: String },
    #[error("renderer `{name}` has an invalid descriptor: {source}")]
    InvalidDescriptor {
        name: String,
        #[source]
        source: DomainError,
    },
    #[error("renderer `{name}` is not registered")]
    UnknownRenderer { name: String },
    #[error("failed to construct renderer `{name}`: {source}")]
    Construction {
        name: String,
        #[source]
        source: RendererError,
    },
}

/// Filters for [`RendererRegistry::list_renderers`]; empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct RendererFilter {
    pub format: Option<OutputFormat>,
    pub capabilities: BTreeSet<Capability>,
    pub available_only: bool,
}

impl RendererFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn format(mut self, format: OutputFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn capabilities(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities.extend(capabilities);
        self
    }

    pub fn available_only(mut self) -> Self {
        self.available_only = true;
        self
    }

    fn matches(&self, descriptor: &RendererDescriptor) -> bool {
        self.format.is_none_or(|format| descriptor.supports_format(format))
            && self.capabilities.is_subset(&descriptor.capabilities)
    }
}

/// Ordered, duplicate-free list of renderer names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FallbackChain(Vec<String>);

impl FallbackChain {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut chain = Vec::new();
        for name in names {
            let name = name.into();
            if !chain.contains(&name) {
                chain.push(name);
            }
        }
        Self(chain)
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|entry| entry == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// Names registered and skipped during [`RendererRegistry::auto_discover`].
#[derive(Debug, Clone, Default)]
pub struct DiscoveryReport {
    pub registered: Vec<String>,
    pub skipped: Vec<(String, String)>,
    pub already_discovered: bool,
}

/// A built-in implementation offered to auto-discovery.
pub struct DiscoveryCandidate {
    pub name: String,
    build: Box<dyn FnOnce() -> Result<Arc<dyn RendererFactory>, RendererError> + Send>,
}

impl DiscoveryCandidate {
    pub fn new<F>(name: impl Into<String>, build: F) -> Self
    where
        F: FnOnce() -> Result<Arc<dyn RendererFactory>, RendererError> + Send + 'static,
    {
        Self {
            name: name.into(),
            build: Box::new(build),
        }
    }
}

#[derive(Clone)]
struct RegistryEntry {
    descriptor: RendererDescriptor,
    factory: Arc<dyn RendererFactory>,
    order: u64,
}

/// Releases a probe instance regardless of how probing ended.
struct ProbeGuard(Box<dyn Renderer>);

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        self.0.cleanup();
    }
}

/// Process-wide renderer catalog, read-mostly after start-up discovery.
#[derive(Default)]
pub struct RendererRegistry {
    entries: RwLock<HashMap<String, RegistryEntry>>,
    next_order: AtomicU64,
    discovered: AtomicBool,
}

impl RendererRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` under `name`. Overriding keeps the original
    /// registration slot for tie-breaking.
    pub fn register(
        &self,
        name: impl Into<String>,
        factory: Arc<dyn RendererFactory>,
        override_existing: bool,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        let mut descriptor = factory.descriptor();
        descriptor.name = name.clone();
        descriptor
            .validate()
            .map_err(|source| RegistryError::InvalidDescriptor {
                name: name.clone(),
                source,
            })?;

        let mut entries = rw_write(&self.entries, SOURCE, "register");
        let order = match entries.get(&name) {
            Some(_) if !override_existing => {
                return Err(RegistryError::DuplicateRegistration { name });
            }
            Some(existing) => existing.order,
            None => self.next_order.fetch_add(1, Ordering::Relaxed),
        };

        info!(
            target = "application::registry",
            op = "register",
            renderer = %name,
            priority = descriptor.priority,
            overridden = override_existing && entries.contains_key(&name),
            "Renderer registered"
        );

        entries.insert(
            name,
            RegistryEntry {
                descriptor,
                factory,
                order,
            },
        );
        Ok(())
    }

    pub fn descriptor(&self, name: &str) -> Option<RendererDescriptor> {
        rw_read(&self.entries, SOURCE, "descriptor")
            .get(name)
            .map(|entry| entry.descriptor.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        rw_read(&self.entries, SOURCE, "contains").contains_key(name)
    }

    /// Every registered name, in priority order.
    pub fn names(&self) -> Vec<String> {
        self.sorted_candidates(&RendererFilter::any())
            .into_iter()
            .map(|(name, _)| name)
            .collect()
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Constructs a fresh instance of `name`.
    pub fn create(&self, name: &str) -> Result<Box<dyn Renderer>, RegistryError> {
        let factory = rw_read(&self.entries, SOURCE, "create")
            .get(name)
            .map(|entry| Arc::clone(&entry.factory))
            .ok_or_else(|| RegistryError::UnknownRenderer {
                name: name.to_string(),
            })?;
        factory.create().map_err(|source| RegistryError::Construction {
            name: name.to_string(),
            source,
        })
    }

    /// Names matching `filter`, by priority tier then registration order.
    pub fn list_renderers(&self, filter: &RendererFilter) -> Vec<String> {
        let candidates = self.sorted_candidates(filter);
        candidates
            .into_iter()
            .filter(|(name, entry)| !filter.available_only || probe(name, entry))
            .map(|(name, _)| name)
            .collect()
    }

    /// First available renderer for `format` with all `required` capabilities.
    pub fn get_best_renderer(
        &self,
        format: OutputFormat,
        required: &BTreeSet<Capability>,
    ) -> Option<String> {
        let filter = RendererFilter::any()
            .format(format)
            .capabilities(required.iter().copied())
            .available_only();
        self.sorted_candidates(&filter)
            .into_iter()
            .find(|(name, entry)| probe(name, entry))
            .map(|(name, _)| name)
    }

    /// Available renderers for `format`, `preferred` first when it is among them.
    pub fn build_fallback_chain(
        &self,
        format: OutputFormat,
        preferred: Option<&str>,
        max_size: usize,
    ) -> FallbackChain {
        let mut names = self.list_renderers(&RendererFilter::any().format(format).available_only());
        if let Some(preferred) = preferred
            && let Some(position) = names.iter().position(|name| name == preferred)
        {
            let name = names.remove(position);
            names.insert(0, name);
        }
        names.truncate(max_size);

        let chain = FallbackChain::new(names);
        debug!(
            target = "application::registry",
            op = "build_fallback_chain",
            format = format.as_str(),
            preferred = preferred.unwrap_or(""),
            chain = ?chain.names(),
            "Fallback chain built"
        );
        chain
    }

    /// Registers every candidate once per registry. Candidates that fail to
    /// build or register are logged and skipped.
    pub fn auto_discover<I>(&self, candidates: I) -> DiscoveryReport
    where
        I: IntoIterator<Item = DiscoveryCandidate>,
    {
        if self
            .discovered
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return DiscoveryReport {
                already_discovered: true,
                ..DiscoveryReport::default()
            };
        }

        let mut report = DiscoveryReport::default();
        for candidate in candidates {
            let DiscoveryCandidate { name, build } = candidate;
            let outcome = build()
                .map_err(|err| err.to_string())
                .and_then(|factory| {
                    self.register(name.clone(), factory, false)
                        .map_err(|err| err.to_string())
                });
            match outcome {
                Ok(()) => report.registered.push(name),
                Err(reason) => {
                    warn!(
                        target = "application::registry",
                        op = "auto_discover",
                        renderer = %name,
                        result = "skipped",
                        error = %reason,
                        "Skipping renderer during discovery"
                    );
                    report.skipped.push((name, reason));
                }
            }
        }

        info!(
            target = "application::registry",
            op = "auto_discover",
            registered = report.registered.len(),
            skipped = report.skipped.len(),
            "Renderer discovery finished"
        );
        report
    }

    fn sorted_candidates(&self, filter: &RendererFilter) -> Vec<(String, RegistryEntry)> {
        let mut candidates: Vec<(String, RegistryEntry)> =
            rw_read(&self.entries, SOURCE, "sorted_candidates")
                .iter()
                .filter(|(_, entry)| filter.matches(&entry.descriptor))
                .map(|(name, entry)| (name.clone(), entry.clone()))
                .collect();
        candidates.sort_by_key(|(_, entry)| (entry.descriptor.priority, entry.order));
        candidates
    }
}

/// Builds a throwaway instance and asks it whether it can run.
fn probe(name: &str, entry: &RegistryEntry) -> bool {
    match entry.factory.create() {
        Ok(instance) => {
            let guard = ProbeGuard(instance);
            let available = guard.0.is_available();
            debug!(
                target = "application::registry",
                op = "probe",
                renderer = name,
                available,
                "Availability probed"
            );
            available
        }
        Err(err) => {
            debug!(
                target = "application::registry",
                op = "probe",
                renderer = name,
                available = false,
                error = %err,
                "Probe instance could not be constructed"
            );
            false
        }
    }
}
