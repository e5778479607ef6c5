use std::{collections::BTreeMap, fmt};

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::domain::{OutputFormat, RenderRequest, Theme};

/// Marker used when no renderer was pinned by the caller.
pub const AUTO_RENDERER: &str = "auto";

/// Request fingerprint: lowercase hex SHA-256 of a canonical JSON document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

#[derive(Serialize)]
struct KeyMaterial<'a> {
    source: &'a str,
    theme: Option<&'a Theme>,
    config: BTreeMap<&'a str, Value>,
    format: OutputFormat,
    renderer: &'a str,
}

impl CacheKey {
    /// Fingerprints `request` with its normalized `source`.
    pub fn for_request(request: &RenderRequest, source: &str) -> Self {
        let renderer = request.preferred_renderer.as_deref().unwrap_or(AUTO_RENDERER);
        let material = KeyMaterial {
            source,
            theme: request.theme.as_ref(),
            config: request
                .config
                .iter()
                .map(|(key, value)| (key.as_str(), canonical(value)))
                .collect(),
            format: request.format,
            renderer,
        };
        let canonical =
            serde_json::to_vec(&material).unwrap_or_else(|_| source.as_bytes().to_vec());

        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Accepts only strings shaped like a fingerprint, for keys read back from disk.
    pub fn parse(value: &str) -> Option<Self> {
        let valid = value.len() == 64
            && value
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(value.to_string()))
    }
}

/// Rebuilds nested objects with sorted keys.
fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, canonical(v))).collect();
            Value::Object(sorted.into_iter().map(|(k, v)| (k.clone(), v)).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
