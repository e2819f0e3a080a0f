//! Image-support detection per model.
//!
//! Asks the server (`POST /api/show`) for the model's capability list and
//! falls back to a model-name heuristic when the list is missing or the query
//! fails. Confirmed answers are cached for the life of the process; `Unknown`
//! is retried on the next call.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use reqwest::Client as HttpClient;

use super::types::{ShowRequest, ShowResponse};

/// Capability marker for image input in Ollama's capability list.
const VISION_CAPABILITY: &str = "vision";

/// Timeout for the metadata query. The probe must never hold up a chat turn
/// for long.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default model-name substrings that indicate a vision model.
pub const DEFAULT_VISION_KEYWORDS: &[&str] = &[
    "llava",
    "bakllava",
    "vision",
    "moondream",
    "minicpm-v",
    "qwen2.5vl",
    "qwen2-vl",
    "qwen3-vl",
    "gemma3",
    "llama4",
    "granite3.2-vision",
    "mistral-small3.1",
];

/// Tri-state answer of the probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSupport {
    Supported,
    Unsupported,
    Unknown,
}

impl ImageSupport {
    fn from_cached(supported: bool) -> Self {
        if supported {
            ImageSupport::Supported
        } else {
            ImageSupport::Unsupported
        }
    }
}

/// Shared model-name → supported map. Cloning shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct CapabilityCache {
    inner: Arc<RwLock<HashMap<String, bool>>>,
}

impl CapabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, model: &str) -> Option<ImageSupport> {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.get(model).copied().map(ImageSupport::from_cached)
    }

    /// Record a confirmed result. `Unknown` is not stored.
    pub fn insert(&self, model: &str, support: ImageSupport) {
        let supported = match support {
            ImageSupport::Supported => true,
            ImageSupport::Unsupported => false,
            ImageSupport::Unknown => return,
        };
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        map.insert(model.to_string(), supported);
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Determines whether a model accepts image input.
#[derive(Debug, Clone)]
pub struct CapabilityProbe {
    cache: CapabilityCache,
    keywords: Vec<String>,
}

impl CapabilityProbe {
    pub fn new(cache: CapabilityCache, keywords: Vec<String>) -> Self {
        let keywords = keywords.into_iter().map(|k| k.to_lowercase()).collect();
        Self { cache, keywords }
    }

    pub fn cache(&self) -> &CapabilityCache {
        &self.cache
    }

    /// Query (or recall) image support for `model` on the server at `host`.
    ///
    /// Never fails: network and decode problems degrade to the heuristic.
    pub async fn supports_images(&self, http: &HttpClient, host: &str, model: &str) -> ImageSupport {
        if let Some(cached) = self.cache.get(model) {
            return cached;
        }

        let result = match self.query_capabilities(http, host, model).await {
            Ok(Some(caps)) if !caps.is_empty() => {
                if caps.iter().any(|c| c.eq_ignore_ascii_case(VISION_CAPABILITY)) {
                    ImageSupport::Supported
                } else {
                    ImageSupport::Unsupported
                }
            }
            Ok(_) => self.heuristic(model),
            Err(reason) => {
                tracing::warn!(model = %model, reason = %reason, "capability query failed, using name heuristic");
                self.heuristic(model)
            }
        };

        tracing::debug!(model = %model, support = ?result, "image support probed");
        self.cache.insert(model, result);
        result
    }

    /// Name-based guess: a keyword match means supported, anything else is
    /// unknown rather than unsupported.
    pub fn heuristic(&self, model: &str) -> ImageSupport {
        let name = model.to_lowercase();
        if self.keywords.iter().any(|k| name.contains(k.as_str())) {
            ImageSupport::Supported
        } else {
            ImageSupport::Unknown
        }
    }

    async fn query_capabilities(
        &self,
        http: &HttpClient,
        host: &str,
        model: &str,
    ) -> Result<Option<Vec<String>>, String> {
        let url = format!("{host}/api/show");
        let response = http
            .post(&url)
            .json(&ShowRequest { name: model })
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("HTTP {} from {url}", response.status().as_u16()));
        }

        let show: ShowResponse = response.json().await.map_err(|e| e.to_string())?;
        Ok(show.capabilities)
    }
}

impl Default for CapabilityProbe {
    fn default() -> Self {
        Self::new(
            CapabilityCache::new(),
            DEFAULT_VISION_KEYWORDS.iter().map(|k| k.to_string()).collect(),
        )
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
