use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use routecodex_provider_core::{PipelineConfig, Provider, ProviderError, ProviderResult};

use crate::providers::anthropic::AnthropicProvider;
use crate::providers::antigravity::AntigravityProvider;
use crate::providers::deepseek::DeepSeekProvider;
use crate::providers::gemini::GeminiProvider;
use crate::providers::geminicli::GeminiCliProvider;
use crate::providers::glm::GlmProvider;
use crate::providers::iflow::IflowProvider;
use crate::providers::lmstudio::LmStudioProvider;
use crate::providers::openai::OpenAIProvider;
use crate::providers::qwen::QwenProvider;

const INSTANCE_CACHE_CAP: usize = 100;
/// Evict 10% of the cache when it overflows.
const EVICT_BATCH: usize = INSTANCE_CACHE_CAP / 10;

/// Construct a provider from its factory discriminator. Unknown types are a
/// configuration error surfaced at startup, not at request time.
pub fn create_provider(
    config: &PipelineConfig,
    wire_model: &str,
) -> ProviderResult<Arc<dyn Provider>> {
    let config = config.clone();
    let wire_model = wire_model.to_string();
    let provider: Arc<dyn Provider> = match config.provider.provider_type.as_str() {
        "openai" => Arc::new(OpenAIProvider::new(config, wire_model)?),
        "anthropic" => Arc::new(AnthropicProvider::new(config, wire_model)?),
        "glm" => Arc::new(GlmProvider::new(config, wire_model)?),
        "qwen" => Arc::new(QwenProvider::new(config, wire_model)?),
        "iflow" => Arc::new(IflowProvider::new(config, wire_model)?),
        "deepseek" => Arc::new(DeepSeekProvider::new(config, wire_model)?),
        "lmstudio" => Arc::new(LmStudioProvider::new(config, wire_model)?),
        "gemini" => Arc::new(GeminiProvider::new(config, wire_model)?),
        "geminicli" => Arc::new(GeminiCliProvider::new(config, wire_model)?),
        "antigravity" => Arc::new(AntigravityProvider::new(config, wire_model)?),
        other => {
            return Err(ProviderError::InvalidConfig(format!(
                "unknown provider type: {other}"
            )));
        }
    };
    Ok(provider)
}

struct CacheEntry {
    provider: Arc<dyn Provider>,
    last_used: u64,
}

/// Process-wide provider-instance cache. Keyed by the deterministic config
/// signature; LRU-bounded with batched eviction, evicted instances get a
/// fire-and-forget `cleanup()`.
pub struct ProviderFactory {
    entries: tokio::sync::Mutex<HashMap<String, CacheEntry>>,
    clock: std::sync::atomic::AtomicU64,
}

impl ProviderFactory {
    pub fn new() -> Self {
        Self {
            entries: tokio::sync::Mutex::new(HashMap::new()),
            clock: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub async fn get_or_create(
        &self,
        config: &PipelineConfig,
        wire_model: &str,
        runtime_key: &str,
    ) -> ProviderResult<Arc<dyn Provider>> {
        let signature = format!("{}|{}", config.instance_signature(runtime_key), wire_model);
        let tick = self
            .clock
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(&signature) {
            entry.last_used = tick;
            return Ok(entry.provider.clone());
        }

        let provider = create_provider(config, wire_model)?;
        provider.initialize().await?;
        info!(
            event = "provider_instance_created",
            provider = %config.provider.provider_type,
            model = %wire_model,
        );
        entries.insert(
            signature,
            CacheEntry {
                provider: provider.clone(),
                last_used: tick,
            },
        );

        if entries.len() > INSTANCE_CACHE_CAP {
            evict_oldest(&mut entries, EVICT_BATCH.max(1));
        }
        Ok(provider)
    }

    pub async fn shutdown(&self) {
        let mut entries = self.entries.lock().await;
        for (_, entry) in entries.drain() {
            let provider = entry.provider;
            tokio::spawn(async move {
                let _ = provider.cleanup().await;
            });
        }
    }
}

impl Default for ProviderFactory {
    fn default() -> Self {
        Self::new()
    }
}

fn evict_oldest(entries: &mut HashMap<String, CacheEntry>, count: usize) {
    let mut by_age: Vec<(String, u64)> = entries
        .iter()
        .map(|(key, entry)| (key.clone(), entry.last_used))
        .collect();
    by_age.sort_by_key(|(_, last_used)| *last_used);
    for (key, _) in by_age.into_iter().take(count) {
        if let Some(entry) = entries.remove(&key) {
            warn!(event = "provider_instance_evicted", key = %key);
            let provider = entry.provider;
            tokio::spawn(async move {
                let _ = provider.cleanup().await;
            });
        }
    }
}
