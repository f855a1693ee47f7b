use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use routecodex_common::{EntryEndpoint, GatewayError, ProviderOrigin, RouteTarget, TargetKey};
use routecodex_protocol::Proto;
use routecodex_provider_core::{
    PipelineConfig, Provider, ProviderRequest, ResponseMetadata, SseStream,
};
use routecodex_provider_impl::ProviderFactory;
use routecodex_switch::{CompatOptions, ShapeFilter, apply_compatibility, switch_request, switch_response};

const PIPELINE_CACHE_CAP: usize = 100;
const EVICT_BATCH: usize = PIPELINE_CACHE_CAP / 10;

#[derive(Debug)]
pub enum PipelineOutput {
    Json {
        body: JsonValue,
        metadata: ResponseMetadata,
    },
    Stream {
        stream: SseStream,
        metadata: ResponseMetadata,
    },
}

/// One per-target stage chain: LLMSwitch → Compatibility → Provider.
pub struct Pipeline {
    key: TargetKey,
    config: PipelineConfig,
    compat: CompatOptions,
    provider: Arc<dyn Provider>,
}

impl Pipeline {
    pub fn key(&self) -> &TargetKey {
        &self.key
    }

    fn origin(&self) -> ProviderOrigin {
        ProviderOrigin {
            vendor: self.config.provider.provider_type.clone(),
            base_url: self.config.provider.base_url.clone().unwrap_or_default(),
            module_type: "provider".to_string(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn execute(
        &self,
        entry: Proto,
        entry_endpoint: EntryEndpoint,
        request_id: String,
        orig_model: String,
        body: JsonValue,
        wants_stream: bool,
        session_id: Option<String>,
    ) -> Result<PipelineOutput, GatewayError> {
        // Stage 1: protocol switch into the provider's wire protocol.
        let provider_proto = self.config.protocols.output;
        let mut switched = switch_request(entry, provider_proto, body).map_err(|err| {
            let mut gateway = GatewayError::config(err.to_string());
            gateway.status_code = Some(400);
            gateway
        })?;

        // Stage 2: provider-family compatibility adjustments.
        apply_compatibility(&mut switched, &self.compat);

        // Stage 3: provider send.
        let request = ProviderRequest {
            body: switched,
            entry_endpoint,
            request_id,
            orig_model: orig_model.clone(),
            wants_stream,
            session_id,
        };
        let reply = self
            .provider
            .send_request(request)
            .await
            .map_err(|err| err.into_gateway(self.origin()))?;

        // Postprocess: translate back to the entry protocol and restore the
        // inbound model name.
        match reply {
            routecodex_provider_core::ProviderReply::Json(response) => {
                let mut data =
                    switch_response(provider_proto, entry, response.data).map_err(|err| {
                        GatewayError::new(
                            routecodex_common::ErrorKind::Unknown,
                            format!("response translation failed: {err}"),
                        )
                    })?;
                if entry != Proto::Gemini
                    && let Some(map) = data.as_object_mut()
                {
                    map.insert("model".to_string(), JsonValue::from(orig_model));
                }
                Ok(PipelineOutput::Json {
                    body: data,
                    metadata: response.metadata,
                })
            }
            routecodex_provider_core::ProviderReply::Sse { stream, metadata } => {
                Ok(PipelineOutput::Stream { stream, metadata })
            }
        }
    }
}

struct CacheSlot {
    pipeline: Arc<Pipeline>,
    last_used: u64,
}

/// Lazily built pipeline instances keyed by `(target, runtime_key)`, LRU
/// bounded. Eviction is batched and triggers fire-and-forget provider
/// cleanup.
pub struct PipelineManager {
    configs: BTreeMap<String, PipelineConfig>,
    shape_filter_dir: Option<PathBuf>,
    factory: ProviderFactory,
    cache: Mutex<HashMap<String, CacheSlot>>,
    clock: AtomicU64,
}

impl PipelineManager {
    pub fn new(
        configs: BTreeMap<String, PipelineConfig>,
        shape_filter_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            configs,
            shape_filter_dir,
            factory: ProviderFactory::new(),
            cache: Mutex::new(HashMap::new()),
            clock: AtomicU64::new(0),
        }
    }

    pub async fn get_or_create(
        &self,
        target: &RouteTarget,
        runtime_key: &str,
    ) -> Result<Arc<Pipeline>, GatewayError> {
        let key = target.key();
        let cache_key = format!("{key}|{runtime_key}");
        let tick = self.clock.fetch_add(1, Ordering::Relaxed);

        let mut cache = self.cache.lock().await;
        if let Some(slot) = cache.get_mut(&cache_key) {
            slot.last_used = tick;
            return Ok(slot.pipeline.clone());
        }

        let config = self.configs.get(key.as_str()).ok_or_else(|| {
            GatewayError::config(format!("no pipeline config for target {key}"))
        })?;

        let compat = CompatOptions {
            profile: config.compatibility.profile.clone(),
            shape_filter: self.load_shape_filter(config).await,
        };
        let provider = self
            .factory
            .get_or_create(config, &target.model_id, runtime_key)
            .await
            .map_err(|err| {
                err.into_gateway(ProviderOrigin {
                    vendor: config.provider.provider_type.clone(),
                    base_url: config.provider.base_url.clone().unwrap_or_default(),
                    module_type: "factory".to_string(),
                })
            })?;

        let pipeline = Arc::new(Pipeline {
            key: key.clone(),
            config: config.clone(),
            compat,
            provider,
        });
        debug!(event = "pipeline_created", key = %key, runtime_key = %runtime_key);
        cache.insert(
            cache_key,
            CacheSlot {
                pipeline: pipeline.clone(),
                last_used: tick,
            },
        );

        if cache.len() > PIPELINE_CACHE_CAP {
            evict_oldest(&mut cache, EVICT_BATCH.max(1));
        }
        Ok(pipeline)
    }

    /// Resolve the profile's filter file: an explicit `shape_filter_file`
    /// wins; otherwise `shape-filters.<profile>.json` in the filter dir is
    /// tried. A missing conventional file is normal, a malformed one is not.
    async fn load_shape_filter(&self, config: &PipelineConfig) -> Option<ShapeFilter> {
        let (path, explicit) = match &config.compatibility.shape_filter_file {
            Some(file) => {
                let path = match &self.shape_filter_dir {
                    Some(dir) => dir.join(file),
                    None => PathBuf::from(file),
                };
                (path, true)
            }
            None => {
                let profile = &config.compatibility.profile;
                if profile.is_empty() {
                    return None;
                }
                let dir = self.shape_filter_dir.as_ref()?;
                (dir.join(ShapeFilter::file_name(profile)), false)
            }
        };

        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => match ShapeFilter::from_json(&raw) {
                Ok(filter) => Some(filter),
                Err(err) => {
                    warn!(event = "shape_filter_malformed", path = %path.display(), error = %err);
                    None
                }
            },
            Err(err) => {
                if explicit {
                    warn!(event = "shape_filter_missing", path = %path.display(), error = %err);
                }
                None
            }
        }
    }

    pub async fn shutdown(&self) {
        self.cache.lock().await.clear();
        self.factory.shutdown().await;
    }
}

fn evict_oldest(cache: &mut HashMap<String, CacheSlot>, count: usize) {
    let mut by_age: Vec<(String, u64)> = cache
        .iter()
        .map(|(key, slot)| (key.clone(), slot.last_used))
        .collect();
    by_age.sort_by_key(|(_, last_used)| *last_used);
    for (key, _) in by_age.into_iter().take(count) {
        if let Some(slot) = cache.remove(&key) {
            warn!(event = "pipeline_evicted", key = %key);
            let provider = slot.pipeline.provider.clone();
            tokio::spawn(async move {
                let _ = provider.cleanup().await;
            });
        }
    }
}
