use async_trait::async_trait;

use routecodex_provider_core::{
    PipelineConfig, Provider, ProviderReply, ProviderRequest, ProviderResult, ProviderStatus,
};

use super::upstream::UpstreamCore;

const PROVIDER_NAME: &str = "openai";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Plain OpenAI-compatible upstream; also the base shape for self-hosted
/// gateways that speak the same wire format.
pub struct OpenAIProvider {
    core: UpstreamCore,
}

impl OpenAIProvider {
    pub fn new(config: PipelineConfig, wire_model: String) -> ProviderResult<Self> {
        Ok(Self {
            core: UpstreamCore::new(PROVIDER_NAME, config, wire_model, DEFAULT_BASE_URL, None)?,
        })
    }
}

#[async_trait]
impl Provider for OpenAIProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn initialize(&self) -> ProviderResult<()> {
        self.core.mark_initialized();
        Ok(())
    }

    async fn send_request(&self, request: ProviderRequest) -> ProviderResult<ProviderReply> {
        let body = self.core.preprocess_flat_body(&request);
        let timeout = self.core.resolve_timeout(None, None);
        self.core
            .send_json(&request, "/chat/completions", body, &[], timeout)
            .await
    }

    async fn check_health(&self) -> ProviderResult<bool> {
        self.core.check_health_get("/models").await
    }

    async fn cleanup(&self) -> ProviderResult<()> {
        Ok(())
    }

    fn status(&self) -> ProviderStatus {
        self.core.status()
    }
}
