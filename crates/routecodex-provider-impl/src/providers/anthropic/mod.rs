use async_trait::async_trait;

use routecodex_provider_core::{
    PipelineConfig, Provider, ProviderReply, ProviderRequest, ProviderResult, ProviderStatus,
};

use super::upstream::{AuthStyle, UpstreamCore};

const PROVIDER_NAME: &str = "anthropic";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Native Anthropic Messages upstream. The switch stage hands this provider
/// an Anthropic-shaped body; auth rides in `x-api-key`.
pub struct AnthropicProvider {
    core: UpstreamCore,
}

impl AnthropicProvider {
    pub fn new(config: PipelineConfig, wire_model: String) -> ProviderResult<Self> {
        Ok(Self {
            core: UpstreamCore::new(PROVIDER_NAME, config, wire_model, DEFAULT_BASE_URL, None)?
                .with_auth_style(AuthStyle::XApiKey),
        })
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
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
            .send_json(
                &request,
                "/v1/messages",
                body,
                &[("anthropic-version", ANTHROPIC_VERSION)],
                timeout,
            )
            .await
    }

    async fn check_health(&self) -> ProviderResult<bool> {
        self.core.check_health_get("/v1/models").await
    }

    async fn cleanup(&self) -> ProviderResult<()> {
        Ok(())
    }

    fn status(&self) -> ProviderStatus {
        self.core.status()
    }
}
