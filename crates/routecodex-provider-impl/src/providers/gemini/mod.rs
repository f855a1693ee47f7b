use async_trait::async_trait;
use serde_json::Value as JsonValue;

use routecodex_provider_core::{
    PipelineConfig, Provider, ProviderReply, ProviderRequest, ProviderResult, ProviderStatus,
};

use super::upstream::{AuthStyle, UpstreamCore};

const PROVIDER_NAME: &str = "gemini";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Public Generative Language API, API-key authenticated. The model rides
/// in the URL; the body is already Gemini-shaped after the switch stage.
pub struct GeminiProvider {
    core: UpstreamCore,
}

impl GeminiProvider {
    pub fn new(config: PipelineConfig, wire_model: String) -> ProviderResult<Self> {
        Ok(Self {
            core: UpstreamCore::new(PROVIDER_NAME, config, wire_model, DEFAULT_BASE_URL, None)?
                .with_auth_style(AuthStyle::GoogApiKey),
        })
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn initialize(&self) -> ProviderResult<()> {
        self.core.mark_initialized();
        Ok(())
    }

    async fn send_request(&self, request: ProviderRequest) -> ProviderResult<ProviderReply> {
        let mut body = request.body.clone();
        shape_gemini_body(&mut body, &self.core);
        let path = format!("/v1beta/models/{}:generateContent", self.core.wire_model);
        let timeout = self.core.resolve_timeout(None, None);
        self.core.send_json(&request, &path, body, &[], timeout).await
    }

    async fn check_health(&self) -> ProviderResult<bool> {
        self.core.check_health_get("/v1beta/models").await
    }

    async fn cleanup(&self) -> ProviderResult<()> {
        Ok(())
    }

    fn status(&self) -> ProviderStatus {
        self.core.status()
    }
}

/// Strip envelope fields and settle the output-token cap inside
/// `generationConfig` with the usual precedence.
pub(crate) fn shape_gemini_body(body: &mut JsonValue, core: &UpstreamCore) {
    let Some(map) = body.as_object_mut() else {
        return;
    };
    map.remove("metadata");
    map.remove("_metadata");
    map.remove("stream");
    map.remove("model");

    let requested = map
        .get("generationConfig")
        .and_then(|config| config.get("maxOutputTokens"))
        .and_then(|value| value.as_i64());
    let resolved = core.resolve_max_tokens(requested);
    let config = map
        .entry("generationConfig")
        .or_insert_with(|| JsonValue::Object(Default::default()));
    if let Some(config) = config.as_object_mut() {
        config.insert("maxOutputTokens".to_string(), JsonValue::from(resolved));
    }
}
