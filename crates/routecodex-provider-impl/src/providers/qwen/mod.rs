use async_trait::async_trait;
use serde_json::Value as JsonValue;

use routecodex_provider_core::{
    PipelineConfig, Provider, ProviderReply, ProviderRequest, ProviderResult, ProviderStatus,
};

use crate::oauth::{EnsureOptions, FlowPreference, OAuthEndpoints, ensure_valid_oauth_token};

use super::upstream::UpstreamCore;

const PROVIDER_NAME: &str = "qwen";
const DEFAULT_BASE_URL: &str = "https://portal.qwen.ai/v1";
const DEVICE_CODE_URL: &str = "https://chat.qwen.ai/api/v1/oauth2/device/code";
const TOKEN_URL: &str = "https://chat.qwen.ai/api/v1/oauth2/token";
const CLIENT_ID: &str = "f0304373b74a44d2b584a3fb70ca9e56";
const OAUTH_SCOPE: &str = "openid profile email model.completion";

const CLIENT_METADATA: &str =
    "ideType=IDE_UNSPECIFIED,platform=PLATFORM_UNSPECIFIED,pluginType=GEMINI";
const GOOG_API_CLIENT: &str = "gl-node/22.0.0";

/// Upstream accepts exactly these body keys; everything else is dropped.
const PAYLOAD_ALLOW_LIST: [&str; 9] = [
    "model",
    "messages",
    "input",
    "parameters",
    "tools",
    "stream",
    "response_format",
    "user",
    "metadata",
];

pub fn oauth_endpoints() -> OAuthEndpoints {
    OAuthEndpoints {
        device_urls: vec![DEVICE_CODE_URL.to_string()],
        auth_url: String::new(),
        token_url: TOKEN_URL.to_string(),
        client_id: CLIENT_ID.to_string(),
        client_secret: None,
        scope: OAUTH_SCOPE.to_string(),
        flow: FlowPreference::DeviceFirst,
    }
}

pub struct QwenProvider {
    core: UpstreamCore,
}

impl QwenProvider {
    pub fn new(config: PipelineConfig, wire_model: String) -> ProviderResult<Self> {
        let endpoints = oauth_endpoints().with_overrides(&config.provider.extensions);
        Ok(Self {
            core: UpstreamCore::new(
                PROVIDER_NAME,
                config,
                wire_model,
                DEFAULT_BASE_URL,
                Some(endpoints),
            )?,
        })
    }

    /// Endpoint base: `token.resource_url || default`, scheme added when the
    /// token file stores a bare host.
    async fn resolve_chat_url(&self) -> ProviderResult<String> {
        let resource = self
            .core
            .auth
            .read_payload()
            .await?
            .and_then(|payload| payload.resource_url)
            .filter(|resource| !resource.trim().is_empty());
        Ok(match resource {
            Some(resource) => {
                let base = if resource.starts_with("http://") || resource.starts_with("https://") {
                    resource
                } else {
                    format!("https://{resource}")
                };
                format!("{}/v1/chat/completions", base.trim_end_matches('/'))
            }
            None => format!("{}/chat/completions", self.core.base_url),
        })
    }
}

#[async_trait]
impl Provider for QwenProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn initialize(&self) -> ProviderResult<()> {
        if let Some(token_path) = self.core.auth.token_file_path()
            && let Some(endpoints) = &self.core.oauth
        {
            ensure_valid_oauth_token(
                &self.core.client,
                endpoints,
                token_path,
                EnsureOptions {
                    open_browser: true,
                    force_reauthorize: false,
                    force_reacquire_if_refresh_fails: false,
                },
            )
            .await?;
        }
        self.core.mark_initialized();
        Ok(())
    }

    async fn send_request(&self, request: ProviderRequest) -> ProviderResult<ProviderReply> {
        let mut body = self.core.preprocess_flat_body(&request);
        shape_qwen_body(&mut body);
        let url = self.resolve_chat_url().await?;
        let timeout = self.core.resolve_timeout(None, None);
        self.core
            .send_json(
                &request,
                &url,
                body,
                &[
                    ("Client-Metadata", CLIENT_METADATA),
                    ("X-Goog-Api-Client", GOOG_API_CLIENT),
                ],
                timeout,
            )
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

/// Move the resolved token cap under `parameters` (the upstream's spelling)
/// and drop every key outside the allow-list.
fn shape_qwen_body(body: &mut JsonValue) {
    let Some(map) = body.as_object_mut() else {
        return;
    };
    if let Some(max_tokens) = map.remove("max_tokens") {
        let parameters = map
            .entry("parameters")
            .or_insert_with(|| JsonValue::Object(Default::default()));
        if let Some(parameters) = parameters.as_object_mut() {
            parameters.insert("max_tokens".to_string(), max_tokens);
        }
    }
    map.retain(|key, _| PAYLOAD_ALLOW_LIST.contains(&key.as_str()));
}
