use std::collections::BTreeMap;

use routecodex_protocol::Proto;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// How a provider authenticates to its upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthConfig {
    /// Static API key handed over as `Authorization: Bearer <key>`.
    ApiKey { key: String },
    /// OAuth token file managed by the refresh daemon;
    /// `alias` selects the file under `auth/<provider>/`.
    OAuth {
        provider: String,
        #[serde(default = "default_alias")]
        alias: String,
    },
    /// Raw token file at an explicit path (vendor CLI credentials).
    TokenFile { path: String },
}

fn default_alias() -> String {
    "default".to_string()
}

/// The provider half of a pipeline config entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderBlock {
    /// Factory discriminator: `openai`, `glm`, `qwen`, `iflow`, `deepseek`,
    /// `lmstudio`, `gemini`, `geminicli`, `antigravity`.
    pub provider_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub auth: AuthConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Extra headers merged after the provider's service-profile headers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, JsonValue>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelBlock {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i64>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, JsonValue>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProtocolsBlock {
    pub input: Proto,
    pub output: Proto,
}

impl Default for ProtocolsBlock {
    fn default() -> Self {
        Self {
            input: Proto::OpenaiChat,
            output: Proto::OpenaiChat,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompatBlock {
    #[serde(default)]
    pub profile: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shape_filter_file: Option<String>,
}

/// One entry of the pipeline-config table, keyed `<provider>.<model>.<key>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub provider: ProviderBlock,
    #[serde(default)]
    pub model: ModelBlock,
    #[serde(default)]
    pub protocols: ProtocolsBlock,
    #[serde(default)]
    pub compatibility: CompatBlock,
}

impl PipelineConfig {
    /// Deterministic identity used by the provider-instance cache.
    pub fn instance_signature(&self, runtime_key: &str) -> String {
        let auth_tag = match &self.provider.auth {
            AuthConfig::ApiKey { .. } => "apikey",
            AuthConfig::OAuth { .. } => "oauth",
            AuthConfig::TokenFile { .. } => "tokenfile",
        };
        format!(
            "{}|{}|{}|{}",
            self.provider.provider_type,
            self.provider.base_url.as_deref().unwrap_or_default(),
            auth_tag,
            runtime_key,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_fields_land_in_extensions() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{
                "provider": {
                    "provider_type": "glm",
                    "base_url": "https://open.bigmodel.cn/api/paas/v4",
                    "auth": {"type": "apikey", "key": "k1"},
                    "extensions": {"business_tier": "pro"}
                },
                "model": {"max_tokens": 8192},
                "protocols": {"input": "openai-chat", "output": "openai-chat"},
                "compatibility": {"profile": "glm"}
            }"#,
        )
        .unwrap();
        assert_eq!(config.provider.extensions["business_tier"], "pro");
        assert_eq!(config.model.max_tokens, Some(8192));
    }
}
