use serde::{Deserialize, Serialize};

mod error;

pub use error::{ErrorDetails, ErrorEnvelope, ErrorKind, GatewayError, ProviderOrigin, VendorReport};

/// Canonical pipeline key: `<provider>.<model>.<key>`.
///
/// Every route target resolves to exactly one of these; the pipeline cache,
/// snapshot metadata, and history journal all key on the same string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetKey(pub String);

impl TargetKey {
    pub fn new(provider_id: &str, model_id: &str, key_id: &str) -> Self {
        Self(format!("{provider_id}.{model_id}.{key_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TargetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A concrete upstream target chosen by the load balancer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteTarget {
    pub provider_id: String,
    pub model_id: String,
    pub key_id: String,
}

impl RouteTarget {
    pub fn key(&self) -> TargetKey {
        TargetKey::new(&self.provider_id, &self.model_id, &self.key_id)
    }
}

/// Entry endpoint bucket used for snapshot directories and SSE framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryEndpoint {
    OpenaiChat,
    OpenaiResponses,
    AnthropicMessages,
    GeminiGenerate,
}

impl EntryEndpoint {
    pub fn bucket(&self) -> &'static str {
        match self {
            EntryEndpoint::OpenaiChat => "openai-chat",
            EntryEndpoint::OpenaiResponses => "openai-responses",
            EntryEndpoint::AnthropicMessages => "anthropic-messages",
            EntryEndpoint::GeminiGenerate => "gemini-generate",
        }
    }
}

pub fn new_request_id() -> String {
    format!("req-{}", uuid::Uuid::new_v4())
}

/// Read an env var as a positive integer, ignoring unset/empty/garbage values.
pub fn env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    raw.parse::<u64>().ok().filter(|value| *value > 0)
}

pub fn env_string(name: &str) -> Option<String> {
    let raw = std::env::var(name).ok()?;
    let raw = raw.trim().to_string();
    if raw.is_empty() { None } else { Some(raw) }
}

/// Env var names understood by the gateway. Kept in one place so the CLI
/// `validate` command can report on all of them.
pub mod env_keys {
    pub const PROVIDER_TIMEOUT_MS: &str = "ROUTECODEX_PROVIDER_TIMEOUT_MS";
    pub const PROVIDER_RETRIES: &str = "ROUTECODEX_PROVIDER_RETRIES";
    pub const DEFAULT_MAX_TOKENS: &str = "ROUTECODEX_DEFAULT_MAX_TOKENS";
    pub const ENABLE_DEBUGCENTER: &str = "ROUTECODEX_ENABLE_DEBUGCENTER";
    pub const ANTIGRAVITY_HEADER_MODE: &str = "ROUTECODEX_ANTIGRAVITY_HEADER_MODE";
    pub const GLM_HTTP_TIMEOUT_MS: &str = "GLM_HTTP_TIMEOUT_MS";
    pub const RCC_UPSTREAM_TIMEOUT_MS: &str = "RCC_UPSTREAM_TIMEOUT_MS";
    pub const OAUTH_CALLBACK_HOST: &str = "OAUTH_CALLBACK_HOST";
}
