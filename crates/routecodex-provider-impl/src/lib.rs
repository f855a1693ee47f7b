pub mod http_client;
pub mod oauth;
pub mod providers;
pub mod registry;

pub use registry::{ProviderFactory, create_provider};

/// OAuth endpoint set for a provider family, when the family is
/// OAuth-backed. The refresh daemon and the CLI both resolve through this.
pub fn oauth_endpoints_for(provider: &str) -> Option<oauth::OAuthEndpoints> {
    match provider {
        "qwen" => Some(providers::qwen::oauth_endpoints()),
        "iflow" => Some(providers::iflow::oauth_endpoints()),
        "geminicli" | "antigravity" => Some(providers::geminicli::oauth_endpoints()),
        _ => None,
    }
}
