use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use async_trait::async_trait;
use serde_json::json;

use routecodex_common::{env_keys, env_string};
use routecodex_provider_core::{
    AuthConfig, PipelineConfig, Provider, ProviderError, ProviderReply, ProviderRequest,
    ProviderResult, ProviderStatus, header_get,
};

use crate::oauth::{EnsureOptions, ensure_valid_oauth_token};

use super::gemini::shape_gemini_body;
use super::geminicli::{normalize_cloudcode_frame, oauth_endpoints, unwrap_envelope};
use super::upstream::UpstreamCore;

const PROVIDER_NAME: &str = "antigravity";
const DEFAULT_BASE_URL: &str = "https://cloudcode-pa.googleapis.com";
const SIGNATURE_HEADER: &str = "x-cloudaicompanion-signature";
const SIGNATURE_CACHE_CAP: usize = 128;

/// Opaque per-session signature blobs handed back by the upstream and
/// replayed on subsequent requests. Keyed `(alias, session_id)`, LRU-bounded,
/// no TTL; eviction and process restart are the only invalidation.
#[derive(Default)]
struct SignatureCache {
    entries: HashMap<(String, String), String>,
    order: Vec<(String, String)>,
}

impl SignatureCache {
    fn get(&mut self, key: &(String, String)) -> Option<String> {
        let value = self.entries.get(key).cloned()?;
        self.order.retain(|entry| entry != key);
        self.order.push(key.clone());
        Some(value)
    }

    fn insert(&mut self, key: (String, String), value: String) {
        if self.entries.insert(key.clone(), value).is_none() {
            self.order.push(key);
        }
        while self.order.len() > SIGNATURE_CACHE_CAP {
            let evicted = self.order.remove(0);
            self.entries.remove(&evicted);
        }
    }
}

fn signature_cache() -> &'static Mutex<SignatureCache> {
    static CACHE: OnceLock<Mutex<SignatureCache>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(SignatureCache::default()))
}

/// Antigravity account family: same Cloud-Code-Assist wire as Gemini CLI
/// with `agent-<uuid>` request ids, a session signature cache, and a
/// header-mode switch for upstream A/B surfaces.
pub struct AntigravityProvider {
    core: UpstreamCore,
    alias: String,
}

impl AntigravityProvider {
    pub fn new(config: PipelineConfig, wire_model: String) -> ProviderResult<Self> {
        let alias = match &config.provider.auth {
            AuthConfig::OAuth { alias, .. } => alias.clone(),
            _ => "default".to_string(),
        };
        let endpoints = oauth_endpoints().with_overrides(&config.provider.extensions);
        Ok(Self {
            core: UpstreamCore::new(
                PROVIDER_NAME,
                config,
                wire_model,
                DEFAULT_BASE_URL,
                Some(endpoints),
            )?,
            alias,
        })
    }

    async fn project_id(&self) -> ProviderResult<String> {
        self.core
            .auth
            .read_payload()
            .await?
            .and_then(|payload| payload.project_id)
            .filter(|project| !project.is_empty())
            .ok_or(ProviderError::MissingCredential("project_id"))
    }

    fn header_mode_headers(&self) -> Vec<(&'static str, &'static str)> {
        match env_string(env_keys::ANTIGRAVITY_HEADER_MODE).as_deref() {
            Some("minimal") => Vec::new(),
            Some("standard") | Some("default") | None | Some(_) => {
                vec![("x-cloudaicompanion-client", "antigravity")]
            }
        }
    }

    fn cache_key(&self, request: &ProviderRequest) -> Option<(String, String)> {
        let session = request.session_id.clone()?;
        Some((self.alias.clone(), session))
    }
}

#[async_trait]
impl Provider for AntigravityProvider {
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
        let mut inner = request.body.clone();
        shape_gemini_body(&mut inner, &self.core);
        let wrapped = json!({
            "model": self.core.wire_model,
            "project": self.project_id().await?,
            "requestId": format!("agent-{}", uuid::Uuid::new_v4()),
            "request": inner,
        });

        let mut service_headers = self.header_mode_headers();
        let cache_key = self.cache_key(&request);
        let cached_signature = cache_key.as_ref().and_then(|key| {
            signature_cache()
                .lock()
                .ok()
                .and_then(|mut cache| cache.get(key))
        });
        if let Some(signature) = &cached_signature {
            service_headers.push((SIGNATURE_HEADER, signature.as_str()));
        }

        if request.wants_stream {
            return self
                .core
                .send_sse(
                    &request,
                    "/v1internal:streamGenerateContent?alt=sse",
                    wrapped,
                    &service_headers,
                    normalize_cloudcode_frame,
                )
                .await;
        }

        let reply = self
            .core
            .send_json(
                &request,
                "/v1internal:generateContent",
                wrapped,
                &service_headers,
                self.core.resolve_timeout(None, None),
            )
            .await?;

        if let (Some(key), ProviderReply::Json(response)) = (cache_key, &reply)
            && let Some(signature) = header_get(&response.headers, SIGNATURE_HEADER)
            && let Ok(mut cache) = signature_cache().lock()
        {
            cache.insert(key, signature.to_string());
        }

        Ok(unwrap_envelope(reply))
    }

    async fn check_health(&self) -> ProviderResult<bool> {
        self.core.check_health_get("/v1internal:countTokens").await
    }

    async fn cleanup(&self) -> ProviderResult<()> {
        if let Ok(mut cache) = signature_cache().lock() {
            cache.entries.retain(|(alias, _), _| alias != &self.alias);
            cache.order.retain(|(alias, _)| alias != &self.alias);
        }
        Ok(())
    }

    fn status(&self) -> ProviderStatus {
        self.core.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_cache_is_lru_bounded() {
        let mut cache = SignatureCache::default();
        for index in 0..(SIGNATURE_CACHE_CAP + 10) {
            cache.insert(
                ("alias".to_string(), format!("session-{index}")),
                format!("sig-{index}"),
            );
        }
        assert_eq!(cache.entries.len(), SIGNATURE_CACHE_CAP);
        // Oldest entries were evicted.
        assert!(cache
            .get(&("alias".to_string(), "session-0".to_string()))
            .is_none());
        assert!(cache
            .get(&("alias".to_string(), "session-100".to_string()))
            .is_some());
    }

    #[test]
    fn get_refreshes_recency() {
        let mut cache = SignatureCache::default();
        cache.insert(("a".to_string(), "s1".to_string()), "sig1".to_string());
        cache.insert(("a".to_string(), "s2".to_string()), "sig2".to_string());
        let _ = cache.get(&("a".to_string(), "s1".to_string()));
        assert_eq!(cache.order.last().unwrap().1, "s1");
    }
}
